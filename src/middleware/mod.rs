// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Middleware modules (webhook signatures, task origin).

pub mod signature;
pub mod tasks_auth;

pub use signature::require_signature;
pub use tasks_auth::require_tasks_auth;
