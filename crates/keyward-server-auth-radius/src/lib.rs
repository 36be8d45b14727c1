// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! RADIUS authentication.
//!
//! | Path | Operations |
//! |------|------------|
//! | `login/<username>` | Update: `{password}` |
//! | `config` | Read, Update, Delete |
//! | `users/<name>` | Read, Update, Delete; `users/` List |
//!
//! Users without a `users/` entry receive `unregistered_user_policies`.

pub mod backend;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;

pub use backend::RadiusBackend;
pub use client::Outcome;
pub use config::RadiusConfig;
pub use error::{RadiusError, RadiusResult};
