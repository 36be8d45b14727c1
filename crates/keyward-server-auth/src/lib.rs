// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared core for keyward authentication backends.
//!
//! Each method crate (AWS, Chef, RADIUS, Azure, HTTP Basic) builds on:
//!
//! - [`Storage`]: the host key/value store, with an in-memory implementation
//! - [`Request`]/[`Response`]/[`Auth`]: the host request model
//! - [`AuthError`]: the error model and its user-facing messages
//! - [`RoleStore`]: lowercase-keyed roles with per-role HMAC keys
//! - [`policy`]: canonical policy lists
//! - [`TtlBounds`]: token and replay-retention lifetimes
//! - [`tidy`]: single-flight sweeps of expiring entries

pub mod backend;
pub mod error;
pub mod fields;
pub mod locks;
pub mod policy;
pub mod policy_map;
pub mod request;
pub mod role;
pub mod storage;
pub mod system;
pub mod tidy;
pub mod types;

pub use backend::Backend;
pub use error::{AuthError, AuthResult, ErrorKind, ReplayError};
pub use locks::KeyedLocks;
pub use policy_map::{PolicyMapEntry, PolicyMapStore};
pub use request::{ConnectionInfo, Operation, Request, Response};
pub use role::{Bindings, RoleBinding, RoleStore};
pub use storage::{InMemoryStorage, Storage, StorageError, StorageExt};
pub use system::{StaticSystemView, SystemView, TtlBounds};
pub use tidy::{Cooldown, Expiring, SingleFlight, TidyConfig, TidySummary};
pub use types::{Auth, AuthMethod, ClaimValue, PrincipalClaim};
