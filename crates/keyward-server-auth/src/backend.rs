// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The seam between the host and an auth method.

use async_trait::async_trait;

use crate::error::AuthResult;
use crate::request::{Request, Response};
use crate::types::Auth;

/// An auth method mounted by the host.
///
/// Backends are shared across request tasks; every method takes `&self`
/// and internal state is guarded by the backend itself.
#[async_trait]
pub trait Backend: Send + Sync {
	/// Mount type name, such as `aws` or `radius`.
	fn backend_type(&self) -> &'static str;

	/// Handle a request routed to this backend. `login` issues an [`Auth`].
	async fn handle(&self, request: Request) -> AuthResult<Response>;

	/// Re-validate a previously issued [`Auth`] and return its refreshed form.
	async fn renew(&self, auth: &Auth) -> AuthResult<Auth>;

	/// Called by the host scheduler. Backends without background work do nothing.
	async fn periodic(&self) -> AuthResult<()> {
		Ok(())
	}
}
