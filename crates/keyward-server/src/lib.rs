// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP host for keyward auth backends.
//!
//! Each configured mount gets its own in-memory storage and is served under
//! `/v1/auth/<mount>/...`.

pub mod error;
pub mod mount;
pub mod routes;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
	routing::{get, post},
	Router,
};
use keyward_server_jobs::JobScheduler;

pub use error::ServerError;
pub use mount::{build_mounts, MountedBackend};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
	pub mounts: Arc<BTreeMap<String, Arc<MountedBackend>>>,
	pub scheduler: Option<Arc<JobScheduler>>,
}

impl AppState {
	pub fn new(mounts: BTreeMap<String, Arc<MountedBackend>>) -> Self {
		Self {
			mounts: Arc::new(mounts),
			scheduler: None,
		}
	}

	pub fn with_scheduler(mut self, scheduler: Arc<JobScheduler>) -> Self {
		self.scheduler = Some(scheduler);
		self
	}

	pub(crate) fn mount(&self, path: &str) -> Result<&Arc<MountedBackend>, ServerError> {
		self.mounts
			.get(path)
			.ok_or_else(|| ServerError::UnknownMount(path.to_string()))
	}
}

pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(routes::health::health_check))
		.route("/v1/auth/{mount}/renew", post(routes::auth::renew))
		.route(
			"/v1/auth/{mount}/{*path}",
			get(routes::auth::read)
				.post(routes::auth::write)
				.put(routes::auth::write)
				.delete(routes::auth::delete),
		)
		.with_state(state)
}
