// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Health HTTP handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use keyward_server_auth::Backend;
use keyward_server_jobs::{HealthState, JobsHealthStatus};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct MountInfo {
	pub path: String,
	#[serde(rename = "type")]
	pub backend_type: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	pub status: HealthState,
	pub version: &'static str,
	pub mounts: Vec<MountInfo>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub jobs: Option<JobsHealthStatus>,
}

/// GET /health - 503 only when the job scheduler reports unhealthy.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
	let jobs = match &state.scheduler {
		Some(scheduler) => Some(scheduler.health_status().await),
		None => None,
	};
	let status = jobs
		.as_ref()
		.map(|j| j.status)
		.unwrap_or(HealthState::Healthy);

	let mounts = state
		.mounts
		.iter()
		.map(|(path, backend)| MountInfo {
			path: path.clone(),
			backend_type: backend.backend_type(),
		})
		.collect();

	let code = if status == HealthState::Unhealthy {
		StatusCode::SERVICE_UNAVAILABLE
	} else {
		StatusCode::OK
	};

	(
		code,
		Json(HealthResponse {
			status,
			version: env!("CARGO_PKG_VERSION"),
			mounts,
			jobs,
		}),
	)
}
