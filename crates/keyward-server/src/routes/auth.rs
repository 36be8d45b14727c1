// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Handlers that forward `/v1/auth/<mount>/...` to the mounted backend.

use axum::{
	body::Bytes,
	extract::{Path, Query, State},
	http::StatusCode,
	response::{IntoResponse, Response as HttpResponse},
	Json,
};
use keyward_server_auth::{Auth, Backend, Operation, Request, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::{error::ServerError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct ReadParams {
	#[serde(default)]
	pub list: bool,
}

/// GET - read, or list when `?list=true`.
pub async fn read(
	State(state): State<AppState>,
	Path((mount, path)): Path<(String, String)>,
	Query(params): Query<ReadParams>,
) -> Result<HttpResponse, ServerError> {
	let operation = if params.list {
		Operation::List
	} else {
		Operation::Read
	};
	dispatch(&state, &mount, Request::new(operation, path)).await
}

/// POST/PUT - update with an optional JSON object body.
pub async fn write(
	State(state): State<AppState>,
	Path((mount, path)): Path<(String, String)>,
	body: Bytes,
) -> Result<HttpResponse, ServerError> {
	let mut request = Request::new(Operation::Update, path);
	if !body.is_empty() {
		let data: Value =
			serde_json::from_slice(&body).map_err(|e| ServerError::BadRequest(e.to_string()))?;
		if !data.is_object() {
			return Err(ServerError::BadRequest("body must be a JSON object".to_string()));
		}
		request = request.with_data(data);
	}
	dispatch(&state, &mount, request).await
}

pub async fn delete(
	State(state): State<AppState>,
	Path((mount, path)): Path<(String, String)>,
) -> Result<HttpResponse, ServerError> {
	dispatch(&state, &mount, Request::new(Operation::Delete, path)).await
}

#[derive(Debug, Deserialize)]
pub struct RenewRequest {
	pub auth: Auth,
}

/// POST renew - re-validate a previously issued auth.
#[tracing::instrument(skip_all, fields(mount = %mount))]
pub async fn renew(
	State(state): State<AppState>,
	Path(mount): Path<String>,
	Json(body): Json<RenewRequest>,
) -> Result<HttpResponse, ServerError> {
	let backend = state.mount(&mount)?;
	let auth = backend.renew(&body.auth).await?;
	Ok(Json(Response::with_auth(auth)).into_response())
}

#[tracing::instrument(skip_all, fields(mount = %mount, op = ?request.operation, path = %request.path))]
async fn dispatch(
	state: &AppState,
	mount: &str,
	request: Request,
) -> Result<HttpResponse, ServerError> {
	let backend = state.mount(mount)?;
	let response = backend.handle(request).await?;
	if response == Response::empty() {
		return Ok(StatusCode::NO_CONTENT.into_response());
	}
	Ok(Json(response).into_response())
}
