// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server error types and HTTP response conversions.

use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use keyward_server_auth::{AuthError, ErrorKind};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	/// Error returned by a mounted backend.
	#[error(transparent)]
	Auth(#[from] AuthError),

	/// No backend is mounted at this path.
	#[error("no auth backend mounted at '{0}'")]
	UnknownMount(String),

	/// The request body could not be decoded.
	#[error("invalid request body: {0}")]
	BadRequest(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
}

impl ServerError {
	fn status_and_code(&self) -> (StatusCode, &'static str) {
		match self {
			ServerError::Auth(e) => match e.kind() {
				ErrorKind::BadRequest => (StatusCode::BAD_REQUEST, "bad_request"),
				ErrorKind::Forbidden => (StatusCode::FORBIDDEN, "permission_denied"),
				ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
				ErrorKind::Upstream => (StatusCode::BAD_GATEWAY, "upstream_error"),
				ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict"),
				ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
			},
			ServerError::UnknownMount(_) => (StatusCode::NOT_FOUND, "not_found"),
			ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
		}
	}
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		let (status, code) = self.status_and_code();
		let message = match &self {
			ServerError::Auth(e) => e.user_message(),
			other => other.to_string(),
		};
		if status.is_server_error() {
			tracing::warn!(status = status.as_u16(), %message, "auth request failed");
		}
		(
			status,
			Json(ErrorResponse {
				error: code.to_string(),
				message,
			}),
		)
			.into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use keyward_server_auth::ReplayError;

	#[test]
	fn test_status_mapping() {
		let cases = [
			(ServerError::from(AuthError::bad_request("x")), StatusCode::BAD_REQUEST),
			(ServerError::from(AuthError::from(ReplayError::NonceMismatch)), StatusCode::FORBIDDEN),
			(ServerError::from(AuthError::not_found("role")), StatusCode::NOT_FOUND),
			(ServerError::from(AuthError::upstream("sts", "500")), StatusCode::BAD_GATEWAY),
			(ServerError::from(AuthError::Conflict("k".into())), StatusCode::CONFLICT),
			(ServerError::from(AuthError::internal("boom")), StatusCode::INTERNAL_SERVER_ERROR),
			(ServerError::UnknownMount("ldap".into()), StatusCode::NOT_FOUND),
		];
		for (err, expected) in cases {
			assert_eq!(err.status_and_code().0, expected, "{err}");
		}
	}

	#[test]
	fn test_internal_message_is_masked() {
		let response = ServerError::from(AuthError::internal("decoder offset 12")).into_response();
		assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
	}
}
