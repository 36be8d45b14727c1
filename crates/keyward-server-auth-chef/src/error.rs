// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Chef API transport errors.

use keyward_server_auth::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChefApiError {
	/// Network-level error during HTTP communication.
	#[error("network error: {0}")]
	Network(#[from] reqwest::Error),

	/// The Chef server answered with a non-success status.
	#[error("chef api error: {status} - {message}")]
	Api { status: u16, message: String },

	/// The requested client or node does not exist.
	#[error("{0} not found on the chef server")]
	NotFound(String),

	#[error("invalid response from chef: {0}")]
	InvalidResponse(String),

	/// The configured client key could not sign the request.
	#[error("signing error: {0}")]
	Signing(String),

	#[error("configuration error: {0}")]
	Config(String),
}

pub type ChefApiResult<T> = std::result::Result<T, ChefApiError>;

impl From<ChefApiError> for AuthError {
	fn from(err: ChefApiError) -> Self {
		match err {
			ChefApiError::NotFound(what) => AuthError::verification(format!("{what} not found")),
			ChefApiError::Config(message) => AuthError::bad_request(message),
			other => AuthError::upstream("chef", other.to_string()),
		}
	}
}
