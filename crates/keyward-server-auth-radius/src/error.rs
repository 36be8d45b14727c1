// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use keyward_server_auth::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RadiusError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	/// No address could be resolved or connected within the dial timeout.
	#[error("timed out connecting to {0}")]
	DialTimeout(String),

	#[error("timed out waiting for a response")]
	ReadTimeout,

	/// The datagram is not a well-formed RADIUS packet.
	#[error("malformed packet: {0}")]
	Malformed(&'static str),

	/// The response authenticator does not match the shared secret.
	#[error("response authenticator mismatch")]
	BadAuthenticator,

	#[error("response identifier does not match the request")]
	IdentifierMismatch,

	#[error("password longer than 128 bytes")]
	PasswordTooLong,

	#[error("hash error: {0}")]
	Hash(#[from] openssl::error::ErrorStack),
}

pub type RadiusResult<T> = std::result::Result<T, RadiusError>;

impl From<RadiusError> for AuthError {
	fn from(err: RadiusError) -> Self {
		match err {
			RadiusError::PasswordTooLong => AuthError::bad_request(err.to_string()),
			RadiusError::Hash(e) => AuthError::internal(format!("md5: {e}")),
			other => AuthError::upstream("radius", other.to_string()),
		}
	}
}
