// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use keyward_server_auth::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OidcError {
	#[error("network error: {0}")]
	Network(#[from] reqwest::Error),

	#[error("discovery failed: {0}")]
	Discovery(String),

	#[error("no signing key with kid {0:?}")]
	UnknownKey(String),

	#[error("invalid token: {0}")]
	Token(#[from] jsonwebtoken::errors::Error),

	#[error("token is not yet valid")]
	NotYetValid,

	#[error("token is missing the {0} claim")]
	MissingClaim(&'static str),

	#[error("access token request failed: {0}")]
	AccessToken(String),

	#[error("arm request failed ({status}): {message}")]
	Arm { status: u16, message: String },

	#[error("invalid response: {0}")]
	InvalidResponse(String),
}

pub type OidcResult<T> = std::result::Result<T, OidcError>;

impl From<OidcError> for AuthError {
	fn from(err: OidcError) -> Self {
		match err {
			OidcError::Token(e) => AuthError::verification(match e.kind() {
				JwtErrorKind::ExpiredSignature => "token is expired".to_string(),
				JwtErrorKind::ImmatureSignature => "token is not yet valid".to_string(),
				JwtErrorKind::InvalidAudience => "token audience does not match".to_string(),
				JwtErrorKind::InvalidIssuer => "token issuer does not match".to_string(),
				_ => format!("token could not be verified: {e}"),
			}),
			OidcError::UnknownKey(_) | OidcError::NotYetValid | OidcError::MissingClaim(_) => {
				AuthError::verification(err.to_string())
			}
			OidcError::Arm { status: 404, .. } => AuthError::verification("virtual machine not found"),
			OidcError::Arm { .. } => AuthError::upstream("arm", err.to_string()),
			other => AuthError::upstream("azure", other.to_string()),
		}
	}
}
