// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error model shared by every auth backend.

use crate::storage::StorageError;

/// Replay-ledger rejections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
	/// A different client nonce was presented for an identity that may not migrate.
	#[error("nonce mismatch")]
	NonceMismatch,

	/// The identity document is older than the one already recorded.
	#[error("stale identity document")]
	StaleIdentity,

	/// The identity was marked single-use and has already authenticated.
	#[error("reauthentication is disallowed")]
	ReauthDisallowed,

	/// The presented role tag has been revoked.
	#[error("role tag is blacklisted")]
	TagBlacklisted,

	/// Reauthentication is permitted, so a nonce is mandatory.
	#[error("missing nonce")]
	MissingNonce,
}

/// Errors surfaced by backends to the host.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
	/// Missing or malformed request fields.
	#[error("bad request: {0}")]
	BadRequest(String),

	/// A cryptographic or upstream identity check failed. Carries a short reason.
	#[error("{0}")]
	Verification(String),

	/// The claim does not satisfy a bound attribute of the role.
	#[error("{attribute} does not match the role binding")]
	BindingMismatch { attribute: String },

	#[error(transparent)]
	Replay(#[from] ReplayError),

	/// A role tag could not be parsed or failed HMAC verification.
	#[error("tag verification failed: {0}")]
	InvalidTag(String),

	/// Unknown role, missing whitelist entry or missing trust material.
	#[error("not found: {0}")]
	NotFound(String),

	/// An external API failed.
	#[error("{service} request failed: {message}")]
	Upstream { service: String, message: String },

	/// Concurrent write contention; the caller may retry.
	#[error("conflict: {0}")]
	Conflict(String),

	#[error("internal error: {0}")]
	Internal(String),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Coarse classification used by the host to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	BadRequest,
	Forbidden,
	NotFound,
	Upstream,
	Conflict,
	Internal,
}

impl AuthError {
	pub fn bad_request(message: impl Into<String>) -> Self {
		Self::BadRequest(message.into())
	}

	pub fn verification(reason: impl Into<String>) -> Self {
		Self::Verification(reason.into())
	}

	pub fn binding(attribute: impl Into<String>) -> Self {
		Self::BindingMismatch {
			attribute: attribute.into(),
		}
	}

	pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Upstream {
			service: service.into(),
			message: message.into(),
		}
	}

	pub fn not_found(what: impl Into<String>) -> Self {
		Self::NotFound(what.into())
	}

	pub fn internal(message: impl Into<String>) -> Self {
		Self::Internal(message.into())
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::BadRequest(_) => ErrorKind::BadRequest,
			Self::Verification(_)
			| Self::BindingMismatch { .. }
			| Self::Replay(_)
			| Self::InvalidTag(_) => ErrorKind::Forbidden,
			Self::NotFound(_) => ErrorKind::NotFound,
			Self::Upstream { .. } => ErrorKind::Upstream,
			Self::Conflict(_) => ErrorKind::Conflict,
			Self::Internal(_) | Self::Serialization(_) => ErrorKind::Internal,
		}
	}

	/// The message shown to the client.
	///
	/// Internal causes are logged here and replaced with a generic failure.
	pub fn user_message(&self) -> String {
		match self {
			Self::Internal(_) | Self::Serialization(_) => {
				tracing::error!(error = %self, "internal error while handling auth request");
				"internal error".to_string()
			}
			Self::InvalidTag(_) => "tag verification failed".to_string(),
			other => other.to_string(),
		}
	}

	pub fn is_replay(&self, expected: &ReplayError) -> bool {
		matches!(self, Self::Replay(e) if e == expected)
	}
}

impl From<StorageError> for AuthError {
	fn from(err: StorageError) -> Self {
		match err {
			StorageError::Conflict(key) => AuthError::Conflict(format!("concurrent write to {key}")),
			StorageError::Backend(message) => AuthError::Internal(format!("storage: {message}")),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn replay_errors_are_forbidden() {
		let err: AuthError = ReplayError::NonceMismatch.into();
		assert_eq!(err.kind(), ErrorKind::Forbidden);
		assert_eq!(err.user_message(), "nonce mismatch");
		assert!(err.is_replay(&ReplayError::NonceMismatch));
	}

	#[test]
	fn internal_errors_are_masked() {
		let err = AuthError::internal("decoder exploded at offset 12");
		assert_eq!(err.user_message(), "internal error");
		assert_eq!(err.kind(), ErrorKind::Internal);
	}

	#[test]
	fn binding_errors_name_the_attribute() {
		let err = AuthError::binding("bound_ami_id");
		assert_eq!(err.user_message(), "bound_ami_id does not match the role binding");
	}

	#[test]
	fn invalid_tag_hides_parse_detail() {
		let err = AuthError::InvalidTag("hmac mismatch".to_string());
		assert_eq!(err.user_message(), "tag verification failed");
	}

	#[test]
	fn storage_conflict_maps_to_conflict() {
		let err: AuthError = StorageError::Conflict("whitelist/identity/i-1".to_string()).into();
		assert_eq!(err.kind(), ErrorKind::Conflict);
	}
}
