// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Verification of a node's signed login request.

use chrono::{DateTime, Utc};
use keyward_server_auth::{AuthError, AuthResult};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::signing;

/// Largest accepted distance between the signed timestamp and now.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Deserialize)]
pub struct ChefLoginInput {
	pub client_name: String,
	pub timestamp: String,
	pub signature: String,
	#[serde(default = "default_version")]
	pub signature_version: String,
}

fn default_version() -> String {
	signing::SIGN_VERSION.to_string()
}

/// Check the version, the clock skew, then the signature over the login request.
pub fn verify_login(
	input: &ChefLoginInput,
	public_key_pem: &str,
	login_path: &str,
	now: DateTime<Utc>,
) -> AuthResult<()> {
	if input.signature_version != signing::SIGN_VERSION {
		return Err(AuthError::bad_request(format!(
			"unsupported signature version {:?}",
			input.signature_version
		)));
	}
	let timestamp = DateTime::parse_from_rfc3339(&input.timestamp)
		.map_err(|_| AuthError::bad_request("timestamp must be RFC 3339"))?
		.with_timezone(&Utc);
	let skew_secs = (now - timestamp).num_seconds().unsigned_abs();
	if skew_secs > MAX_CLOCK_SKEW.as_secs() {
		debug!(client = %input.client_name, skew_secs, "login outside clock skew");
		return Err(AuthError::verification("clock skew is too great"));
	}

	let key = signing::parse_public_key(public_key_pem)
		.ok_or_else(|| AuthError::verification("client public key is invalid"))?;
	let canonical = signing::canonical_request("POST", login_path, b"", &input.timestamp, &input.client_name);
	if !signing::verify(&key, &canonical, &input.signature) {
		return Err(AuthError::verification("signature verification failed"));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::SecondsFormat;
	use rsa::pkcs8::{EncodePublicKey, LineEnding};
	use rsa::RsaPrivateKey;

	struct Node {
		key: RsaPrivateKey,
		pem: String,
	}

	fn node() -> Node {
		let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
		let pem = key.to_public_key().to_public_key_pem(LineEnding::LF).unwrap();
		Node { key, pem }
	}

	fn input(node: &Node, at: DateTime<Utc>) -> ChefLoginInput {
		let timestamp = at.to_rfc3339_opts(SecondsFormat::Secs, true);
		let canonical = signing::canonical_request("POST", "/v1/auth/chef/login", b"", &timestamp, "web1");
		ChefLoginInput {
			client_name: "web1".to_string(),
			signature: signing::sign(&node.key, &canonical).unwrap(),
			timestamp,
			signature_version: signing::SIGN_VERSION.to_string(),
		}
	}

	#[test]
	fn accepts_fresh_signature() {
		let node = node();
		let now = Utc::now();
		let login = input(&node, now - chrono::Duration::minutes(2));
		verify_login(&login, &node.pem, "/v1/auth/chef/login", now).unwrap();
	}

	#[test]
	fn rejects_skew_in_either_direction() {
		let node = node();
		let now = Utc::now();
		for offset in [-6, 6] {
			let login = input(&node, now + chrono::Duration::minutes(offset));
			let err = verify_login(&login, &node.pem, "/v1/auth/chef/login", now).unwrap_err();
			assert_eq!(err.user_message(), "clock skew is too great");
		}
	}

	#[test]
	fn rejects_signature_for_another_path() {
		let node = node();
		let now = Utc::now();
		let login = input(&node, now);
		let err = verify_login(&login, &node.pem, "/v1/auth/other/login", now).unwrap_err();
		assert_eq!(err.user_message(), "signature verification failed");
	}

	#[test]
	fn rejects_unknown_signature_version() {
		let node = node();
		let now = Utc::now();
		let mut login = input(&node, now);
		login.signature_version = "algorithm=sha256;version=1.3;".to_string();
		assert!(matches!(
			verify_login(&login, &node.pem, "/v1/auth/chef/login", now),
			Err(AuthError::BadRequest(_))
		));
	}
}
