// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Chef request signing, protocol version 1.0.
//!
//! The canonical request is five lines:
//!
//! ```text
//! Method:<METHOD>
//! Hashed Path:<b64(sha1(path))>
//! X-Ops-Content-Hash:<b64(sha1(body))>
//! X-Ops-Timestamp:<RFC 3339>
//! X-Ops-UserId:<client name>
//! ```
//!
//! It is signed with raw RSA PKCS#1 v1.5 (no DigestInfo prefix), base64
//! encoded and split into 60-character `X-Ops-Authorization-N` headers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};

use crate::error::{ChefApiError, ChefApiResult};

pub const SIGN_VERSION: &str = "algorithm=sha1;version=1.0;";

/// Chef server API version advertised on every request.
pub const CHEF_VERSION: &str = "12.0.0";

const AUTHORIZATION_CHUNK: usize = 60;

/// Base64 SHA-1 digest.
pub fn hashed(data: &[u8]) -> String {
	STANDARD.encode(openssl::sha::sha1(data))
}

/// Collapse repeated slashes and drop a trailing one.
fn normalize_path(path: &str) -> String {
	let mut out = String::with_capacity(path.len());
	for c in path.chars() {
		if c == '/' && out.ends_with('/') {
			continue;
		}
		out.push(c);
	}
	if out.len() > 1 && out.ends_with('/') {
		out.pop();
	}
	out
}

pub fn canonical_request(method: &str, path: &str, body: &[u8], timestamp: &str, user_id: &str) -> String {
	format!(
		"Method:{}\nHashed Path:{}\nX-Ops-Content-Hash:{}\nX-Ops-Timestamp:{}\nX-Ops-UserId:{}",
		method.to_uppercase(),
		hashed(normalize_path(path).as_bytes()),
		hashed(body),
		timestamp,
		user_id
	)
}

pub fn parse_private_key(pem: &str) -> ChefApiResult<RsaPrivateKey> {
	RsaPrivateKey::from_pkcs1_pem(pem)
		.or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
		.map_err(|e| ChefApiError::Config(format!("invalid client key: {e}")))
}

/// Accepts SPKI (`BEGIN PUBLIC KEY`) and PKCS#1 (`BEGIN RSA PUBLIC KEY`) PEM.
pub fn parse_public_key(pem: &str) -> Option<RsaPublicKey> {
	RsaPublicKey::from_public_key_pem(pem)
		.or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
		.ok()
}

pub fn sign(key: &RsaPrivateKey, canonical: &str) -> ChefApiResult<String> {
	let signature = key
		.sign(Pkcs1v15Sign::new_unprefixed(), canonical.as_bytes())
		.map_err(|e| ChefApiError::Signing(e.to_string()))?;
	Ok(STANDARD.encode(signature))
}

/// Check a base64 signature over `canonical`.
pub fn verify(key: &RsaPublicKey, canonical: &str, signature_b64: &str) -> bool {
	let Ok(signature) = STANDARD.decode(signature_b64.trim()) else {
		return false;
	};
	key.verify(Pkcs1v15Sign::new_unprefixed(), canonical.as_bytes(), &signature)
		.is_ok()
}

/// Every header a signed Chef API request carries.
pub fn signed_headers(
	key: &RsaPrivateKey,
	user_id: &str,
	method: &str,
	path: &str,
	body: &[u8],
	timestamp: &str,
) -> ChefApiResult<Vec<(String, String)>> {
	let canonical = canonical_request(method, path, body, timestamp, user_id);
	let signature = sign(key, &canonical)?;

	let mut headers = vec![
		("X-Ops-Sign".to_string(), SIGN_VERSION.to_string()),
		("X-Ops-Userid".to_string(), user_id.to_string()),
		("X-Ops-Timestamp".to_string(), timestamp.to_string()),
		("X-Ops-Content-Hash".to_string(), hashed(body)),
		("X-Chef-Version".to_string(), CHEF_VERSION.to_string()),
	];
	for (i, chunk) in signature.as_bytes().chunks(AUTHORIZATION_CHUNK).enumerate() {
		headers.push((
			format!("X-Ops-Authorization-{}", i + 1),
			String::from_utf8_lossy(chunk).into_owned(),
		));
	}
	Ok(headers)
}
