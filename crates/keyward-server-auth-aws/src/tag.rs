// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HMAC-signed role tags.
//!
//! A role tag narrows what an EC2 instance may obtain from a role. Its wire
//! form is a single line that fits in an EC2 tag value:
//!
//! ```text
//! v1:<nonce>,r=<role>,d=<0|1>,m=<0|1>,p=<policy+policy>[,i=<instance>][,t=<secs>],hmac=<mac>
//! ```
//!
//! The MAC is HMAC-SHA256 over the canonical rendering of every field except
//! `hmac`, keyed by the role's HMAC key. Parsing accepts the key/value fields
//! in any order; verification always recomputes the canonical form.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use keyward_common_secret::SecretBytes;
use keyward_server_auth::{AuthError, AuthResult};
use rand::RngCore;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

pub const TAG_VERSION: &str = "v1";

/// EC2 tag values are limited to 127 characters.
pub const MAX_TAG_LEN: usize = 127;

const NONCE_BYTES: usize = 12;

const RESERVED: [char; 4] = [',', '=', '+', ':'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTag {
	pub version: String,
	pub nonce: String,
	pub role: String,
	/// Empty means the role's own policies apply.
	pub policies: Vec<String>,
	pub max_ttl: Duration,
	pub instance_id: String,
	pub disallow_reauthentication: bool,
	pub allow_instance_migration: bool,
}

impl RoleTag {
	/// A tag for `role` with a fresh random nonce.
	pub fn new(role: impl Into<String>) -> Self {
		let mut nonce = [0u8; NONCE_BYTES];
		rand::rngs::OsRng.fill_bytes(&mut nonce);
		Self {
			version: TAG_VERSION.to_string(),
			nonce: URL_SAFE_NO_PAD.encode(nonce),
			role: role.into(),
			policies: Vec::new(),
			max_ttl: Duration::ZERO,
			instance_id: String::new(),
			disallow_reauthentication: false,
			allow_instance_migration: false,
		}
	}

	/// Render and sign the tag. Fails if the result does not fit an EC2 tag.
	pub fn seal(&self, key: &SecretBytes) -> AuthResult<String> {
		let plaintext = self.plaintext()?;
		let mac = compute_mac(key, &plaintext)?;
		let value = format!("{plaintext},hmac={}", URL_SAFE_NO_PAD.encode(mac));
		if value.len() > MAX_TAG_LEN {
			return Err(AuthError::bad_request(format!(
				"role tag is {} bytes; the limit is {MAX_TAG_LEN}",
				value.len()
			)));
		}
		Ok(value)
	}

	/// Parse `value` and check its MAC against `key`.
	pub fn verify(value: &str, key: &SecretBytes) -> AuthResult<Self> {
		let (tag, mac) = parse(value)?;
		if tag.version != TAG_VERSION {
			return Err(AuthError::InvalidTag(format!(
				"unsupported version {:?}",
				tag.version
			)));
		}
		let plaintext = tag
			.plaintext()
			.map_err(|e| AuthError::InvalidTag(e.to_string()))?;
		let mut verifier = HmacSha256::new_from_slice(key.expose())
			.map_err(|e| AuthError::internal(format!("invalid hmac key: {e}")))?;
		verifier.update(plaintext.as_bytes());
		verifier
			.verify_slice(&mac)
			.map_err(|_| AuthError::InvalidTag("hmac mismatch".to_string()))?;
		Ok(tag)
	}

	/// Role named by the tag, read without verifying the MAC.
	///
	/// Only for locating the key to verify with.
	pub fn unverified_role(value: &str) -> AuthResult<String> {
		parse(value).map(|(tag, _)| tag.role)
	}

	fn plaintext(&self) -> AuthResult<String> {
		if self.version.is_empty() {
			return Err(AuthError::bad_request("missing tag version"));
		}
		if self.nonce.is_empty() {
			return Err(AuthError::bad_request("missing tag nonce"));
		}
		if self.role.is_empty() {
			return Err(AuthError::bad_request("missing role name"));
		}
		for (field, value) in [("role", self.role.as_str()), ("instance_id", &self.instance_id)] {
			if value.contains(RESERVED) {
				return Err(AuthError::bad_request(format!(
					"{field} cannot be encoded in a role tag"
				)));
			}
		}
		if self.policies.iter().any(|p| p.is_empty() || p.contains(RESERVED)) {
			return Err(AuthError::bad_request("policy names cannot be encoded in a role tag"));
		}

		let mut out = format!(
			"{}:{},r={},d={},m={},p={}",
			self.version,
			self.nonce,
			self.role,
			flag(self.disallow_reauthentication),
			flag(self.allow_instance_migration),
			self.policies.join("+"),
		);
		if !self.instance_id.is_empty() {
			out.push_str(",i=");
			out.push_str(&self.instance_id);
		}
		if !self.max_ttl.is_zero() {
			out.push_str(&format!(",t={}", self.max_ttl.as_secs()));
		}
		Ok(out)
	}
}

fn flag(value: bool) -> &'static str {
	if value {
		"1"
	} else {
		"0"
	}
}

fn compute_mac(key: &SecretBytes, plaintext: &str) -> AuthResult<Vec<u8>> {
	let mut mac = HmacSha256::new_from_slice(key.expose())
		.map_err(|e| AuthError::internal(format!("invalid hmac key: {e}")))?;
	mac.update(plaintext.as_bytes());
	Ok(mac.finalize().into_bytes().to_vec())
}

fn invalid(reason: impl Into<String>) -> AuthError {
	AuthError::InvalidTag(reason.into())
}

fn parse_flag(value: &str) -> AuthResult<bool> {
	match value {
		"0" => Ok(false),
		"1" => Ok(true),
		other => Err(invalid(format!("invalid flag {other:?}"))),
	}
}

fn parse(value: &str) -> AuthResult<(RoleTag, Vec<u8>)> {
	if value.len() > MAX_TAG_LEN {
		return Err(invalid("tag is too long"));
	}
	let (version, rest) = value
		.split_once(':')
		.ok_or_else(|| invalid("missing version"))?;
	if version.is_empty() {
		return Err(invalid("missing version"));
	}
	let mut parts = rest.split(',');
	let nonce = parts.next().unwrap_or_default();
	if nonce.is_empty() || nonce.contains('=') {
		return Err(invalid("missing nonce"));
	}

	let mut tag = RoleTag {
		version: version.to_string(),
		nonce: nonce.to_string(),
		role: String::new(),
		policies: Vec::new(),
		max_ttl: Duration::ZERO,
		instance_id: String::new(),
		disallow_reauthentication: false,
		allow_instance_migration: false,
	};
	let mut mac = None;
	let mut seen = Vec::new();

	for part in parts {
		let (key, val) = part
			.split_once('=')
			.ok_or_else(|| invalid(format!("malformed field {part:?}")))?;
		if seen.contains(&key) {
			return Err(invalid(format!("duplicate field {key:?}")));
		}
		seen.push(key);
		match key {
			"r" => tag.role = val.to_string(),
			"d" => tag.disallow_reauthentication = parse_flag(val)?,
			"m" => tag.allow_instance_migration = parse_flag(val)?,
			"p" => {
				tag.policies = if val.is_empty() {
					Vec::new()
				} else {
					val.split('+').map(str::to_string).collect()
				}
			}
			"i" if !val.is_empty() => tag.instance_id = val.to_string(),
			"t" => {
				if val.is_empty() || val.starts_with('0') || !val.bytes().all(|b| b.is_ascii_digit()) {
					return Err(invalid("invalid max_ttl"));
				}
				let secs: u64 = val.parse().map_err(|_| invalid("invalid max_ttl"))?;
				tag.max_ttl = Duration::from_secs(secs);
			}
			"hmac" => {
				mac = Some(
					URL_SAFE_NO_PAD
						.decode(val)
						.map_err(|_| invalid("malformed hmac"))?,
				)
			}
			other => return Err(invalid(format!("unknown field {other:?}"))),
		}
	}

	if tag.role.is_empty() {
		return Err(invalid("missing role"));
	}
	for required in ["d", "m", "p"] {
		if !seen.contains(&required) {
			return Err(invalid(format!("missing field {required:?}")));
		}
	}
	let mac = mac.ok_or_else(|| invalid("missing hmac"))?;
	Ok((tag, mac))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key() -> SecretBytes {
		SecretBytes::new(vec![7u8; 32])
	}

	fn sample() -> RoleTag {
		let mut tag = RoleTag::new("web");
		tag.policies = vec!["dev".to_string(), "ops".to_string()];
		tag.instance_id = "i-0123456789abcdef0".to_string();
		tag.max_ttl = Duration::from_secs(3600);
		tag.disallow_reauthentication = true;
		tag
	}

	#[test]
	fn sealed_tag_verifies() {
		let tag = sample();
		let value = tag.seal(&key()).unwrap();
		assert!(value.len() <= MAX_TAG_LEN);
		assert!(!value.contains('/'));
		assert_eq!(RoleTag::verify(&value, &key()).unwrap(), tag);
	}

	#[test]
	fn minimal_tag_omits_optional_fields() {
		let tag = RoleTag::new("web");
		let value = tag.seal(&key()).unwrap();
		assert!(value.starts_with("v1:"));
		assert!(value.contains(",r=web,d=0,m=0,p=,hmac="));
		assert!(!value.contains(",i="));
		assert!(!value.contains(",t="));
	}

	#[test]
	fn field_order_is_irrelevant() {
		let tag = sample();
		let value = tag.seal(&key()).unwrap();
		let (head, mac) = value.split_once(",hmac=").unwrap();
		let mut fields: Vec<&str> = head.split(',').collect();
		let prefix = fields.remove(0);
		fields.reverse();
		let reordered = format!("hmac={mac},{}", fields.join(","));
		let reordered = format!("{prefix},{reordered}");
		assert_eq!(RoleTag::verify(&reordered, &key()).unwrap(), tag);
	}

	#[test]
	fn wrong_key_is_rejected() {
		let value = sample().seal(&key()).unwrap();
		let other = SecretBytes::new(vec![8u8; 32]);
		assert!(matches!(
			RoleTag::verify(&value, &other),
			Err(AuthError::InvalidTag(_))
		));
	}

	#[test]
	fn altered_policies_are_rejected() {
		let value = sample().seal(&key()).unwrap();
		let forged = value.replace("p=dev+ops", "p=dev+root");
		assert!(matches!(
			RoleTag::verify(&forged, &key()),
			Err(AuthError::InvalidTag(_))
		));
	}

	#[test]
	fn missing_fields_are_rejected() {
		let value = sample().seal(&key()).unwrap();
		let no_role = value.replace("r=web,", "");
		assert!(matches!(
			RoleTag::verify(&no_role, &key()),
			Err(AuthError::InvalidTag(_))
		));
		let no_version = value.trim_start_matches("v1:");
		assert!(RoleTag::verify(no_version, &key()).is_err());
		let (head, _) = value.split_once(",hmac=").unwrap();
		assert!(matches!(
			RoleTag::verify(head, &key()),
			Err(AuthError::InvalidTag(_))
		));
	}

	#[test]
	fn seal_requires_nonce_and_role() {
		let mut tag = RoleTag::new("web");
		tag.nonce.clear();
		assert!(matches!(tag.seal(&key()), Err(AuthError::BadRequest(_))));
		let mut tag = RoleTag::new("");
		tag.role.clear();
		assert!(matches!(tag.seal(&key()), Err(AuthError::BadRequest(_))));
	}

	#[test]
	fn oversized_tag_is_refused() {
		let mut tag = RoleTag::new("web");
		tag.policies = (0..20).map(|i| format!("policy-{i}")).collect();
		assert!(matches!(tag.seal(&key()), Err(AuthError::BadRequest(_))));
	}

	#[test]
	fn reserved_characters_are_refused() {
		let mut tag = RoleTag::new("web");
		tag.policies = vec!["a,b".to_string()];
		assert!(tag.seal(&key()).is_err());
	}

	#[test]
	fn unverified_role_reads_role_field() {
		let value = sample().seal(&key()).unwrap();
		assert_eq!(RoleTag::unverified_role(&value).unwrap(), "web");
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	fn key() -> SecretBytes {
		SecretBytes::new(vec![42u8; 32])
	}

	proptest! {
		#[test]
		fn any_single_bit_flip_fails_verification(
			role in "[a-z][a-z0-9-]{0,10}",
			policies in proptest::collection::vec("[a-z]{1,6}", 0..3),
			ttl in 0u64..100_000,
			dra in any::<bool>(),
			position in any::<proptest::sample::Index>(),
			bit in 0u8..8,
		) {
			let mut tag = RoleTag::new(role);
			tag.policies = policies;
			tag.max_ttl = Duration::from_secs(ttl);
			tag.disallow_reauthentication = dra;
			let value = tag.seal(&key()).unwrap();

			let mut bytes = value.into_bytes();
			let i = position.index(bytes.len());
			bytes[i] ^= 1 << bit;
			if let Ok(mutated) = String::from_utf8(bytes) {
				prop_assert!(RoleTag::verify(&mutated, &key()).is_err());
			}
		}

		#[test]
		fn tags_do_not_verify_under_another_key(
			sealing in proptest::collection::vec(any::<u8>(), 32),
			other in proptest::collection::vec(any::<u8>(), 32),
			role in "[a-z][a-z0-9-]{0,6}",
			policies in proptest::collection::vec("[a-z]{1,4}", 0..3),
			instance_id in proptest::option::of("i-[0-9a-f]{8}"),
			ttl in 0u64..100_000,
			migration in any::<bool>(),
		) {
			prop_assume!(sealing != other);
			let mut tag = RoleTag::new(role);
			tag.policies = policies;
			tag.instance_id = instance_id.unwrap_or_default();
			tag.max_ttl = Duration::from_secs(ttl);
			tag.allow_instance_migration = migration;
			let value = tag.seal(&SecretBytes::new(sealing.clone())).unwrap();

			prop_assert!(RoleTag::verify(&value, &SecretBytes::new(sealing)).is_ok());
			prop_assert!(matches!(
				RoleTag::verify(&value, &SecretBytes::new(other)),
				Err(AuthError::InvalidTag(_))
			));
		}

		#[test]
		fn sealed_tags_round_trip(
			role in "[a-z][a-z0-9-]{0,10}",
			migration in any::<bool>(),
		) {
			let mut tag = RoleTag::new(role);
			tag.allow_instance_migration = migration;
			let value = tag.seal(&key()).unwrap();
			prop_assert_eq!(RoleTag::verify(&value, &key()).unwrap(), tag);
		}
	}
}
