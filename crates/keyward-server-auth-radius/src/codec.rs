// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! RADIUS packet codec (RFC 2865), limited to what Access-Request needs.

use openssl::hash::{hash, MessageDigest};

use crate::error::{RadiusError, RadiusResult};

pub const HEADER_LEN: usize = 20;
pub const MAX_PACKET_LEN: usize = 4096;
pub const MAX_PASSWORD_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
	AccessRequest,
	AccessAccept,
	AccessReject,
	AccessChallenge,
	Other(u8),
}

impl From<u8> for Code {
	fn from(value: u8) -> Self {
		match value {
			1 => Code::AccessRequest,
			2 => Code::AccessAccept,
			3 => Code::AccessReject,
			11 => Code::AccessChallenge,
			other => Code::Other(other),
		}
	}
}

impl From<Code> for u8 {
	fn from(code: Code) -> Self {
		match code {
			Code::AccessRequest => 1,
			Code::AccessAccept => 2,
			Code::AccessReject => 3,
			Code::AccessChallenge => 11,
			Code::Other(other) => other,
		}
	}
}

pub mod attr {
	pub const USER_NAME: u8 = 1;
	pub const USER_PASSWORD: u8 = 2;
	pub const NAS_PORT: u8 = 5;
	pub const NAS_IDENTIFIER: u8 = 32;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
	pub code: Code,
	pub identifier: u8,
	pub authenticator: [u8; 16],
	pub attributes: Vec<(u8, Vec<u8>)>,
}

impl Packet {
	/// An Access-Request with a random authenticator.
	pub fn access_request(identifier: u8) -> Self {
		Self {
			code: Code::AccessRequest,
			identifier,
			authenticator: rand::random(),
			attributes: Vec::new(),
		}
	}

	pub fn attribute(&self, kind: u8) -> Option<&[u8]> {
		self.attributes
			.iter()
			.find(|(k, _)| *k == kind)
			.map(|(_, v)| v.as_slice())
	}

	pub fn push(&mut self, kind: u8, value: impl Into<Vec<u8>>) {
		self.attributes.push((kind, value.into()));
	}

	pub fn encode(&self) -> RadiusResult<Vec<u8>> {
		let mut body = Vec::new();
		for (kind, value) in &self.attributes {
			if value.len() > 253 {
				return Err(RadiusError::Malformed("attribute longer than 253 bytes"));
			}
			body.push(*kind);
			body.push((value.len() + 2) as u8);
			body.extend_from_slice(value);
		}
		let len = HEADER_LEN + body.len();
		if len > MAX_PACKET_LEN {
			return Err(RadiusError::Malformed("packet too long"));
		}
		let mut out = Vec::with_capacity(len);
		out.push(self.code.into());
		out.push(self.identifier);
		out.extend_from_slice(&(len as u16).to_be_bytes());
		out.extend_from_slice(&self.authenticator);
		out.extend_from_slice(&body);
		Ok(out)
	}

	pub fn decode(bytes: &[u8]) -> RadiusResult<Self> {
		if bytes.len() < HEADER_LEN {
			return Err(RadiusError::Malformed("shorter than header"));
		}
		let len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
		if !(HEADER_LEN..=MAX_PACKET_LEN).contains(&len) || len > bytes.len() {
			return Err(RadiusError::Malformed("bad length field"));
		}
		let mut authenticator = [0u8; 16];
		authenticator.copy_from_slice(&bytes[4..HEADER_LEN]);

		let mut attributes = Vec::new();
		let mut rest = &bytes[HEADER_LEN..len];
		while !rest.is_empty() {
			if rest.len() < 2 {
				return Err(RadiusError::Malformed("truncated attribute"));
			}
			let attr_len = rest[1] as usize;
			if attr_len < 2 || attr_len > rest.len() {
				return Err(RadiusError::Malformed("bad attribute length"));
			}
			attributes.push((rest[0], rest[2..attr_len].to_vec()));
			rest = &rest[attr_len..];
		}
		Ok(Self {
			code: Code::from(bytes[0]),
			identifier: bytes[1],
			authenticator,
			attributes,
		})
	}
}

fn md5(parts: &[&[u8]]) -> RadiusResult<[u8; 16]> {
	let joined: Vec<u8> = parts.concat();
	let digest = hash(MessageDigest::md5(), &joined)?;
	let mut out = [0u8; 16];
	out.copy_from_slice(&digest);
	Ok(out)
}

/// User-Password hiding: each 16-byte block is XORed with
/// MD5(secret + previous ciphertext block), starting from the authenticator.
pub fn hide_password(password: &[u8], secret: &[u8], authenticator: &[u8; 16]) -> RadiusResult<Vec<u8>> {
	if password.len() > MAX_PASSWORD_LEN {
		return Err(RadiusError::PasswordTooLong);
	}
	let padded_len = password.len().div_ceil(16).max(1) * 16;
	let mut padded = password.to_vec();
	padded.resize(padded_len, 0);

	let mut out = Vec::with_capacity(padded_len);
	let mut previous: Vec<u8> = authenticator.to_vec();
	for block in padded.chunks(16) {
		let key = md5(&[secret, &previous])?;
		let cipher: Vec<u8> = block.iter().zip(key.iter()).map(|(p, k)| p ^ k).collect();
		out.extend_from_slice(&cipher);
		previous = cipher;
	}
	Ok(out)
}

/// Inverse of [`hide_password`], with trailing padding removed.
pub fn unhide_password(hidden: &[u8], secret: &[u8], authenticator: &[u8; 16]) -> RadiusResult<Vec<u8>> {
	if hidden.is_empty() || hidden.len() % 16 != 0 || hidden.len() > MAX_PASSWORD_LEN {
		return Err(RadiusError::Malformed("bad User-Password length"));
	}
	let mut out = Vec::with_capacity(hidden.len());
	let mut previous: &[u8] = authenticator;
	for block in hidden.chunks(16) {
		let key = md5(&[secret, previous])?;
		out.extend(block.iter().zip(key.iter()).map(|(c, k)| c ^ k));
		previous = block;
	}
	while out.last() == Some(&0) {
		out.pop();
	}
	Ok(out)
}

/// MD5(Code + Identifier + Length + RequestAuth + Attributes + Secret).
///
/// Only the bytes covered by the Length field count; datagram padding after
/// them is ignored.
pub fn response_authenticator(
	response: &[u8],
	request_authenticator: &[u8; 16],
	secret: &[u8],
) -> RadiusResult<[u8; 16]> {
	if response.len() < HEADER_LEN {
		return Err(RadiusError::Malformed("shorter than header"));
	}
	let len = u16::from_be_bytes([response[2], response[3]]) as usize;
	if len < HEADER_LEN || len > response.len() {
		return Err(RadiusError::Malformed("bad length field"));
	}
	md5(&[&response[..4], request_authenticator, &response[HEADER_LEN..len], secret])
}

/// Encode a reply to `request`, computing its response authenticator.
pub fn encode_response(code: Code, request: &Packet, secret: &[u8]) -> RadiusResult<Vec<u8>> {
	let mut reply = Packet {
		code,
		identifier: request.identifier,
		authenticator: [0u8; 16],
		attributes: Vec::new(),
	}
	.encode()?;
	let auth = response_authenticator(&reply, &request.authenticator, secret)?;
	reply[4..HEADER_LEN].copy_from_slice(&auth);
	Ok(reply)
}


#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn password_hiding_inverts(
			password in proptest::collection::vec(1u8..=255, 1..=128),
			secret in proptest::collection::vec(any::<u8>(), 1..32),
			authenticator in any::<[u8; 16]>(),
		) {
			let hidden = hide_password(&password, &secret, &authenticator).unwrap();
			prop_assert_eq!(hidden.len() % 16, 0);
			prop_assert_eq!(unhide_password(&hidden, &secret, &authenticator).unwrap(), password);
		}

		#[test]
		fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
			let _ = Packet::decode(&bytes);
		}
	}
}
