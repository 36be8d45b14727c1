// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use keyward_common_secret::SecretString;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use crate::codec::{self, attr, Code, Packet, MAX_PACKET_LEN};
use crate::config::RadiusConfig;
use crate::error::{RadiusError, RadiusResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Accepted,
	Rejected,
	/// Access-Challenge; multi-round authentication is not supported.
	Challenged,
}

/// Sends one Access-Request and waits for the matching reply.
#[tracing::instrument(skip(config, password), fields(host = %config.host), name = "radius::authenticate")]
pub async fn authenticate(config: &RadiusConfig, username: &str, password: &SecretString) -> RadiusResult<Outcome> {
	let address = config.address();
	let socket = timeout(config.dial_timeout, connect(&address))
		.await
		.map_err(|_| RadiusError::DialTimeout(address.clone()))??;

	let secret = config.secret.as_bytes();
	let mut request = Packet::access_request(rand::random());
	request.push(attr::USER_NAME, username.as_bytes());
	request.push(
		attr::USER_PASSWORD,
		codec::hide_password(password.expose().as_bytes(), secret, &request.authenticator)?,
	);
	request.push(attr::NAS_PORT, config.nas_port.to_be_bytes().to_vec());
	socket.send(&request.encode()?).await?;

	let mut buf = vec![0u8; MAX_PACKET_LEN];
	let len = timeout(config.read_timeout, socket.recv(&mut buf))
		.await
		.map_err(|_| RadiusError::ReadTimeout)??;
	let bytes = &buf[..len];

	let reply = Packet::decode(bytes)?;
	if reply.identifier != request.identifier {
		return Err(RadiusError::IdentifierMismatch);
	}
	let expected = codec::response_authenticator(bytes, &request.authenticator, secret)?;
	if expected != reply.authenticator {
		return Err(RadiusError::BadAuthenticator);
	}
	debug!(code = ?reply.code, "radius reply");

	match reply.code {
		Code::AccessAccept => Ok(Outcome::Accepted),
		Code::AccessChallenge => Ok(Outcome::Challenged),
		Code::AccessReject => Ok(Outcome::Rejected),
		_ => Err(RadiusError::Malformed("unexpected reply code")),
	}
}

async fn connect(address: &str) -> RadiusResult<UdpSocket> {
	let mut last = None;
	for target in lookup_host(address).await? {
		let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
		let socket = UdpSocket::bind(local).await?;
		match socket.connect(target).await {
			Ok(()) => return Ok(socket),
			Err(e) => last = Some(e),
		}
	}
	Err(last
		.map(RadiusError::Io)
		.unwrap_or_else(|| RadiusError::DialTimeout(address.to_string())))
}
