// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AWS Signature Version 4 request signing.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use keyward_server_auth::{AuthError, AuthResult};
use sha2::{Digest, Sha256};
use url::Url;

use crate::credentials::Credentials;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// A request to be signed. `headers` must not include `host` or `x-amz-date`.
pub struct SignableRequest<'a> {
	pub method: &'a str,
	pub url: &'a Url,
	pub headers: &'a [(&'a str, &'a str)],
	pub body: &'a [u8],
}

/// Headers to add to the request: `x-amz-date`, the session token if any, and `authorization`.
pub fn sign(
	request: &SignableRequest<'_>,
	credentials: &Credentials,
	region: &str,
	service: &str,
	now: DateTime<Utc>,
) -> AuthResult<Vec<(String, String)>> {
	let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
	let date = now.format("%Y%m%d").to_string();

	let host = host_header(request.url)?;
	let mut headers: Vec<(String, String)> = request
		.headers
		.iter()
		.map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
		.collect();
	headers.push(("host".to_string(), host));
	headers.push(("x-amz-date".to_string(), amz_date.clone()));
	if let Some(token) = &credentials.session_token {
		headers.push(("x-amz-security-token".to_string(), token.clone()));
	}
	headers.sort();

	let canonical_headers: String = headers
		.iter()
		.map(|(k, v)| format!("{k}:{v}\n"))
		.collect();
	let signed_headers = headers
		.iter()
		.map(|(k, _)| k.as_str())
		.collect::<Vec<_>>()
		.join(";");

	let path = if request.url.path().is_empty() {
		"/"
	} else {
		request.url.path()
	};
	let canonical_request = format!(
		"{}\n{}\n{}\n{}\n{}\n{}",
		request.method,
		path,
		canonical_query(request.url),
		canonical_headers,
		signed_headers,
		hex::encode(Sha256::digest(request.body)),
	);

	let scope = format!("{date}/{region}/{service}/aws4_request");
	let string_to_sign = format!(
		"{ALGORITHM}\n{amz_date}\n{scope}\n{}",
		hex::encode(Sha256::digest(canonical_request.as_bytes()))
	);

	let secret = format!("AWS4{}", credentials.secret_access_key.expose());
	let k_date = hmac(secret.as_bytes(), date.as_bytes())?;
	let k_region = hmac(&k_date, region.as_bytes())?;
	let k_service = hmac(&k_region, service.as_bytes())?;
	let k_signing = hmac(&k_service, b"aws4_request")?;
	let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?);

	let mut out = vec![("x-amz-date".to_string(), amz_date)];
	if let Some(token) = &credentials.session_token {
		out.push(("x-amz-security-token".to_string(), token.clone()));
	}
	out.push((
		"authorization".to_string(),
		format!(
			"{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
			credentials.access_key_id
		),
	));
	Ok(out)
}

/// Region named in the credential scope of a SigV4 `Authorization` header.
pub fn region_from_authorization(authorization: &str) -> Option<&str> {
	let credential = authorization
		.split([' ', ','])
		.find_map(|part| part.strip_prefix("Credential="))?;
	let mut scope = credential.split('/');
	scope.nth(2).filter(|r| !r.is_empty())
}

fn host_header(url: &Url) -> AuthResult<String> {
	let host = url
		.host_str()
		.ok_or_else(|| AuthError::internal(format!("url {url} has no host")))?;
	Ok(match url.port() {
		Some(port) => format!("{host}:{port}"),
		None => host.to_string(),
	})
}

fn canonical_query(url: &Url) -> String {
	let mut pairs: Vec<(String, String)> = url
		.query_pairs()
		.map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
		.collect();
	pairs.sort();
	pairs
		.iter()
		.map(|(k, v)| format!("{k}={v}"))
		.collect::<Vec<_>>()
		.join("&")
}

fn uri_encode(value: &str) -> String {
	let mut out = String::with_capacity(value.len());
	for byte in value.bytes() {
		match byte {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
				out.push(byte as char)
			}
			other => out.push_str(&format!("%{other:02X}")),
		}
	}
	out
}

fn hmac(key: &[u8], data: &[u8]) -> AuthResult<Vec<u8>> {
	let mut mac = HmacSha256::new_from_slice(key)
		.map_err(|e| AuthError::internal(format!("invalid signing key: {e}")))?;
	mac.update(data);
	Ok(mac.finalize().into_bytes().to_vec())
}
