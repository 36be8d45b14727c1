// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! IAM caller identity via a client-presigned `sts:GetCallerIdentity` request.
//!
//! The client signs the request with its own credentials and hands it over;
//! the server forwards it to STS unmodified and trusts the identity STS
//! returns. Only the exact request shape is accepted so the server cannot be
//! used to relay arbitrary signed calls. When a server ID header value is
//! configured, the client must have signed that header, which binds the
//! request to this server. Without it, any server trusting the same STS
//! account could replay a captured request.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use keyward_server_auth::{AuthError, AuthMethod, AuthResult, PrincipalClaim};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::arn::{EntityType, IamEntity};
use crate::config::IAM_SERVER_ID_HEADER;
use crate::query;
use crate::sigv4;

/// Headers a signed `GetCallerIdentity` request may carry.
const ALLOWED_HEADERS: &[&str] = &[
	"accept",
	"accept-encoding",
	"authorization",
	"content-length",
	"content-type",
	"host",
	"user-agent",
	"x-amz-content-sha256",
	"x-amz-date",
	"x-amz-security-token",
	"x-amz-user-agent",
];

/// A presigned request as supplied by the client.
#[derive(Debug, Clone)]
pub struct PresignedRequest {
	pub method: String,
	pub url: Url,
	pub body: String,
	/// Header names as sent; multi-valued headers already joined.
	pub headers: Vec<(String, String)>,
}

impl PresignedRequest {
	/// Build from login fields: base64 body and base64 JSON (or inline JSON) headers.
	pub fn from_login_fields(method: &str, url: &str, body_b64: &str, headers: &Value) -> AuthResult<Self> {
		let url = parse_url(url)?;
		let body = STANDARD
			.decode(body_b64.trim())
			.map_err(|_| AuthError::bad_request("request body must be base64"))?;
		let body = String::from_utf8(body)
			.map_err(|_| AuthError::bad_request("request body must be UTF-8"))?;
		Ok(Self {
			method: method.to_string(),
			url,
			body,
			headers: decode_headers(headers)?,
		})
	}

	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}
}

fn parse_url(raw: &str) -> AuthResult<Url> {
	if let Ok(url) = Url::parse(raw) {
		return Ok(url);
	}
	let decoded = STANDARD
		.decode(raw.trim())
		.ok()
		.and_then(|b| String::from_utf8(b).ok())
		.ok_or_else(|| AuthError::bad_request("invalid request url"))?;
	Url::parse(&decoded).map_err(|_| AuthError::bad_request("invalid request url"))
}

fn decode_headers(value: &Value) -> AuthResult<Vec<(String, String)>> {
	let parsed;
	let object = match value {
		Value::Object(map) => map,
		Value::String(encoded) => {
			let raw = STANDARD
				.decode(encoded.trim())
				.map_err(|_| AuthError::bad_request("request headers must be base64 JSON"))?;
			parsed = serde_json::from_slice::<Value>(&raw)
				.map_err(|_| AuthError::bad_request("request headers must be base64 JSON"))?;
			parsed
				.as_object()
				.ok_or_else(|| AuthError::bad_request("request headers must be a JSON object"))?
		}
		Value::Null => return Err(AuthError::bad_request("missing request headers")),
		_ => return Err(AuthError::bad_request("request headers must be a JSON object")),
	};

	let mut headers = Vec::with_capacity(object.len());
	for (name, value) in object {
		let joined = match value {
			Value::String(s) => s.clone(),
			Value::Array(items) => items
				.iter()
				.map(|v| {
					v.as_str()
						.map(str::to_string)
						.ok_or_else(|| AuthError::bad_request(format!("invalid value for header {name}")))
				})
				.collect::<AuthResult<Vec<_>>>()?
				.join(","),
			_ => return Err(AuthError::bad_request(format!("invalid value for header {name}"))),
		};
		headers.push((name.clone(), joined));
	}
	Ok(headers)
}

/// Identity reported by STS.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
	pub arn: String,
	pub user_id: String,
	pub account: String,
}

impl CallerIdentity {
	/// Parse the ARN, accepting only users and assumed roles.
	pub fn entity(&self) -> AuthResult<IamEntity> {
		let entity = IamEntity::parse(&self.arn)
			.map_err(|_| AuthError::verification("unrecognized caller arn"))?;
		match entity.entity_type {
			EntityType::User | EntityType::AssumedRole => Ok(entity),
			_ => Err(AuthError::verification("unsupported principal type")),
		}
	}

	pub fn to_claim(&self, entity: &IamEntity) -> PrincipalClaim {
		PrincipalClaim::new(AuthMethod::IamCallerIdentity, entity.canonical_arn())
			.with_candidate_role(&entity.friendly_name)
			.with_text("client_arn", &self.arn)
			.with_text("canonical_arn", entity.canonical_arn())
			.with_text("client_user_id", &self.user_id)
			.with_text("account_id", &self.account)
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetCallerIdentityResponse {
	get_caller_identity_result: CallerIdentity,
}

fn validate_shape(request: &PresignedRequest, server_id: Option<&str>) -> AuthResult<()> {
	if request.method != "POST" {
		return Err(AuthError::bad_request("invalid request method"));
	}
	let path = request.url.path();
	if !(path.is_empty() || path == "/") || request.url.query().is_some() {
		return Err(AuthError::bad_request("invalid request url"));
	}

	for (name, _) in &request.headers {
		let lower = name.to_ascii_lowercase();
		let pinned = lower.eq_ignore_ascii_case(IAM_SERVER_ID_HEADER);
		if !pinned && !ALLOWED_HEADERS.contains(&lower.as_str()) {
			return Err(AuthError::bad_request(format!("invalid request header: {name}")));
		}
	}

	let params: Vec<(String, String)> = url::form_urlencoded::parse(request.body.as_bytes())
		.into_owned()
		.collect();
	let actions: Vec<&str> = params
		.iter()
		.filter(|(k, _)| k == "Action")
		.map(|(_, v)| v.as_str())
		.collect();
	if actions != ["GetCallerIdentity"] {
		return Err(AuthError::bad_request("invalid request body"));
	}
	if params.iter().any(|(k, _)| k != "Action" && k != "Version") {
		return Err(AuthError::bad_request("invalid request body"));
	}

	if let Some(expected) = server_id.filter(|v| !v.is_empty()) {
		match request.header(IAM_SERVER_ID_HEADER) {
			Some(value) if value == expected => {}
			Some(_) => return Err(AuthError::verification("invalid server id header value")),
			None => return Err(AuthError::verification("missing server id header")),
		}
		let signed = request
			.header("authorization")
			.and_then(|auth| {
				auth.split([' ', ','])
					.find_map(|part| part.strip_prefix("SignedHeaders="))
			})
			.unwrap_or_default();
		let pinned = IAM_SERVER_ID_HEADER.to_ascii_lowercase();
		if !signed.split(';').any(|h| h == pinned) {
			return Err(AuthError::verification("server id header is not signed"));
		}
	}
	Ok(())
}

/// Forward `request` to STS and return the caller's identity.
#[tracing::instrument(skip_all, name = "sts::verify_caller_identity")]
pub async fn verify_caller_identity(
	http: &reqwest::Client,
	request: &PresignedRequest,
	endpoint: &Url,
	server_id: Option<&str>,
) -> AuthResult<CallerIdentity> {
	validate_shape(request, server_id)?;

	let host = request
		.url
		.host_str()
		.ok_or_else(|| AuthError::bad_request("invalid request url"))?;
	let host = match request.url.port() {
		Some(port) => format!("{host}:{port}"),
		None => host.to_string(),
	};

	let mut builder = http.post(endpoint.clone()).header(reqwest::header::HOST, host);
	for (name, value) in &request.headers {
		if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
			continue;
		}
		builder = builder.header(name.as_str(), value.as_str());
	}
	let response = builder
		.body(request.body.clone())
		.send()
		.await
		.map_err(|e| AuthError::upstream("sts", e.to_string()))?;
	let status = response.status();
	let text = response
		.text()
		.await
		.map_err(|e| AuthError::upstream("sts", e.to_string()))?;

	if status != reqwest::StatusCode::OK {
		warn!(%status, "sts rejected presigned request");
		return Err(AuthError::verification(format!(
			"sts rejected the request: {}",
			query::truncate(&text)
		)));
	}
	let parsed: GetCallerIdentityResponse = query::parse_xml("sts", &text)?;
	let identity = parsed.get_caller_identity_result;
	debug!(
		arn = %identity.arn,
		region = request
			.header("authorization")
			.and_then(sigv4::region_from_authorization)
			.unwrap_or("unknown"),
		"caller identity verified"
	);
	Ok(identity)
}
