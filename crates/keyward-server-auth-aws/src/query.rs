// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Signed calls to AWS query-protocol APIs (EC2, IAM, STS).

use chrono::Utc;
use keyward_server_auth::{AuthError, AuthResult};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::credentials::Credentials;
use crate::sigv4::{self, SignableRequest};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// Error bodies are truncated to this many bytes in messages.
const MAX_ERROR_BODY: usize = 512;

/// An endpoint together with the region and service it signs for.
#[derive(Debug, Clone)]
pub struct QueryTarget {
	pub endpoint: Url,
	pub region: String,
	pub service: &'static str,
}

impl QueryTarget {
	pub fn new(endpoint: Url, region: impl Into<String>, service: &'static str) -> Self {
		Self {
			endpoint,
			region: region.into(),
			service,
		}
	}
}

/// POST `params` as a signed form and return the response body.
pub async fn call(
	http: &reqwest::Client,
	target: &QueryTarget,
	credentials: &Credentials,
	params: &[(&str, &str)],
) -> AuthResult<String> {
	let body = url::form_urlencoded::Serializer::new(String::new())
		.extend_pairs(params)
		.finish();
	let request = SignableRequest {
		method: "POST",
		url: &target.endpoint,
		headers: &[("content-type", FORM_CONTENT_TYPE)],
		body: body.as_bytes(),
	};
	let signed = sigv4::sign(
		&request,
		credentials,
		&target.region,
		target.service,
		Utc::now(),
	)?;

	let mut builder = http
		.post(target.endpoint.clone())
		.header(reqwest::header::CONTENT_TYPE, FORM_CONTENT_TYPE);
	for (name, value) in &signed {
		builder = builder.header(name.as_str(), value.as_str());
	}

	let response = builder
		.body(body)
		.send()
		.await
		.map_err(|e| AuthError::upstream(target.service, e.to_string()))?;
	let status = response.status();
	let text = response
		.text()
		.await
		.map_err(|e| AuthError::upstream(target.service, e.to_string()))?;
	if !status.is_success() {
		debug!(service = target.service, %status, "query api call failed");
		return Err(AuthError::upstream(
			target.service,
			format!("{status}: {}", truncate(&text)),
		));
	}
	Ok(text)
}

/// Decode an XML response body.
pub fn parse_xml<T: DeserializeOwned>(service: &str, body: &str) -> AuthResult<T> {
	quick_xml::de::from_str(body)
		.map_err(|e| AuthError::upstream(service, format!("error parsing response: {e}")))
}

pub fn truncate(text: &str) -> &str {
	if text.len() <= MAX_ERROR_BODY {
		return text;
	}
	let mut end = MAX_ERROR_BODY;
	while !text.is_char_boundary(end) {
		end -= 1;
	}
	&text[..end]
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Deserialize;
	use wiremock::matchers::{body_string, header_exists, method};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	#[derive(Debug, Deserialize)]
	struct Echo {
		#[serde(rename = "Value")]
		value: String,
	}

	#[tokio::test]
	async fn posts_signed_form() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(header_exists("authorization"))
			.and(header_exists("x-amz-date"))
			.and(body_string("Action=Test&Version=1"))
			.respond_with(ResponseTemplate::new(200).set_body_string("<Echo><Value>ok</Value></Echo>"))
			.mount(&server)
			.await;

		let target = QueryTarget::new(Url::parse(&server.uri()).unwrap(), "us-east-1", "sts");
		let body = call(
			&reqwest::Client::new(),
			&target,
			&Credentials::new("AKID", "secret"),
			&[("Action", "Test"), ("Version", "1")],
		)
		.await
		.unwrap();
		let echo: Echo = parse_xml("sts", &body).unwrap();
		assert_eq!(echo.value, "ok");
	}

	#[tokio::test]
	async fn error_status_is_upstream() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(403).set_body_string("<Error>denied</Error>"))
			.mount(&server)
			.await;

		let target = QueryTarget::new(Url::parse(&server.uri()).unwrap(), "us-east-1", "ec2");
		let err = call(
			&reqwest::Client::new(),
			&target,
			&Credentials::new("AKID", "secret"),
			&[("Action", "Test")],
		)
		.await
		.unwrap_err();
		match err {
			AuthError::Upstream { service, message } => {
				assert_eq!(service, "ec2");
				assert!(message.contains("denied"));
			}
			other => panic!("unexpected error {other:?}"),
		}
	}

	#[test]
	fn truncate_respects_char_boundaries() {
		let long = "é".repeat(400);
		assert!(truncate(&long).len() <= MAX_ERROR_BODY);
	}
}
