// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared HTTP client with a consistent User-Agent and bounded timeouts.
//!
//! Every upstream call made by a verifier (STS, EC2/IAM, Chef, OIDC, ARM,
//! HTTP Basic) goes through a client built here, so each call carries a
//! timeout even when the caller forgets to set one.

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

/// Applied to every client unless the caller overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for establishing a TCP/TLS connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates a client builder with the keyward User-Agent and default timeouts.
///
/// ```ignore
/// let client = keyward_common_http::builder()
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder {
	Client::builder()
		.user_agent(user_agent())
		.timeout(DEFAULT_TIMEOUT)
		.connect_timeout(CONNECT_TIMEOUT)
}

/// Creates a client with a per-request timeout.
pub fn new_client_with_timeout(timeout: Duration) -> reqwest::Result<Client> {
	tracing::trace!(timeout_ms = timeout.as_millis() as u64, "building HTTP client");
	builder().timeout(timeout).build()
}

/// Creates a client with the default timeout.
pub fn new_client() -> reqwest::Result<Client> {
	builder().build()
}

/// Returns the keyward User-Agent string: `keyward/{version}`.
pub fn user_agent() -> String {
	format!("keyward/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{header, method};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	#[test]
	fn user_agent_has_correct_format() {
		let ua = user_agent();
		let parts: Vec<&str> = ua.split('/').collect();
		assert_eq!(parts.len(), 2);
		assert_eq!(parts[0], "keyward");
	}

	#[tokio::test]
	async fn requests_carry_user_agent() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(header("user-agent", user_agent().as_str()))
			.respond_with(ResponseTemplate::new(204))
			.expect(1)
			.mount(&server)
			.await;

		let client = new_client().unwrap();
		let response = client.get(server.uri()).send().await.unwrap();
		assert_eq!(response.status().as_u16(), 204);
	}

	#[tokio::test]
	async fn timeout_is_enforced() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
			.mount(&server)
			.await;

		let client = new_client_with_timeout(Duration::from_millis(50)).unwrap();
		let err = client.get(server.uri()).send().await.unwrap_err();
		assert!(err.is_timeout());
	}
}
