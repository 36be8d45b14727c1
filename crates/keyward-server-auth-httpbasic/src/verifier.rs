// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use keyward_common_secret::SecretString;
use keyward_server_auth::{AuthError, AuthResult};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Per-attempt bound on the delegated check.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// GET `url` with Basic credentials. Only `200 OK` accepts; the body is ignored.
#[tracing::instrument(skip(http, password), name = "httpbasic::verify")]
pub async fn verify(http: &reqwest::Client, url: &str, username: &str, password: &SecretString) -> AuthResult<()> {
	let response = http
		.get(url)
		.basic_auth(username, Some(password.expose()))
		.timeout(ATTEMPT_TIMEOUT)
		.send()
		.await
		.map_err(|e| {
			if e.is_timeout() {
				AuthError::upstream("http", "authentication endpoint timed out")
			} else {
				AuthError::upstream("http", format!("authentication endpoint unreachable: {e}"))
			}
		})?;

	let status = response.status();
	debug!(%status, "authentication endpoint replied");
	if status == StatusCode::OK {
		Ok(())
	} else {
		Err(AuthError::verification("authentication failed"))
	}
}
