// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use keyward_server_auth::fields::opt_string_list;
use keyward_server_auth::{policy, AuthError, AuthResult};
use serde::{Deserialize, Serialize};

pub const CONFIG_KEY: &str = "config";

/// Endpoint that vouches for a username/password pair, and the policies
/// every accepted user receives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpBasicConfig {
	pub url: String,
	#[serde(default)]
	pub policies: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HttpBasicConfigInput {
	pub url: Option<String>,
	#[serde(default, deserialize_with = "opt_string_list::deserialize")]
	pub policies: Option<Vec<String>>,
}

impl HttpBasicConfigInput {
	pub fn apply(self, config: &mut HttpBasicConfig) -> AuthResult<()> {
		if let Some(url) = self.url {
			config.url = url.trim().to_string();
		}
		if let Some(policies) = self.policies {
			config.policies = policy::sanitize(policies);
		}
		if config.url.is_empty() {
			return Err(AuthError::bad_request("url is required"));
		}
		let parsed = url::Url::parse(&config.url)
			.map_err(|e| AuthError::bad_request(format!("invalid url: {e}")))?;
		if !matches!(parsed.scheme(), "http" | "https") {
			return Err(AuthError::bad_request("url must be http or https"));
		}
		Ok(())
	}
}
