// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use keyward_server_auth::fields::{duration_secs, opt_duration, opt_string_list};
use keyward_server_auth::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

pub const CONFIG_KEY: &str = "config";
pub const DEFAULT_PORT: u16 = 1812;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_NAS_PORT: u32 = 10;

fn default_port() -> u16 {
	DEFAULT_PORT
}

fn default_timeout() -> Duration {
	DEFAULT_TIMEOUT
}

fn default_nas_port() -> u32 {
	DEFAULT_NAS_PORT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadiusConfig {
	pub host: String,
	#[serde(default = "default_port")]
	pub port: u16,
	/// Shared secret. Never returned on read.
	pub secret: String,
	/// Policies granted to users with no `users/<name>` entry. Empty means
	/// unregistered users are refused.
	#[serde(default)]
	pub unregistered_user_policies: Vec<String>,
	#[serde(default = "default_timeout", with = "duration_secs")]
	pub dial_timeout: Duration,
	#[serde(default = "default_timeout", with = "duration_secs")]
	pub read_timeout: Duration,
	#[serde(default = "default_nas_port")]
	pub nas_port: u32,
}

impl Default for RadiusConfig {
	fn default() -> Self {
		Self {
			host: String::new(),
			port: DEFAULT_PORT,
			secret: String::new(),
			unregistered_user_policies: Vec::new(),
			dial_timeout: DEFAULT_TIMEOUT,
			read_timeout: DEFAULT_TIMEOUT,
			nas_port: DEFAULT_NAS_PORT,
		}
	}
}

impl RadiusConfig {
	pub fn address(&self) -> String {
		if self.host.contains(':') && !self.host.starts_with('[') {
			format!("[{}]:{}", self.host, self.port)
		} else {
			format!("{}:{}", self.host, self.port)
		}
	}

	pub fn to_response(&self) -> Map<String, Value> {
		let mut map = Map::new();
		map.insert("host".into(), Value::String(self.host.clone()));
		map.insert("port".into(), Value::from(self.port));
		map.insert(
			"unregistered_user_policies".into(),
			Value::from(self.unregistered_user_policies.clone()),
		);
		map.insert("dial_timeout".into(), Value::from(self.dial_timeout.as_secs()));
		map.insert("read_timeout".into(), Value::from(self.read_timeout.as_secs()));
		map.insert("nas_port".into(), Value::from(self.nas_port));
		map
	}
}

#[derive(Debug, Default, Deserialize)]
pub struct RadiusConfigInput {
	pub host: Option<String>,
	pub port: Option<u16>,
	pub secret: Option<String>,
	#[serde(default, deserialize_with = "opt_string_list::deserialize")]
	pub unregistered_user_policies: Option<Vec<String>>,
	#[serde(default, with = "opt_duration")]
	pub dial_timeout: Option<Duration>,
	#[serde(default, with = "opt_duration")]
	pub read_timeout: Option<Duration>,
	pub nas_port: Option<u32>,
}

impl RadiusConfigInput {
	pub fn apply(self, config: &mut RadiusConfig) -> AuthResult<()> {
		if let Some(v) = self.host {
			config.host = v.trim().to_string();
		}
		if let Some(v) = self.port {
			config.port = v;
		}
		if let Some(v) = self.secret {
			config.secret = v;
		}
		if let Some(v) = self.unregistered_user_policies {
			config.unregistered_user_policies = v.into_iter().map(|p| p.to_lowercase()).collect();
		}
		if let Some(v) = self.dial_timeout {
			config.dial_timeout = v;
		}
		if let Some(v) = self.read_timeout {
			config.read_timeout = v;
		}
		if let Some(v) = self.nas_port {
			config.nas_port = v;
		}

		if config.host.is_empty() {
			return Err(AuthError::bad_request("host is required"));
		}
		if config.secret.is_empty() {
			return Err(AuthError::bad_request("secret is required"));
		}
		if config.port == 0 {
			return Err(AuthError::bad_request("port must be non-zero"));
		}
		if config.dial_timeout.is_zero() {
			config.dial_timeout = DEFAULT_TIMEOUT;
		}
		if config.read_timeout.is_zero() {
			config.read_timeout = DEFAULT_TIMEOUT;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn apply_fills_defaults_and_validates() {
		let mut config = RadiusConfig::default();
		let input: RadiusConfigInput = serde_json::from_value(json!({
			"host": "radius.internal",
			"secret": "s3cret",
			"unregistered_user_policies": "Dev, ops",
			"read_timeout": "3s",
		}))
		.unwrap();
		input.apply(&mut config).unwrap();
		assert_eq!(config.port, 1812);
		assert_eq!(config.dial_timeout, Duration::from_secs(10));
		assert_eq!(config.read_timeout, Duration::from_secs(3));
		assert_eq!(config.unregistered_user_policies, vec!["dev", "ops"]);
		assert!(!config.to_response().contains_key("secret"));

		let mut empty = RadiusConfig::default();
		assert!(RadiusConfigInput::default().apply(&mut empty).is_err());
	}

	#[test]
	fn ipv6_hosts_are_bracketed() {
		let config = RadiusConfig {
			host: "::1".into(),
			..RadiusConfig::default()
		};
		assert_eq!(config.address(), "[::1]:1812");
	}
}
