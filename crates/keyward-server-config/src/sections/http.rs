// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Listener address.

use serde::Deserialize;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
	pub host: String,
	pub port: u16,
}

impl HttpConfig {
	/// `host:port`, with IPv6 literals bracketed.
	pub fn socket_addr(&self) -> String {
		if self.host.contains(':') {
			format!("[{}]:{}", self.host, self.port)
		} else {
			format!("{}:{}", self.host, self.port)
		}
	}
}

impl Default for HttpConfig {
	fn default() -> Self {
		Self {
			host: DEFAULT_HOST.to_string(),
			port: DEFAULT_PORT,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfigLayer {
	pub host: Option<String>,
	pub port: Option<u16>,
}

impl HttpConfigLayer {
	pub fn merge(&mut self, other: HttpConfigLayer) {
		self.host = other.host.or(self.host.take());
		self.port = other.port.or(self.port);
	}

	pub fn finalize(self) -> HttpConfig {
		let defaults = HttpConfig::default();
		HttpConfig {
			host: self
				.host
				.map(|h| h.trim().trim_start_matches('[').trim_end_matches(']').to_string())
				.filter(|h| !h.is_empty())
				.unwrap_or(defaults.host),
			port: self.port.unwrap_or(defaults.port),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults_and_partial_merge() {
		assert_eq!(HttpConfigLayer::default().finalize().socket_addr(), "127.0.0.1:8200");

		let mut base = HttpConfigLayer {
			host: Some("0.0.0.0".to_string()),
			port: Some(3000),
		};
		base.merge(HttpConfigLayer {
			host: None,
			port: Some(9000),
		});
		assert_eq!(base.finalize().socket_addr(), "0.0.0.0:9000");
	}

	#[test]
	fn test_ipv6_host_is_bracketed_once() {
		let config = HttpConfigLayer {
			host: Some("[::1]".to_string()),
			port: None,
		}
		.finalize();
		assert_eq!(config.host, "::1");
		assert_eq!(config.socket_addr(), "[::1]:8200");
	}

	#[test]
	fn test_unknown_keys_rejected() {
		assert!(toml::from_str::<HttpConfigLayer>("listen = \"x\"").is_err());
	}
}
