// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CONFIG_KEY: &str = "config";

/// Path the node signs when it logs in.
pub const DEFAULT_LOGIN_PATH: &str = "/v1/auth/chef/login";

/// Connection to the Chef server used to look up clients and nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChefConfig {
	/// Organization URL, e.g. `https://chef.example.com/organizations/acme`.
	pub base_url: String,
	pub client_name: String,
	/// PEM private key of `client_name`. Never returned on read.
	pub client_key: String,
	#[serde(default = "default_login_path")]
	pub login_path: String,
}

fn default_login_path() -> String {
	DEFAULT_LOGIN_PATH.to_string()
}

impl ChefConfig {
	pub fn to_response(&self) -> Map<String, Value> {
		let mut map = Map::new();
		map.insert("base_url".into(), Value::String(self.base_url.clone()));
		map.insert("client_name".into(), Value::String(self.client_name.clone()));
		map.insert("login_path".into(), Value::String(self.login_path.clone()));
		map
	}
}

#[derive(Debug, Default, Deserialize)]
pub struct ChefConfigInput {
	pub base_url: Option<String>,
	pub client_name: Option<String>,
	pub client_key: Option<String>,
	pub login_path: Option<String>,
}

impl ChefConfigInput {
	pub fn apply(self, config: &mut ChefConfig) {
		if let Some(v) = self.base_url {
			config.base_url = v.trim_end_matches('/').to_string();
		}
		if let Some(v) = self.client_name {
			config.client_name = v;
		}
		if let Some(v) = self.client_key {
			config.client_key = v;
		}
		if let Some(v) = self.login_path {
			config.login_path = v;
		}
		if config.login_path.is_empty() {
			config.login_path = default_login_path();
		}
	}
}
