// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use keyward_server_auth::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CONFIG_KEY: &str = "config";
pub const DEFAULT_ENVIRONMENT: &str = "https://login.microsoftonline.com";
pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";
const DEFAULT_ISSUER_HOST: &str = "https://sts.windows.net";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureConfig {
	pub tenant_id: String,
	/// Expected `aud` of presented tokens.
	pub resource: String,
	/// Service principal used for ARM reads. Empty means managed identity.
	#[serde(default)]
	pub client_id: String,
	#[serde(default)]
	pub client_secret: String,
	/// AAD login host.
	#[serde(default)]
	pub environment: String,
	#[serde(default)]
	pub arm_endpoint: String,
	/// Replaces the issuer derived from `tenant_id`.
	#[serde(default)]
	pub oidc_issuer: String,
}

impl AzureConfig {
	pub fn issuer(&self) -> String {
		if self.oidc_issuer.is_empty() {
			format!("{DEFAULT_ISSUER_HOST}/{}/", self.tenant_id)
		} else {
			self.oidc_issuer.clone()
		}
	}

	pub fn environment(&self) -> &str {
		if self.environment.is_empty() {
			DEFAULT_ENVIRONMENT
		} else {
			self.environment.trim_end_matches('/')
		}
	}

	pub fn arm_endpoint(&self) -> &str {
		if self.arm_endpoint.is_empty() {
			DEFAULT_ARM_ENDPOINT
		} else {
			self.arm_endpoint.trim_end_matches('/')
		}
	}

	pub fn uses_service_principal(&self) -> bool {
		!self.client_id.is_empty() && !self.client_secret.is_empty()
	}

	pub fn to_response(&self) -> Map<String, Value> {
		let mut map = Map::new();
		for (key, value) in [
			("tenant_id", &self.tenant_id),
			("resource", &self.resource),
			("client_id", &self.client_id),
			("environment", &self.environment),
			("arm_endpoint", &self.arm_endpoint),
			("oidc_issuer", &self.oidc_issuer),
		] {
			map.insert(key.into(), Value::String(value.clone()));
		}
		map
	}
}

#[derive(Debug, Default, Deserialize)]
pub struct AzureConfigInput {
	pub tenant_id: Option<String>,
	pub resource: Option<String>,
	pub client_id: Option<String>,
	pub client_secret: Option<String>,
	pub environment: Option<String>,
	pub arm_endpoint: Option<String>,
	pub oidc_issuer: Option<String>,
}

impl AzureConfigInput {
	pub fn apply(self, config: &mut AzureConfig) -> AuthResult<()> {
		let fields = [
			(self.tenant_id, &mut config.tenant_id),
			(self.resource, &mut config.resource),
			(self.client_id, &mut config.client_id),
			(self.client_secret, &mut config.client_secret),
			(self.environment, &mut config.environment),
			(self.arm_endpoint, &mut config.arm_endpoint),
			(self.oidc_issuer, &mut config.oidc_issuer),
		];
		for (input, target) in fields {
			if let Some(value) = input {
				*target = value.trim().to_string();
			}
		}
		if config.tenant_id.is_empty() {
			return Err(AuthError::bad_request("tenant_id is required"));
		}
		if config.resource.is_empty() {
			return Err(AuthError::bad_request("resource is required"));
		}
		if config.client_id.is_empty() != config.client_secret.is_empty() {
			return Err(AuthError::bad_request(
				"client_id and client_secret must be set together",
			));
		}
		for (name, value) in [
			("environment", &config.environment),
			("arm_endpoint", &config.arm_endpoint),
			("oidc_issuer", &config.oidc_issuer),
		] {
			if !value.is_empty() {
				url::Url::parse(value)
					.map_err(|e| AuthError::bad_request(format!("invalid {name}: {e}")))?;
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn issuer_defaults_to_tenant() {
		let config = AzureConfig {
			tenant_id: "t1".into(),
			..AzureConfig::default()
		};
		assert_eq!(config.issuer(), "https://sts.windows.net/t1/");
		assert_eq!(config.environment(), DEFAULT_ENVIRONMENT);
		assert_eq!(config.arm_endpoint(), DEFAULT_ARM_ENDPOINT);
	}

	#[test]
	fn apply_validates_required_fields() {
		let mut config = AzureConfig::default();
		let input: AzureConfigInput = serde_json::from_value(json!({ "tenant_id": "t1" })).unwrap();
		assert!(input.apply(&mut config).is_err());

		let input: AzureConfigInput = serde_json::from_value(json!({
			"tenant_id": "t1",
			"resource": "https://management.azure.com/",
			"client_id": "app",
		}))
		.unwrap();
		let err = input.apply(&mut config).unwrap_err();
		assert!(err.to_string().contains("client_secret"), "{err}");

		let input: AzureConfigInput = serde_json::from_value(json!({ "client_secret": "s" })).unwrap();
		input.apply(&mut config).unwrap();
		assert!(config.uses_service_principal());
		assert!(!config.to_response().contains_key("client_secret"));
	}
}
