// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Azure Resource Manager reads of virtual machines.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use keyward_common_secret::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::AzureConfig;
use crate::error::{OidcError, OidcResult};

pub const COMPUTE_API_VERSION: &str = "2018-10-01";
pub const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 120;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAssignedIdentity {
	#[serde(default)]
	pub principal_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmIdentity {
	#[serde(default)]
	pub principal_id: String,
	#[serde(default)]
	pub user_assigned_identities: BTreeMap<String, UserAssignedIdentity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualMachine {
	#[serde(default)]
	pub id: String,
	#[serde(default)]
	pub location: String,
	#[serde(default)]
	pub identity: Option<VmIdentity>,
}

impl VirtualMachine {
	/// Value following `key` in the resource id path, matched case-insensitively.
	fn id_segment(&self, key: &str) -> Option<&str> {
		let mut segments = self.id.split('/').filter(|s| !s.is_empty());
		while let Some(segment) = segments.next() {
			if segment.eq_ignore_ascii_case(key) {
				return segments.next();
			}
		}
		None
	}

	pub fn subscription_id(&self) -> Option<&str> {
		self.id_segment("subscriptions")
	}

	pub fn resource_group(&self) -> Option<&str> {
		self.id_segment("resourceGroups")
	}

	/// True when `oid` is the system-assigned or one of the user-assigned identities.
	pub fn has_principal(&self, oid: &str) -> bool {
		self.identity.as_ref().is_some_and(|identity| {
			identity.principal_id == oid
				|| identity
					.user_assigned_identities
					.values()
					.any(|u| u.principal_id == oid)
		})
	}
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
	access_token: String,
	#[serde(default)]
	expires_in: Option<serde_json::Value>,
}

#[derive(Clone)]
struct CachedToken {
	token: SecretString,
	expires_at: DateTime<Utc>,
}

enum Credential {
	ServicePrincipal {
		token_url: String,
		client_id: String,
		client_secret: SecretString,
	},
	ManagedIdentity {
		token_url: String,
	},
}

pub struct ArmClient {
	http: reqwest::Client,
	endpoint: String,
	credential: Credential,
	cached: Mutex<Option<CachedToken>>,
}

impl ArmClient {
	pub fn new(http: reqwest::Client, config: &AzureConfig) -> Self {
		let credential = if config.uses_service_principal() {
			Credential::ServicePrincipal {
				token_url: format!("{}/{}/oauth2/token", config.environment(), config.tenant_id),
				client_id: config.client_id.clone(),
				client_secret: SecretString::new(config.client_secret.clone()),
			}
		} else {
			Credential::ManagedIdentity {
				token_url: IMDS_TOKEN_URL.to_string(),
			}
		};
		Self {
			http,
			endpoint: config.arm_endpoint().to_string(),
			credential,
			cached: Mutex::new(None),
		}
	}

	async fn access_token(&self) -> OidcResult<SecretString> {
		if let Some(token) = self.cached.lock().await.as_ref() {
			if token.expires_at > Utc::now() {
				return Ok(token.token.clone());
			}
		}

		let resource = format!("{}/", self.endpoint);
		let response = match &self.credential {
			Credential::ServicePrincipal {
				token_url,
				client_id,
				client_secret,
			} => {
				self.http
					.post(token_url)
					.form(&[
						("grant_type", "client_credentials"),
						("client_id", client_id.as_str()),
						("client_secret", client_secret.expose().as_str()),
						("resource", resource.as_str()),
					])
					.send()
					.await?
			}
			Credential::ManagedIdentity { token_url } => {
				self.http
					.get(token_url)
					.header("Metadata", "true")
					.query(&[("api-version", "2018-02-01"), ("resource", resource.as_str())])
					.send()
					.await?
			}
		};
		if !response.status().is_success() {
			let status = response.status();
			let body = response.text().await.unwrap_or_default();
			return Err(OidcError::AccessToken(format!("{status}: {body}")));
		}
		let body: TokenResponse = response
			.json()
			.await
			.map_err(|e| OidcError::AccessToken(format!("invalid token response: {e}")))?;

		let lifetime = body
			.expires_in
			.as_ref()
			.and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
			.unwrap_or(300);
		let token = CachedToken {
			token: SecretString::new(body.access_token),
			expires_at: Utc::now() + ChronoDuration::seconds(lifetime - TOKEN_REFRESH_MARGIN_SECS),
		};
		*self.cached.lock().await = Some(token.clone());
		debug!(lifetime, "arm access token acquired");
		Ok(token.token)
	}

	#[tracing::instrument(skip(self), name = "ArmClient::virtual_machine")]
	pub async fn virtual_machine(
		&self,
		subscription_id: &str,
		resource_group: &str,
		vm_name: &str,
	) -> OidcResult<VirtualMachine> {
		let token = self.access_token().await?;
		let url = format!(
			"{}/subscriptions/{subscription_id}/resourceGroups/{resource_group}/providers/Microsoft.Compute/virtualMachines/{vm_name}",
			self.endpoint
		);
		let response = self
			.http
			.get(&url)
			.bearer_auth(token.expose())
			.query(&[("api-version", COMPUTE_API_VERSION)])
			.send()
			.await?;
		let status = response.status();
		if !status.is_success() {
			let message = response.text().await.unwrap_or_default();
			return Err(OidcError::Arm {
				status: status.as_u16(),
				message,
			});
		}
		response
			.json()
			.await
			.map_err(|e| OidcError::InvalidResponse(format!("virtual machine: {e}")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn principal_matches_system_or_user_assigned() {
		let vm: VirtualMachine = serde_json::from_value(json!({
			"id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1",
			"location": "westus",
			"identity": {
				"principalId": "o1",
				"userAssignedIdentities": { "/id/u1": { "principalId": "o9" } }
			}
		}))
		.unwrap();
		assert!(vm.has_principal("o1"));
		assert!(vm.has_principal("o9"));
		assert!(!vm.has_principal("o2"));

		let bare: VirtualMachine = serde_json::from_value(json!({ "location": "westus" })).unwrap();
		assert!(!bare.has_principal("o1"));
	}

	#[test]
	fn subscription_and_resource_group_come_from_the_id() {
		let vm: VirtualMachine = serde_json::from_value(json!({
			"id": "/subscriptions/sub-1/resourcegroups/RG-1/providers/Microsoft.Compute/virtualMachines/vm1",
		}))
		.unwrap();
		assert_eq!(vm.subscription_id(), Some("sub-1"));
		assert_eq!(vm.resource_group(), Some("RG-1"));

		let bare: VirtualMachine = serde_json::from_value(json!({})).unwrap();
		assert_eq!(bare.subscription_id(), None);
		assert_eq!(bare.resource_group(), None);
	}
}
