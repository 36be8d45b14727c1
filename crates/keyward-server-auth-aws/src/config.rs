// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Trust material: API credentials, registered signing certificates and
//! per-account STS roles.
//!
//! All writes take the config write lock and flush the client cache when
//! they can change which credentials a client would use.

use keyward_server_auth::{AuthError, AuthResult, Storage, StorageExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::arn::{EntityType, IamEntity};
use crate::client_cache::{ClientCache, ClientCacheKey};
use crate::instance::{InstanceApi, InstanceApiFactory};
use crate::pkcs7;

pub const CLIENT_CONFIG_KEY: &str = "config/client";
pub const CERTIFICATE_PREFIX: &str = "config/certificate/";
pub const STS_PREFIX: &str = "config/sts/";

/// Header clients include in signed STS requests when a server ID is configured.
pub const IAM_SERVER_ID_HEADER: &str = "X-Keyward-AWS-IAM-Server-ID";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
	#[serde(default)]
	pub access_key: String,
	#[serde(default)]
	pub secret_key: String,
	/// EC2 endpoint override.
	#[serde(default)]
	pub endpoint: String,
	#[serde(default)]
	pub iam_endpoint: String,
	/// STS endpoint that presigned IAM logins are forwarded to. Whatever this
	/// endpoint answers is trusted as the caller's identity, so it must point
	/// at a real STS service.
	#[serde(default)]
	pub sts_endpoint: String,
	#[serde(default)]
	pub iam_server_id_header_value: String,
}

impl ClientConfig {
	/// Read view; the secret key is never returned.
	pub fn to_response(&self) -> Map<String, Value> {
		let mut map = Map::new();
		map.insert("access_key".into(), Value::String(self.access_key.clone()));
		map.insert("endpoint".into(), Value::String(self.endpoint.clone()));
		map.insert("iam_endpoint".into(), Value::String(self.iam_endpoint.clone()));
		map.insert("sts_endpoint".into(), Value::String(self.sts_endpoint.clone()));
		map.insert(
			"iam_server_id_header_value".into(),
			Value::String(self.iam_server_id_header_value.clone()),
		);
		map
	}
}

/// Partial update of [`ClientConfig`]; absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
pub struct ClientConfigInput {
	pub access_key: Option<String>,
	pub secret_key: Option<String>,
	pub endpoint: Option<String>,
	pub iam_endpoint: Option<String>,
	pub sts_endpoint: Option<String>,
	pub iam_server_id_header_value: Option<String>,
}

impl ClientConfigInput {
	/// Apply to `config`; true when a credential-affecting field changed.
	fn apply(self, config: &mut ClientConfig) -> bool {
		let mut changed = false;
		let mut set = |target: &mut String, value: Option<String>, affects_clients: bool| {
			if let Some(value) = value {
				if *target != value {
					*target = value;
					changed |= affects_clients;
				}
			}
		};
		set(&mut config.access_key, self.access_key, true);
		set(&mut config.secret_key, self.secret_key, true);
		set(&mut config.endpoint, self.endpoint, true);
		set(&mut config.iam_endpoint, self.iam_endpoint, true);
		set(&mut config.sts_endpoint, self.sts_endpoint, true);
		set(
			&mut config.iam_server_id_header_value,
			self.iam_server_id_header_value,
			false,
		);
		changed
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateEntry {
	pub aws_public_cert: String,
	#[serde(rename = "type", default = "default_cert_type")]
	pub cert_type: String,
}

fn default_cert_type() -> String {
	"pkcs7".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CertificateInput {
	pub aws_public_cert: String,
	#[serde(rename = "type")]
	pub cert_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StsEntry {
	pub sts_role: String,
}

pub struct TrustStore {
	storage: Arc<dyn Storage>,
	lock: RwLock<()>,
	clients: ClientCache,
}

impl TrustStore {
	pub fn new(storage: Arc<dyn Storage>, factory: Arc<dyn InstanceApiFactory>) -> Self {
		Self {
			storage,
			lock: RwLock::new(()),
			clients: ClientCache::new(factory),
		}
	}

	pub fn client_cache(&self) -> &ClientCache {
		&self.clients
	}

	pub async fn read_client_config(&self) -> AuthResult<Option<ClientConfig>> {
		let _guard = self.lock.read().await;
		self.storage.get_json(CLIENT_CONFIG_KEY).await
	}

	/// Stored configuration, or defaults when none has been written.
	pub async fn client_config(&self) -> AuthResult<ClientConfig> {
		Ok(self.read_client_config().await?.unwrap_or_default())
	}

	#[tracing::instrument(skip(self, input), name = "TrustStore::write_client_config")]
	pub async fn write_client_config(&self, input: ClientConfigInput) -> AuthResult<ClientConfig> {
		let _guard = self.lock.write().await;
		let mut config: ClientConfig = self
			.storage
			.get_json(CLIENT_CONFIG_KEY)
			.await?
			.unwrap_or_default();
		let changed = input.apply(&mut config);
		self.storage.put_json(CLIENT_CONFIG_KEY, &config).await?;
		if changed {
			self.clients.flush().await;
		}
		info!(credentials_changed = changed, "client config written");
		Ok(config)
	}

	pub async fn delete_client_config(&self) -> AuthResult<()> {
		let _guard = self.lock.write().await;
		self.storage.delete(CLIENT_CONFIG_KEY).await?;
		self.clients.flush().await;
		info!("client config deleted");
		Ok(())
	}

	#[tracing::instrument(skip(self, input), name = "TrustStore::put_certificate")]
	pub async fn put_certificate(&self, name: &str, input: CertificateInput) -> AuthResult<CertificateEntry> {
		let name = entry_name(name, "certificate name")?;
		let cert_type = input.cert_type.unwrap_or_else(default_cert_type);
		if cert_type != "pkcs7" {
			return Err(AuthError::bad_request(format!(
				"unsupported certificate type {cert_type:?}"
			)));
		}
		let parsed = pkcs7::parse_certificate(&input.aws_public_cert)?;
		let pem = parsed
			.to_pem()
			.map_err(|e| AuthError::internal(format!("failed to encode certificate: {e}")))?;
		let entry = CertificateEntry {
			aws_public_cert: String::from_utf8_lossy(&pem).into_owned(),
			cert_type,
		};

		let _guard = self.lock.write().await;
		self.storage
			.put_json(&format!("{CERTIFICATE_PREFIX}{name}"), &entry)
			.await?;
		info!(certificate = %name, "certificate registered");
		Ok(entry)
	}

	pub async fn get_certificate(&self, name: &str) -> AuthResult<Option<CertificateEntry>> {
		let _guard = self.lock.read().await;
		self.storage
			.get_json(&format!("{CERTIFICATE_PREFIX}{}", name.to_lowercase()))
			.await
	}

	pub async fn delete_certificate(&self, name: &str) -> AuthResult<()> {
		let _guard = self.lock.write().await;
		self.storage
			.delete(&format!("{CERTIFICATE_PREFIX}{}", name.to_lowercase()))
			.await?;
		Ok(())
	}

	pub async fn list_certificates(&self) -> AuthResult<Vec<String>> {
		let _guard = self.lock.read().await;
		Ok(self.storage.list(CERTIFICATE_PREFIX).await?)
	}

	/// PEM bodies of every registered certificate.
	pub async fn registered_certificates(&self) -> AuthResult<Vec<String>> {
		let _guard = self.lock.read().await;
		let mut pems = Vec::new();
		for name in self.storage.list(CERTIFICATE_PREFIX).await? {
			let entry: Option<CertificateEntry> = self
				.storage
				.get_json(&format!("{CERTIFICATE_PREFIX}{name}"))
				.await?;
			if let Some(entry) = entry {
				pems.push(entry.aws_public_cert);
			}
		}
		Ok(pems)
	}

	#[tracing::instrument(skip(self), name = "TrustStore::put_sts")]
	pub async fn put_sts(&self, account_id: &str, sts_role: &str) -> AuthResult<StsEntry> {
		let account_id = entry_name(account_id, "account id")?;
		let entity = IamEntity::parse(sts_role)?;
		if entity.entity_type != EntityType::Role {
			return Err(AuthError::bad_request("sts_role must be an IAM role ARN"));
		}
		let entry = StsEntry {
			sts_role: sts_role.to_string(),
		};

		let _guard = self.lock.write().await;
		self.storage
			.put_json(&format!("{STS_PREFIX}{account_id}"), &entry)
			.await?;
		self.clients.flush().await;
		info!(account_id = %account_id, "sts role registered");
		Ok(entry)
	}

	pub async fn get_sts(&self, account_id: &str) -> AuthResult<Option<StsEntry>> {
		let _guard = self.lock.read().await;
		self.storage.get_json(&format!("{STS_PREFIX}{account_id}")).await
	}

	pub async fn delete_sts(&self, account_id: &str) -> AuthResult<()> {
		let _guard = self.lock.write().await;
		self.storage.delete(&format!("{STS_PREFIX}{account_id}")).await?;
		self.clients.flush().await;
		Ok(())
	}

	pub async fn list_sts(&self) -> AuthResult<Vec<String>> {
		let _guard = self.lock.read().await;
		Ok(self.storage.list(STS_PREFIX).await?)
	}

	/// API client for `region`, assuming the STS role registered for `account_id` if any.
	pub async fn instance_api(&self, region: &str, account_id: &str) -> AuthResult<Arc<dyn InstanceApi>> {
		let _guard = self.lock.read().await;
		let config: ClientConfig = self
			.storage
			.get_json(CLIENT_CONFIG_KEY)
			.await?
			.unwrap_or_default();
		let sts: Option<StsEntry> = self
			.storage
			.get_json(&format!("{STS_PREFIX}{account_id}"))
			.await?;
		let key = ClientCacheKey::new(region, sts.map(|s| s.sts_role).unwrap_or_default());
		self.clients.get_or_build(key, &config).await
	}
}

fn entry_name(name: &str, what: &str) -> AuthResult<String> {
	let name = name.trim().to_lowercase();
	if name.is_empty() || name.contains('/') {
		return Err(AuthError::bad_request(format!("invalid {what}")));
	}
	Ok(name)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::instance::InstanceDescription;
	use async_trait::async_trait;
	use keyward_server_auth::InMemoryStorage;

	struct NullApi;

	#[async_trait]
	impl InstanceApi for NullApi {
		async fn describe_instance(&self, _instance_id: &str) -> AuthResult<InstanceDescription> {
			Ok(InstanceDescription::default())
		}

		async fn instance_profile_roles(&self, _profile_arn: &str) -> AuthResult<Vec<String>> {
			Ok(Vec::new())
		}
	}

	struct NullFactory;

	impl InstanceApiFactory for NullFactory {
		fn build(&self, _key: &ClientCacheKey, _config: &ClientConfig) -> AuthResult<Arc<dyn InstanceApi>> {
			Ok(Arc::new(NullApi))
		}
	}

	fn store() -> TrustStore {
		TrustStore::new(Arc::new(InMemoryStorage::new()), Arc::new(NullFactory))
	}

	#[tokio::test]
	async fn secret_key_is_not_in_read_view() {
		let trust = store();
		trust
			.write_client_config(ClientConfigInput {
				access_key: Some("AKID".into()),
				secret_key: Some("hunter2".into()),
				..ClientConfigInput::default()
			})
			.await
			.unwrap();
		let view = trust.client_config().await.unwrap().to_response();
		assert_eq!(view["access_key"], "AKID");
		assert!(!view.contains_key("secret_key"));
	}

	#[tokio::test]
	async fn credential_writes_flush_clients() {
		let trust = store();
		trust.instance_api("us-east-1", "123").await.unwrap();
		assert_eq!(trust.client_cache().len().await, 1);

		trust
			.write_client_config(ClientConfigInput {
				iam_server_id_header_value: Some("keyward.example.com".into()),
				..ClientConfigInput::default()
			})
			.await
			.unwrap();
		assert_eq!(trust.client_cache().len().await, 1);

		trust
			.write_client_config(ClientConfigInput {
				secret_key: Some("rotated".into()),
				..ClientConfigInput::default()
			})
			.await
			.unwrap();
		assert!(trust.client_cache().is_empty().await);
	}

	#[tokio::test]
	async fn sts_roles_key_the_cache() {
		let trust = store();
		trust
			.put_sts("123456789012", "arn:aws:iam::123456789012:role/reader")
			.await
			.unwrap();
		assert!(trust.client_cache().is_empty().await);
		trust.instance_api("us-east-1", "123456789012").await.unwrap();
		trust.instance_api("us-east-1", "999999999999").await.unwrap();
		assert_eq!(trust.client_cache().len().await, 2);

		trust.delete_sts("123456789012").await.unwrap();
		assert!(trust.client_cache().is_empty().await);
	}

	#[tokio::test]
	async fn sts_role_must_be_a_role() {
		let trust = store();
		let err = trust
			.put_sts("123456789012", "arn:aws:iam::123456789012:user/bob")
			.await
			.unwrap_err();
		assert!(matches!(err, AuthError::BadRequest(_)));
	}

	#[tokio::test]
	async fn certificates_round_trip() {
		let trust = store();
		trust
			.put_certificate(
				"Cert1",
				CertificateInput {
					aws_public_cert: pkcs7::AWS_PUBLIC_CERT.to_string(),
					cert_type: None,
				},
			)
			.await
			.unwrap();
		let entry = trust.get_certificate("cert1").await.unwrap().unwrap();
		assert_eq!(entry.cert_type, "pkcs7");
		assert_eq!(trust.list_certificates().await.unwrap(), vec!["cert1"]);
		assert_eq!(trust.registered_certificates().await.unwrap().len(), 1);

		let bad = trust
			.put_certificate(
				"junk",
				CertificateInput {
					aws_public_cert: "junk".into(),
					cert_type: None,
				},
			)
			.await;
		assert!(bad.is_err());
	}
}
