// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistent role bindings.
//!
//! A role is stored at `role/<lowercase name>` together with its
//! method-specific bound attributes. Every role gets a 256-bit HMAC key on
//! first write; the key is immutable and is stripped from read responses.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use keyward_common_secret::SecretBytes;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{AuthError, AuthResult};
use crate::fields::duration_secs;
use crate::policy;
use crate::storage::{Storage, StorageExt};

pub const ROLE_PREFIX: &str = "role/";

const HMAC_KEY_BYTES: usize = 32;

/// Method-specific bound attributes carried by a role.
pub trait Bindings:
	Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static
{
	/// Reject a role that cannot be persisted. `creating` is true on first write.
	fn validate(&self, creating: bool) -> AuthResult<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleBinding<B> {
	pub name: String,
	pub policies: Vec<String>,
	#[serde(default, with = "duration_secs")]
	pub ttl: Duration,
	#[serde(default, with = "duration_secs")]
	pub max_ttl: Duration,
	#[serde(default, with = "duration_secs")]
	pub period: Duration,
	hmac_key: String,
	#[serde(flatten)]
	pub bindings: B,
}

impl<B: Bindings> RoleBinding<B> {
	fn new(name: String) -> Self {
		Self {
			name,
			policies: policy::sanitize(Vec::<String>::new()),
			ttl: Duration::ZERO,
			max_ttl: Duration::ZERO,
			period: Duration::ZERO,
			hmac_key: String::new(),
			bindings: B::default(),
		}
	}

	/// Decoded HMAC key used to mint and verify role tags.
	pub fn hmac_key(&self) -> AuthResult<SecretBytes> {
		let bytes = STANDARD
			.decode(&self.hmac_key)
			.map_err(|e| AuthError::internal(format!("role {} has a corrupt hmac key: {e}", self.name)))?;
		if bytes.len() * 8 < 128 {
			return Err(AuthError::internal(format!(
				"role {} has a short hmac key",
				self.name
			)));
		}
		Ok(SecretBytes::new(bytes))
	}

	/// The role as returned by read endpoints, without the HMAC key.
	pub fn to_response(&self) -> AuthResult<Map<String, Value>> {
		let mut map = match serde_json::to_value(self)? {
			Value::Object(map) => map,
			_ => return Err(AuthError::internal("role did not serialize to an object")),
		};
		map.remove("hmac_key");
		Ok(map)
	}
}

fn generate_hmac_key() -> String {
	let mut key = [0u8; HMAC_KEY_BYTES];
	rand::rngs::OsRng.fill_bytes(&mut key);
	STANDARD.encode(key)
}

fn canonical_name(name: &str) -> AuthResult<String> {
	let name = name.trim().to_lowercase();
	if name.is_empty() {
		return Err(AuthError::bad_request("missing role name"));
	}
	if name.contains('/') {
		return Err(AuthError::bad_request("role name must not contain '/'"));
	}
	Ok(name)
}

/// Role storage guarded by the role mutex.
pub struct RoleStore<B> {
	storage: Arc<dyn Storage>,
	lock: RwLock<()>,
	_bindings: PhantomData<fn() -> B>,
}

impl<B: Bindings> RoleStore<B> {
	pub fn new(storage: Arc<dyn Storage>) -> Self {
		Self {
			storage,
			lock: RwLock::new(()),
			_bindings: PhantomData,
		}
	}

	#[tracing::instrument(skip(self), name = "RoleStore::get")]
	pub async fn get(&self, name: &str) -> AuthResult<Option<RoleBinding<B>>> {
		let name = canonical_name(name)?;
		let _guard = self.lock.read().await;
		self.read_unlocked(&name).await
	}

	/// Like [`RoleStore::get`] but a missing role is an error.
	pub async fn require(&self, name: &str) -> AuthResult<RoleBinding<B>> {
		self.get(name)
			.await?
			.ok_or_else(|| AuthError::not_found(format!("role {:?}", name.to_lowercase())))
	}

	pub async fn list(&self) -> AuthResult<Vec<String>> {
		let _guard = self.lock.read().await;
		let keys = self.storage.list(ROLE_PREFIX).await?;
		Ok(keys.into_iter().filter(|k| !k.ends_with('/')).collect())
	}

	#[tracing::instrument(skip(self), name = "RoleStore::delete")]
	pub async fn delete(&self, name: &str) -> AuthResult<()> {
		let name = canonical_name(name)?;
		let _guard = self.lock.write().await;
		self.storage.delete(&format!("{ROLE_PREFIX}{name}")).await?;
		info!(role = %name, "role deleted");
		Ok(())
	}

	/// Apply `update` to the existing role (or a fresh one) and persist it.
	///
	/// Returns the stored role and whether it was created by this call.
	#[tracing::instrument(skip(self, update), name = "RoleStore::create_or_update")]
	pub async fn create_or_update<F>(&self, name: &str, update: F) -> AuthResult<(RoleBinding<B>, bool)>
	where
		F: FnOnce(&mut RoleBinding<B>) -> AuthResult<()> + Send,
	{
		let name = canonical_name(name)?;
		let _guard = self.lock.write().await;

		let existing = self.read_unlocked(&name).await?;
		let creating = existing.is_none();
		let mut role = existing.unwrap_or_else(|| RoleBinding::new(name.clone()));

		update(&mut role)?;

		role.name = name.clone();
		role.policies = policy::sanitize(&role.policies);
		if !role.max_ttl.is_zero() && role.ttl > role.max_ttl {
			return Err(AuthError::bad_request("ttl should be shorter than max_ttl"));
		}
		role.bindings.validate(creating)?;
		if role.hmac_key.is_empty() {
			role.hmac_key = generate_hmac_key();
		}

		self.storage
			.put_json(&format!("{ROLE_PREFIX}{name}"), &role)
			.await?;
		if creating {
			info!(role = %name, "role created");
		} else {
			debug!(role = %name, "role updated");
		}
		Ok((role, creating))
	}

	async fn read_unlocked(&self, name: &str) -> AuthResult<Option<RoleBinding<B>>> {
		self.storage.get_json(&format!("{ROLE_PREFIX}{name}")).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::InMemoryStorage;

	#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
	struct TestBindings {
		#[serde(default)]
		bound_ami_id: Vec<String>,
	}

	impl Bindings for TestBindings {
		fn validate(&self, creating: bool) -> AuthResult<()> {
			if creating && self.bound_ami_id.is_empty() {
				return Err(AuthError::bad_request("at least one bound attribute is required"));
			}
			Ok(())
		}
	}

	fn store() -> (Arc<InMemoryStorage>, RoleStore<TestBindings>) {
		let storage = Arc::new(InMemoryStorage::new());
		let roles = RoleStore::new(storage.clone() as Arc<dyn Storage>);
		(storage, roles)
	}

	#[tokio::test]
	async fn names_are_lowercased_and_policies_sanitized() {
		let (storage, roles) = store();
		let (role, created) = roles
			.create_or_update("Web-Role", |r| {
				r.policies = vec!["q".into(), "p".into(), "q".into()];
				r.bindings.bound_ami_id = vec!["ami-aaa".into()];
				Ok(())
			})
			.await
			.unwrap();

		assert!(created);
		assert_eq!(role.name, "web-role");
		assert_eq!(role.policies, vec!["default", "p", "q"]);
		assert!(storage.get("role/web-role").await.unwrap().is_some());
		assert!(roles.get("WEB-ROLE").await.unwrap().is_some());
		assert_eq!(roles.list().await.unwrap(), vec!["web-role"]);
	}

	#[tokio::test]
	async fn create_requires_binding() {
		let (_, roles) = store();
		let err = roles.create_or_update("r", |_| Ok(())).await.unwrap_err();
		assert!(matches!(err, AuthError::BadRequest(_)));
		assert!(roles.get("r").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn hmac_key_is_generated_once_and_hidden() {
		let (_, roles) = store();
		let (first, _) = roles
			.create_or_update("r", |r| {
				r.bindings.bound_ami_id = vec!["ami-1".into()];
				Ok(())
			})
			.await
			.unwrap();
		let (second, created) = roles
			.create_or_update("r", |r| {
				r.policies = vec!["x".into()];
				Ok(())
			})
			.await
			.unwrap();

		assert!(!created);
		assert_eq!(first.hmac_key().unwrap(), second.hmac_key().unwrap());
		assert_eq!(first.hmac_key().unwrap().expose().len(), 32);

		let response = second.to_response().unwrap();
		assert!(!response.contains_key("hmac_key"));
		assert_eq!(response["bound_ami_id"], serde_json::json!(["ami-1"]));
	}

	#[tokio::test]
	async fn ttl_above_max_ttl_is_rejected() {
		let (_, roles) = store();
		let err = roles
			.create_or_update("r", |r| {
				r.bindings.bound_ami_id = vec!["ami-1".into()];
				r.ttl = Duration::from_secs(600);
				r.max_ttl = Duration::from_secs(60);
				Ok(())
			})
			.await
			.unwrap_err();
		assert!(matches!(err, AuthError::BadRequest(_)));
	}

	#[tokio::test]
	async fn delete_and_require() {
		let (_, roles) = store();
		roles
			.create_or_update("r", |r| {
				r.bindings.bound_ami_id = vec!["ami-1".into()];
				Ok(())
			})
			.await
			.unwrap();
		roles.delete("R").await.unwrap();
		assert!(matches!(
			roles.require("r").await.unwrap_err(),
			AuthError::NotFound(_)
		));
	}
}
