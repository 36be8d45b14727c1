// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Key/value storage consumed by backends.
//!
//! The host owns the real store; backends only see [`Storage`]. Keys are
//! slash-separated paths and [`Storage::list`] returns the immediate children
//! of a prefix, with a trailing `/` on entries that are themselves prefixes.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::AuthResult;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
	/// A conditional write lost a race.
	#[error("write conflict on {0}")]
	Conflict(String),

	#[error("storage backend error: {0}")]
	Backend(String),
}

#[async_trait]
pub trait Storage: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
	async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
	async fn delete(&self, key: &str) -> Result<(), StorageError>;
	async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// JSON helpers layered over any [`Storage`].
#[async_trait]
pub trait StorageExt: Storage {
	async fn get_json<T>(&self, key: &str) -> AuthResult<Option<T>>
	where
		T: DeserializeOwned + Send,
	{
		match self.get(key).await? {
			Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
			None => Ok(None),
		}
	}

	async fn put_json<T>(&self, key: &str, value: &T) -> AuthResult<()>
	where
		T: Serialize + Sync,
	{
		let bytes = serde_json::to_vec(value)?;
		self.put(key, bytes).await?;
		Ok(())
	}
}

impl<S: Storage + ?Sized> StorageExt for S {}

/// Process-local storage. State is node-local.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
	entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.entries.read().await.is_empty()
	}
}

#[async_trait]
impl Storage for InMemoryStorage {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
		Ok(self.entries.read().await.get(key).cloned())
	}

	async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		if key.is_empty() {
			return Err(StorageError::Backend("empty key".to_string()));
		}
		self.entries.write().await.insert(key.to_string(), value);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.entries.write().await.remove(key);
		Ok(())
	}

	async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let entries = self.entries.read().await;
		let mut children: Vec<String> = Vec::new();
		for key in entries
			.range(prefix.to_string()..)
			.map(|(k, _)| k)
			.take_while(|k| k.starts_with(prefix))
		{
			let rest = &key[prefix.len()..];
			let child = match rest.find('/') {
				Some(idx) => &rest[..=idx],
				None => rest,
			};
			if children.last().map(String::as_str) != Some(child) {
				children.push(child.to_string());
			}
		}
		Ok(children)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Deserialize;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Entry {
		role: String,
	}

	#[tokio::test]
	async fn list_returns_immediate_children() {
		let storage = InMemoryStorage::new();
		storage.put("role/web", vec![1]).await.unwrap();
		storage.put("role/db", vec![1]).await.unwrap();
		storage.put("whitelist/identity/i-1", vec![1]).await.unwrap();
		storage.put("whitelist/identity/i-2", vec![1]).await.unwrap();

		assert_eq!(storage.list("role/").await.unwrap(), vec!["db", "web"]);
		assert_eq!(storage.list("").await.unwrap(), vec!["role/", "whitelist/"]);
		assert_eq!(
			storage.list("whitelist/identity/").await.unwrap(),
			vec!["i-1", "i-2"]
		);
		assert!(storage.list("blacklist/").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn json_helpers_roundtrip_and_delete() {
		let storage = InMemoryStorage::new();
		let entry = Entry {
			role: "web".to_string(),
		};
		storage.put_json("role/web", &entry).await.unwrap();
		let loaded: Option<Entry> = storage.get_json("role/web").await.unwrap();
		assert_eq!(loaded, Some(entry));

		storage.delete("role/web").await.unwrap();
		let loaded: Option<Entry> = storage.get_json("role/web").await.unwrap();
		assert!(loaded.is_none());
		assert!(storage.is_empty().await);
	}

	#[tokio::test]
	async fn corrupt_entries_surface_as_serialization_errors() {
		let storage = InMemoryStorage::new();
		storage.put("role/bad", b"not json".to_vec()).await.unwrap();
		let result: AuthResult<Option<Entry>> = storage.get_json("role/bad").await;
		assert!(matches!(result, Err(crate::AuthError::Serialization(_))));
	}
}
