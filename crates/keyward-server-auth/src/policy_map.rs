// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Named policy sets (`<prefix><name>` → policies).
//!
//! Backs Chef environment/role/tag maps and RADIUS user entries.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AuthError, AuthResult};
use crate::policy;
use crate::storage::{Storage, StorageExt};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyMapEntry {
	pub policies: Vec<String>,
}

pub struct PolicyMapStore {
	storage: Arc<dyn Storage>,
	prefix: &'static str,
}

impl PolicyMapStore {
	pub fn new(storage: Arc<dyn Storage>, prefix: &'static str) -> Self {
		Self { storage, prefix }
	}

	fn key(&self, name: &str) -> AuthResult<String> {
		let name = name.trim();
		if name.is_empty() || name.contains('/') {
			return Err(AuthError::bad_request(format!("invalid name {name:?}")));
		}
		Ok(format!("{}{}", self.prefix, name.to_lowercase()))
	}

	pub async fn get(&self, name: &str) -> AuthResult<Option<PolicyMapEntry>> {
		self.storage.get_json(&self.key(name)?).await
	}

	/// Stores the policies without adding `default`; the union is sanitized at login.
	pub async fn put(&self, name: &str, policies: &[String]) -> AuthResult<PolicyMapEntry> {
		let mut policies: Vec<String> = policies
			.iter()
			.map(|p| p.trim().to_lowercase())
			.filter(|p| !p.is_empty())
			.collect();
		policies.sort();
		policies.dedup();
		let entry = PolicyMapEntry { policies };
		self.storage.put_json(&self.key(name)?, &entry).await?;
		Ok(entry)
	}

	pub async fn delete(&self, name: &str) -> AuthResult<()> {
		self.storage.delete(&self.key(name)?).await?;
		Ok(())
	}

	pub async fn list(&self) -> AuthResult<Vec<String>> {
		let keys = self.storage.list(self.prefix).await?;
		Ok(keys.into_iter().filter(|k| !k.ends_with('/')).collect())
	}

	/// Union of the policies mapped to each of `names`. Unknown names contribute nothing.
	pub async fn union<'a, I>(&self, names: I) -> AuthResult<Vec<String>>
	where
		I: IntoIterator<Item = &'a String>,
	{
		let mut all = Vec::new();
		for name in names {
			if let Some(entry) = self.get(name).await? {
				all.extend(entry.policies);
			}
		}
		Ok(policy::sanitize(all))
	}
}
