// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Memoized EC2/IAM clients keyed by region and assumed role.

use keyward_server_auth::AuthResult;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::ClientConfig;
use crate::instance::{InstanceApi, InstanceApiFactory};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientCacheKey {
	pub region: String,
	/// Empty when the backend's own credentials are used directly.
	pub assumed_role_arn: String,
}

impl ClientCacheKey {
	pub fn new(region: impl Into<String>, assumed_role_arn: impl Into<String>) -> Self {
		Self {
			region: region.into(),
			assumed_role_arn: assumed_role_arn.into(),
		}
	}
}

/// Read-through cache of API clients.
///
/// Concurrent misses for one key may each build a client; the first insert
/// wins and every caller receives that one. Callers hold the config read
/// lock across a lookup, so a flush under the config write lock never races
/// with an insert built from the old configuration.
pub struct ClientCache {
	factory: Arc<dyn InstanceApiFactory>,
	clients: RwLock<HashMap<ClientCacheKey, Arc<dyn InstanceApi>>>,
	builds: AtomicU64,
}

impl ClientCache {
	pub fn new(factory: Arc<dyn InstanceApiFactory>) -> Self {
		Self {
			factory,
			clients: RwLock::new(HashMap::new()),
			builds: AtomicU64::new(0),
		}
	}

	pub async fn get_or_build(
		&self,
		key: ClientCacheKey,
		config: &ClientConfig,
	) -> AuthResult<Arc<dyn InstanceApi>> {
		if let Some(client) = self.clients.read().await.get(&key) {
			return Ok(Arc::clone(client));
		}

		let built = self.factory.build(&key, config)?;
		self.builds.fetch_add(1, Ordering::Relaxed);
		debug!(region = %key.region, assumed_role_arn = %key.assumed_role_arn, "built aws client");

		let mut clients = self.clients.write().await;
		Ok(Arc::clone(clients.entry(key).or_insert(built)))
	}

	/// Drop every cached client.
	pub async fn flush(&self) {
		let mut clients = self.clients.write().await;
		if !clients.is_empty() {
			debug!(count = clients.len(), "flushing aws client cache");
		}
		clients.clear();
	}

	pub async fn len(&self) -> usize {
		self.clients.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.clients.read().await.is_empty()
	}

	/// Number of clients built since creation.
	pub fn builds(&self) -> u64 {
		self.builds.load(Ordering::Relaxed)
	}
}
