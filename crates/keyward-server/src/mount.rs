// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The set of auth methods this host can mount.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use keyward_server_auth::{
	Auth, AuthResult, Backend, InMemoryStorage, Request, Response, StaticSystemView, Storage,
	SystemView,
};
use keyward_server_auth_aws::AwsBackend;
use keyward_server_auth_azure::AzureBackend;
use keyward_server_auth_chef::ChefBackend;
use keyward_server_auth_httpbasic::HttpBasicBackend;
use keyward_server_auth_radius::RadiusBackend;
use keyward_server_config::{MountMethod, ServerConfig};
use tracing::info;

/// A mounted auth method. Methods are composed here rather than registered
/// through a factory.
pub enum MountedBackend {
	Aws(AwsBackend),
	Chef(ChefBackend),
	Radius(RadiusBackend),
	Azure(AzureBackend),
	HttpBasic(HttpBasicBackend),
}

impl MountedBackend {
	pub fn new(
		method: MountMethod,
		storage: Arc<dyn Storage>,
		system: Arc<dyn SystemView>,
	) -> AuthResult<Self> {
		Ok(match method {
			MountMethod::Aws => Self::Aws(AwsBackend::new(storage, system)?),
			MountMethod::Chef => Self::Chef(ChefBackend::new(storage, system)?),
			MountMethod::Radius => Self::Radius(RadiusBackend::new(storage, system)),
			MountMethod::Azure => Self::Azure(AzureBackend::new(storage, system)?),
			MountMethod::Httpbasic => Self::HttpBasic(HttpBasicBackend::new(storage, system)?),
		})
	}

	fn inner(&self) -> &dyn Backend {
		match self {
			Self::Aws(b) => b,
			Self::Chef(b) => b,
			Self::Radius(b) => b,
			Self::Azure(b) => b,
			Self::HttpBasic(b) => b,
		}
	}
}

#[async_trait]
impl Backend for MountedBackend {
	fn backend_type(&self) -> &'static str {
		self.inner().backend_type()
	}

	async fn handle(&self, request: Request) -> AuthResult<Response> {
		self.inner().handle(request).await
	}

	async fn renew(&self, auth: &Auth) -> AuthResult<Auth> {
		self.inner().renew(auth).await
	}

	async fn periodic(&self) -> AuthResult<()> {
		self.inner().periodic().await
	}
}

/// Build every configured mount over a fresh in-memory store.
pub fn build_mounts(config: &ServerConfig) -> AuthResult<BTreeMap<String, Arc<MountedBackend>>> {
	let system: Arc<dyn SystemView> = Arc::new(StaticSystemView::new(
		config.system.default_lease_ttl,
		config.system.max_lease_ttl,
	));

	let mut mounts = BTreeMap::new();
	for mount in &config.mounts {
		let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
		let backend = MountedBackend::new(mount.method, storage, Arc::clone(&system))?;
		info!(path = %mount.path, method = %mount.method, "mounted auth backend");
		mounts.insert(mount.path.clone(), Arc::new(backend));
	}
	Ok(mounts)
}

#[cfg(test)]
mod tests {
	use super::*;
	use keyward_server_config::{finalize, ServerConfigLayer};

	#[tokio::test]
	async fn default_config_mounts_every_method() {
		let config = finalize(ServerConfigLayer::default()).unwrap();
		let mounts = build_mounts(&config).unwrap();

		let types: Vec<_> = mounts
			.iter()
			.map(|(path, b)| (path.as_str(), b.backend_type()))
			.collect();
		assert_eq!(
			types,
			vec![
				("aws", "aws"),
				("azure", "azure"),
				("chef", "chef"),
				("httpbasic", "httpbasic"),
				("radius", "radius"),
			]
		);
	}
}
