// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyward_server_auth::{
	policy, Auth, AuthError, AuthResult, Backend, Operation, PolicyMapStore, Request, Response,
	Storage, StorageExt, SystemView, TtlBounds,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::client::{ChefClient, ChefNode};
use crate::config::{ChefConfig, ChefConfigInput, CONFIG_KEY};
use crate::verifier::{self, ChefLoginInput};

#[derive(Debug, Deserialize)]
struct PolicyInput {
	#[serde(default, deserialize_with = "keyward_server_auth::fields::string_list::deserialize")]
	policies: Vec<String>,
}

/// Chef node authentication. Policies are the union of those mapped to the
/// node's environment, run-list roles and tags.
pub struct ChefBackend {
	storage: Arc<dyn Storage>,
	config_lock: RwLock<()>,
	environments: PolicyMapStore,
	roles: PolicyMapStore,
	tags: PolicyMapStore,
	system: Arc<dyn SystemView>,
	http: reqwest::Client,
}

impl ChefBackend {
	pub fn new(storage: Arc<dyn Storage>, system: Arc<dyn SystemView>) -> AuthResult<Self> {
		let http = keyward_common_http::new_client()
			.map_err(|e| AuthError::internal(format!("failed to build http client: {e}")))?;
		Ok(Self::with_http(storage, system, http))
	}

	pub fn with_http(storage: Arc<dyn Storage>, system: Arc<dyn SystemView>, http: reqwest::Client) -> Self {
		Self {
			environments: PolicyMapStore::new(Arc::clone(&storage), "environment/"),
			roles: PolicyMapStore::new(Arc::clone(&storage), "role/"),
			tags: PolicyMapStore::new(Arc::clone(&storage), "tag/"),
			config_lock: RwLock::new(()),
			storage,
			system,
			http,
		}
	}

	async fn config(&self) -> AuthResult<ChefConfig> {
		let _guard = self.config_lock.read().await;
		self.storage
			.get_json(CONFIG_KEY)
			.await?
			.ok_or_else(|| AuthError::not_found("chef configuration"))
	}

	async fn write_config(&self, input: ChefConfigInput) -> AuthResult<ChefConfig> {
		let _guard = self.config_lock.write().await;
		let mut config: ChefConfig = self.storage.get_json(CONFIG_KEY).await?.unwrap_or_default();
		input.apply(&mut config);
		ChefClient::new(self.http.clone(), &config)?;
		self.storage.put_json(CONFIG_KEY, &config).await?;
		info!(base_url = %config.base_url, "chef config written");
		Ok(config)
	}

	fn maps(&self, kind: &str) -> Option<&PolicyMapStore> {
		match kind {
			"environment" => Some(&self.environments),
			"role" => Some(&self.roles),
			"tag" => Some(&self.tags),
			_ => None,
		}
	}

	async fn node_policies(&self, node: &ChefNode) -> AuthResult<Vec<String>> {
		let mut all = self
			.environments
			.union(std::iter::once(&node.chef_environment))
			.await?;
		all.extend(self.roles.union(&node.roles()).await?);
		all.extend(self.tags.union(node.tags()).await?);
		Ok(policy::sanitize(all))
	}

	fn bounds(&self) -> (TtlBounds, std::time::Duration) {
		let bounds = TtlBounds::compute(self.system.max_lease_ttl(), std::time::Duration::ZERO, None);
		(bounds, bounds.token_ttl(self.system.default_lease_ttl()))
	}

	#[tracing::instrument(skip_all, name = "ChefBackend::login")]
	async fn login(&self, request: &Request, now: DateTime<Utc>) -> AuthResult<Response> {
		let input: ChefLoginInput = request.decode()?;
		if input.client_name.is_empty() {
			return Err(AuthError::bad_request("missing client_name"));
		}
		let config = self.config().await?;
		let client = ChefClient::new(self.http.clone(), &config)?;

		let public_key = client.client_public_key(&input.client_name).await?;
		if let Err(e) = verifier::verify_login(&input, &public_key, &config.login_path, now) {
			warn!(client = %input.client_name, error = %e, "chef login rejected");
			return Err(e);
		}

		let node = client.node(&input.client_name).await?;
		let policies = self.node_policies(&node).await?;
		let (bounds, ttl) = self.bounds();

		let mut metadata = BTreeMap::new();
		metadata.insert("client_name".to_string(), input.client_name.clone());
		metadata.insert("environment".to_string(), node.chef_environment.clone());
		let mut auth = Auth {
			policies,
			metadata,
			ttl,
			max_ttl: bounds.shortest_max,
			renewable: true,
			display_name: input.client_name.clone(),
			..Auth::default()
		};
		auth.set_internal("client_name", input.client_name.clone());
		info!(client = %input.client_name, environment = %node.chef_environment, "chef login succeeded");
		Ok(Response::with_auth(auth))
	}

	/// Re-derive the node's policies; any change refuses the renewal.
	#[tracing::instrument(skip_all, name = "ChefBackend::renew")]
	async fn renew_auth(&self, auth: &Auth) -> AuthResult<Auth> {
		let client_name = auth
			.internal_str("client_name")
			.ok_or_else(|| AuthError::bad_request("auth is missing client_name"))?;
		let config = self.config().await?;
		let client = ChefClient::new(self.http.clone(), &config)?;
		let node = client.node(client_name).await?;
		let policies = self.node_policies(&node).await?;
		if !policy::equivalent(&policies, &auth.policies) {
			warn!(client = %client_name, "chef policies changed since login");
			return Err(AuthError::verification("policies have changed, not renewing"));
		}
		let (bounds, ttl) = self.bounds();
		let mut renewed = auth.clone();
		renewed.ttl = ttl;
		renewed.max_ttl = bounds.shortest_max;
		Ok(renewed)
	}

	#[tracing::instrument(skip_all, fields(op = ?request.operation, path = %request.path), name = "ChefBackend::route")]
	async fn route(&self, request: Request) -> AuthResult<Response> {
		use Operation::*;

		let segments = request.segments();
		match (request.operation, segments.as_slice()) {
			(Create | Update, ["login"]) => self.login(&request, Utc::now()).await,

			(Read, ["config"]) => {
				let _guard = self.config_lock.read().await;
				Ok(match self.storage.get_json::<ChefConfig>(CONFIG_KEY).await? {
					Some(config) => Response::with_data(&config.to_response())?,
					None => Response::empty(),
				})
			}
			(Create | Update, ["config"]) => {
				let config = self.write_config(request.decode()?).await?;
				Response::with_data(&config.to_response())
			}
			(Delete, ["config"]) => {
				let _guard = self.config_lock.write().await;
				self.storage.delete(CONFIG_KEY).await?;
				Ok(Response::empty())
			}

			(op, [kind] | [kind, ""]) if op == List && self.maps(kind).is_some() => {
				let store = self.maps(kind).ok_or_else(|| AuthError::not_found(request.path.clone()))?;
				Ok(Response::list(store.list().await?))
			}
			(op, [kind, name]) if self.maps(kind).is_some() && op != List => {
				let store = self.maps(kind).ok_or_else(|| AuthError::not_found(request.path.clone()))?;
				match op {
					Read => match store.get(name).await? {
						Some(entry) => Response::with_data(&entry),
						None => Ok(Response::empty()),
					},
					Delete => {
						store.delete(name).await?;
						Ok(Response::empty())
					}
					_ => {
						let input: PolicyInput = request.decode()?;
						Response::with_data(&store.put(name, &input.policies).await?)
					}
				}
			}

			_ => Err(AuthError::not_found(format!("{:?} {}", request.operation, request.path))),
		}
	}
}

#[async_trait]
impl Backend for ChefBackend {
	fn backend_type(&self) -> &'static str {
		"chef"
	}

	async fn handle(&self, request: Request) -> AuthResult<Response> {
		self.route(request).await
	}

	async fn renew(&self, auth: &Auth) -> AuthResult<Auth> {
		self.renew_auth(auth).await
	}
}
