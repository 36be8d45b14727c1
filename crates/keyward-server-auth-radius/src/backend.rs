// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use keyward_common_secret::SecretString;
use keyward_server_auth::{
	policy, Auth, AuthError, AuthResult, Backend, Operation, PolicyMapStore, Request, Response,
	Storage, StorageExt, SystemView, TtlBounds,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::client::{self, Outcome};
use crate::config::{RadiusConfig, RadiusConfigInput, CONFIG_KEY};

#[derive(Debug, Deserialize)]
struct LoginInput {
	#[serde(default)]
	username: String,
	password: SecretString,
}

#[derive(Debug, Deserialize)]
struct UserInput {
	#[serde(default, deserialize_with = "keyward_server_auth::fields::string_list::deserialize")]
	policies: Vec<String>,
}

/// Username/password authentication against a RADIUS server.
pub struct RadiusBackend {
	storage: Arc<dyn Storage>,
	config_lock: RwLock<()>,
	users: PolicyMapStore,
	system: Arc<dyn SystemView>,
}

impl RadiusBackend {
	pub fn new(storage: Arc<dyn Storage>, system: Arc<dyn SystemView>) -> Self {
		Self {
			users: PolicyMapStore::new(Arc::clone(&storage), "users/"),
			config_lock: RwLock::new(()),
			storage,
			system,
		}
	}

	async fn config(&self) -> AuthResult<RadiusConfig> {
		let _guard = self.config_lock.read().await;
		self.storage
			.get_json(CONFIG_KEY)
			.await?
			.ok_or_else(|| AuthError::not_found("radius configuration"))
	}

	/// Registered users get their own entry; everyone else the configured
	/// fallback. An empty result means the user may not log in.
	async fn user_policies(&self, config: &RadiusConfig, username: &str) -> AuthResult<Vec<String>> {
		let raw = match self.users.get(username).await? {
			Some(entry) => entry.policies,
			None => config.unregistered_user_policies.clone(),
		};
		if raw.is_empty() {
			return Ok(Vec::new());
		}
		Ok(policy::sanitize(raw))
	}

	fn ttls(&self) -> (Duration, Duration) {
		let bounds = TtlBounds::compute(self.system.max_lease_ttl(), Duration::ZERO, None);
		(bounds.token_ttl(self.system.default_lease_ttl()), bounds.shortest_max)
	}

	#[tracing::instrument(skip_all, name = "RadiusBackend::login")]
	async fn login(&self, request: &Request, path_username: Option<&str>) -> AuthResult<Response> {
		let input: LoginInput = request.decode()?;
		let username = path_username.unwrap_or(&input.username).trim().to_string();
		if username.is_empty() {
			return Err(AuthError::bad_request("missing username"));
		}
		if input.password.is_empty() {
			return Err(AuthError::bad_request("missing password"));
		}
		let config = self.config().await?;

		match client::authenticate(&config, &username, &input.password).await? {
			Outcome::Accepted => {}
			Outcome::Rejected => {
				warn!(%username, "radius access rejected");
				return Err(AuthError::verification("access rejected"));
			}
			Outcome::Challenged => {
				warn!(%username, "radius access challenge");
				return Err(AuthError::verification("access challenge is not supported"));
			}
		}

		let policies = self.user_policies(&config, &username).await?;
		if policies.is_empty() {
			warn!(%username, "radius user has no policies");
			return Err(AuthError::verification("user has no associated policies"));
		}

		let (ttl, max_ttl) = self.ttls();
		let mut metadata = BTreeMap::new();
		metadata.insert("username".to_string(), username.clone());
		let mut auth = Auth {
			policies,
			metadata,
			ttl,
			max_ttl,
			renewable: true,
			display_name: username.clone(),
			..Auth::default()
		};
		auth.set_internal("username", username.clone());
		info!(%username, "radius login succeeded");
		Ok(Response::with_auth(auth))
	}

	#[tracing::instrument(skip_all, name = "RadiusBackend::renew")]
	async fn renew_auth(&self, auth: &Auth) -> AuthResult<Auth> {
		let username = auth
			.internal_str("username")
			.or_else(|| auth.metadata.get("username").map(String::as_str))
			.ok_or_else(|| AuthError::bad_request("auth is missing username"))?;
		let config = self.config().await?;
		let policies = self.user_policies(&config, username).await?;
		if !policy::equivalent(&policies, &auth.policies) {
			warn!(%username, "radius policies changed since login");
			return Err(AuthError::verification("policies have changed, not renewing"));
		}
		let (ttl, max_ttl) = self.ttls();
		let mut renewed = auth.clone();
		renewed.ttl = ttl;
		renewed.max_ttl = max_ttl;
		Ok(renewed)
	}

	#[tracing::instrument(skip_all, fields(op = ?request.operation, path = %request.path), name = "RadiusBackend::route")]
	async fn route(&self, request: Request) -> AuthResult<Response> {
		use Operation::*;

		let segments = request.segments();
		match (request.operation, segments.as_slice()) {
			(Create | Update, ["login"]) => self.login(&request, None).await,
			(Create | Update, ["login", username]) => self.login(&request, Some(*username)).await,

			(Read, ["config"]) => {
				let _guard = self.config_lock.read().await;
				Ok(match self.storage.get_json::<RadiusConfig>(CONFIG_KEY).await? {
					Some(config) => Response::with_data(&config.to_response())?,
					None => Response::empty(),
				})
			}
			(Create | Update, ["config"]) => {
				let input: RadiusConfigInput = request.decode()?;
				let _guard = self.config_lock.write().await;
				let mut config: RadiusConfig = self.storage.get_json(CONFIG_KEY).await?.unwrap_or_default();
				input.apply(&mut config)?;
				self.storage.put_json(CONFIG_KEY, &config).await?;
				info!(host = %config.host, port = config.port, "radius config written");
				Response::with_data(&config.to_response())
			}
			(Delete, ["config"]) => {
				let _guard = self.config_lock.write().await;
				self.storage.delete(CONFIG_KEY).await?;
				Ok(Response::empty())
			}

			(List, ["users"] | ["users", ""]) => Ok(Response::list(self.users.list().await?)),
			(Read, ["users", name]) => match self.users.get(name).await? {
				Some(entry) => Response::with_data(&entry),
				None => Ok(Response::empty()),
			},
			(Create | Update, ["users", name]) => {
				let input: UserInput = request.decode()?;
				Response::with_data(&self.users.put(name, &input.policies).await?)
			}
			(Delete, ["users", name]) => {
				self.users.delete(name).await?;
				Ok(Response::empty())
			}

			_ => Err(AuthError::not_found(format!("{:?} {}", request.operation, request.path))),
		}
	}
}

#[async_trait]
impl Backend for RadiusBackend {
	fn backend_type(&self) -> &'static str {
		"radius"
	}

	async fn handle(&self, request: Request) -> AuthResult<Response> {
		self.route(request).await
	}

	async fn renew(&self, auth: &Auth) -> AuthResult<Auth> {
		self.renew_auth(auth).await
	}
}
