// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use keyward_common_secret::SecretString;
use keyward_server_auth::{
	policy, Auth, AuthError, AuthResult, Backend, Operation, Request, Response, Storage,
	StorageExt, SystemView, TtlBounds,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{HttpBasicConfig, HttpBasicConfigInput, CONFIG_KEY};
use crate::verifier;

#[derive(Debug, Deserialize)]
struct LoginInput {
	#[serde(default, alias = "urlusername")]
	username: String,
	password: SecretString,
}

/// Delegates password checks to an HTTP endpoint protected by Basic auth.
pub struct HttpBasicBackend {
	storage: Arc<dyn Storage>,
	config_lock: RwLock<()>,
	system: Arc<dyn SystemView>,
	http: reqwest::Client,
}

impl HttpBasicBackend {
	pub fn new(storage: Arc<dyn Storage>, system: Arc<dyn SystemView>) -> AuthResult<Self> {
		let http = keyward_common_http::new_client_with_timeout(verifier::ATTEMPT_TIMEOUT)
			.map_err(|e| AuthError::internal(format!("failed to build http client: {e}")))?;
		Ok(Self::with_http(storage, system, http))
	}

	pub fn with_http(storage: Arc<dyn Storage>, system: Arc<dyn SystemView>, http: reqwest::Client) -> Self {
		Self {
			storage,
			config_lock: RwLock::new(()),
			system,
			http,
		}
	}

	async fn config(&self) -> AuthResult<Option<HttpBasicConfig>> {
		let _guard = self.config_lock.read().await;
		self.storage.get_json(CONFIG_KEY).await
	}

	fn ttls(&self) -> (Duration, Duration) {
		let bounds = TtlBounds::compute(self.system.max_lease_ttl(), Duration::ZERO, None);
		(bounds.token_ttl(self.system.default_lease_ttl()), bounds.shortest_max)
	}

	#[tracing::instrument(skip_all, name = "HttpBasicBackend::login")]
	async fn login(&self, request: &Request, path_username: Option<&str>) -> AuthResult<Response> {
		let input: LoginInput = request.decode()?;
		let username = path_username.unwrap_or(&input.username).trim().to_string();
		if username.is_empty() {
			return Err(AuthError::bad_request("missing username"));
		}
		if input.password.is_empty() {
			return Err(AuthError::bad_request("missing password"));
		}
		let config = self
			.config()
			.await?
			.ok_or_else(|| AuthError::not_found("http basic configuration"))?;

		if let Err(e) = verifier::verify(&self.http, &config.url, &username, &input.password).await {
			warn!(%username, error = %e, "http basic login rejected");
			return Err(e);
		}

		let (ttl, max_ttl) = self.ttls();
		let mut metadata = BTreeMap::new();
		metadata.insert("username".to_string(), username.clone());
		let auth = Auth {
			policies: policy::sanitize(&config.policies),
			metadata,
			ttl,
			max_ttl,
			renewable: true,
			display_name: username.clone(),
			..Auth::default()
		};
		info!(%username, "http basic login succeeded");
		Ok(Response::with_auth(auth))
	}

	#[tracing::instrument(skip_all, name = "HttpBasicBackend::renew")]
	async fn renew_auth(&self, auth: &Auth) -> AuthResult<Auth> {
		let config = self
			.config()
			.await?
			.ok_or_else(|| AuthError::not_found("http basic configuration"))?;
		if !policy::equivalent(&config.policies, &auth.policies) {
			return Err(AuthError::verification("policies have changed, not renewing"));
		}
		let (ttl, max_ttl) = self.ttls();
		let mut renewed = auth.clone();
		renewed.ttl = ttl;
		renewed.max_ttl = max_ttl;
		Ok(renewed)
	}

	#[tracing::instrument(skip_all, fields(op = ?request.operation, path = %request.path), name = "HttpBasicBackend::route")]
	async fn route(&self, request: Request) -> AuthResult<Response> {
		use Operation::*;

		let segments = request.segments();
		match (request.operation, segments.as_slice()) {
			(Create | Update, ["login"]) => self.login(&request, None).await,
			(Create | Update, ["login", username]) => self.login(&request, Some(*username)).await,

			(Read, ["config"]) => Ok(match self.config().await? {
				Some(config) => Response::with_data(&config)?,
				None => Response::empty(),
			}),
			(Create | Update, ["config"]) => {
				let input: HttpBasicConfigInput = request.decode()?;
				let _guard = self.config_lock.write().await;
				let mut config: HttpBasicConfig = self.storage.get_json(CONFIG_KEY).await?.unwrap_or_default();
				input.apply(&mut config)?;
				self.storage.put_json(CONFIG_KEY, &config).await?;
				info!(url = %config.url, "http basic config written");
				Response::with_data(&config)
			}
			(Delete, ["config"]) => {
				let _guard = self.config_lock.write().await;
				self.storage.delete(CONFIG_KEY).await?;
				Ok(Response::empty())
			}

			_ => Err(AuthError::not_found(format!("{:?} {}", request.operation, request.path))),
		}
	}
}

#[async_trait]
impl Backend for HttpBasicBackend {
	fn backend_type(&self) -> &'static str {
		"httpbasic"
	}

	async fn handle(&self, request: Request) -> AuthResult<Response> {
		self.route(request).await
	}

	async fn renew(&self, auth: &Auth) -> AuthResult<Auth> {
		self.renew_auth(auth).await
	}
}
