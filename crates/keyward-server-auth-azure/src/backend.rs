// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use keyward_server_auth::{
	policy, Auth, AuthError, AuthMethod, AuthResult, Backend, Operation, PrincipalClaim, Request,
	Response, RoleStore, Storage, StorageExt, SystemView, TtlBounds,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::arm::{ArmClient, VirtualMachine};
use crate::config::{AzureConfig, AzureConfigInput, CONFIG_KEY};
use crate::enforcer;
use crate::oidc::OidcProvider;
use crate::role::{AzureBindings, AzureRole, AzureRoleInput};

#[derive(Debug, Deserialize)]
struct LoginInput {
	#[serde(default)]
	role: String,
	#[serde(default)]
	jwt: String,
	#[serde(default)]
	subscription_id: String,
	#[serde(default)]
	resource_group_name: String,
	#[serde(default)]
	vm_name: String,
}

/// Upstream clients derived from the stored config; rebuilt on config writes.
struct Clients {
	provider: Arc<OidcProvider>,
	arm: Arc<ArmClient>,
}

/// Azure managed identity authentication.
pub struct AzureBackend {
	storage: Arc<dyn Storage>,
	roles: RoleStore<AzureBindings>,
	config_lock: RwLock<()>,
	clients: RwLock<Option<Arc<Clients>>>,
	system: Arc<dyn SystemView>,
	http: reqwest::Client,
}

impl AzureBackend {
	pub fn new(storage: Arc<dyn Storage>, system: Arc<dyn SystemView>) -> AuthResult<Self> {
		let http = keyward_common_http::new_client()
			.map_err(|e| AuthError::internal(format!("failed to build http client: {e}")))?;
		Ok(Self::with_http(storage, system, http))
	}

	pub fn with_http(storage: Arc<dyn Storage>, system: Arc<dyn SystemView>, http: reqwest::Client) -> Self {
		Self {
			roles: RoleStore::new(Arc::clone(&storage)),
			config_lock: RwLock::new(()),
			clients: RwLock::new(None),
			storage,
			system,
			http,
		}
	}

	pub fn roles(&self) -> &RoleStore<AzureBindings> {
		&self.roles
	}

	async fn config(&self) -> AuthResult<AzureConfig> {
		let _guard = self.config_lock.read().await;
		self.storage
			.get_json(CONFIG_KEY)
			.await?
			.ok_or_else(|| AuthError::not_found("azure configuration"))
	}

	async fn clients(&self, config: &AzureConfig) -> AuthResult<Arc<Clients>> {
		if let Some(clients) = self.clients.read().await.as_ref() {
			return Ok(Arc::clone(clients));
		}
		let mut slot = self.clients.write().await;
		if let Some(clients) = slot.as_ref() {
			return Ok(Arc::clone(clients));
		}
		let provider = OidcProvider::discover(self.http.clone(), &config.issuer()).await?;
		let clients = Arc::new(Clients {
			provider: Arc::new(provider),
			arm: Arc::new(ArmClient::new(self.http.clone(), config)),
		});
		*slot = Some(Arc::clone(&clients));
		Ok(clients)
	}

	fn ttls(&self, role: &AzureRole) -> (std::time::Duration, std::time::Duration) {
		let bounds = TtlBounds::compute(self.system.max_lease_ttl(), role.max_ttl, None);
		(bounds.token_ttl(role.ttl), bounds.shortest_max)
	}

	#[tracing::instrument(skip_all, name = "AzureBackend::login")]
	async fn login(&self, request: &Request) -> AuthResult<Response> {
		let input: LoginInput = request.decode()?;
		if input.role.is_empty() {
			return Err(AuthError::bad_request("role is required"));
		}
		if input.jwt.is_empty() {
			return Err(AuthError::bad_request("jwt is required"));
		}
		let config = self.config().await?;
		let role = self.roles.require(&input.role).await?;
		let clients = self.clients(&config).await?;

		let identity = clients.provider.verify(&input.jwt, &config.resource).await?;
		let mut claim = PrincipalClaim::new(AuthMethod::AzureMsi, identity.oid.clone())
			.with_candidate_role(role.name.clone())
			.with_list("groups", identity.groups.clone());
		for (key, value) in [
			("subscription_id", &input.subscription_id),
			("resource_group_name", &input.resource_group_name),
			("vm_name", &input.vm_name),
		] {
			if !value.is_empty() {
				claim = claim.with_text(key, value.clone());
			}
		}

		let vm: Option<VirtualMachine> = if input.vm_name.is_empty() {
			None
		} else {
			if input.subscription_id.is_empty() || input.resource_group_name.is_empty() {
				return Err(AuthError::bad_request(
					"subscription_id and resource_group_name are required with vm_name",
				));
			}
			let vm = clients
				.arm
				.virtual_machine(&input.subscription_id, &input.resource_group_name, &input.vm_name)
				.await?;
			claim = claim.with_text("location", vm.location.clone());
			if let Some(subscription) = vm.subscription_id() {
				claim = claim.with_text("subscription_id", subscription.to_string());
			}
			if let Some(group) = vm.resource_group() {
				claim = claim.with_text("resource_group_name", group.to_string());
			}
			Some(vm)
		};

		if let Err(e) = enforcer::enforce_login(&claim, &role.bindings, vm.as_ref()) {
			warn!(role = %role.name, oid = %claim.subject, error = %e, "azure login rejected");
			return Err(e);
		}

		let (ttl, max_ttl) = self.ttls(&role);
		let mut metadata = BTreeMap::new();
		metadata.insert("role".to_string(), role.name.clone());
		for key in ["subscription_id", "resource_group_name", "vm_name"] {
			if let Some(value) = claim.text(key) {
				metadata.insert(key.to_string(), value.to_string());
			}
		}
		let mut auth = Auth {
			policies: role.policies.clone(),
			metadata,
			ttl,
			max_ttl,
			period: role.period,
			renewable: true,
			display_name: identity.oid.clone(),
			..Auth::default()
		};
		auth.set_internal("role", role.name.clone());
		auth.set_internal("oid", identity.oid.clone());
		auth.set_internal("groups", identity.groups.clone());
		info!(role = %role.name, oid = %identity.oid, "azure login succeeded");
		Ok(Response::with_auth(auth))
	}

	/// Renewal uses the identity captured at login; the VM is not re-read.
	#[tracing::instrument(skip_all, name = "AzureBackend::renew")]
	async fn renew_auth(&self, auth: &Auth) -> AuthResult<Auth> {
		let role_name = auth
			.internal_str("role")
			.ok_or_else(|| AuthError::bad_request("auth is missing role"))?;
		let role = self
			.roles
			.get(role_name)
			.await?
			.ok_or_else(|| AuthError::not_found(format!("role {role_name:?} no longer exists")))?;
		if !policy::equivalent(&role.policies, &auth.policies) {
			return Err(AuthError::verification("policies have changed, not renewing"));
		}

		let oid = auth
			.internal_str("oid")
			.ok_or_else(|| AuthError::bad_request("auth is missing oid"))?;
		let groups: Vec<String> = match auth.internal_data.get("groups") {
			Some(Value::Array(values)) => values
				.iter()
				.filter_map(Value::as_str)
				.map(str::to_string)
				.collect(),
			_ => Vec::new(),
		};
		let claim = PrincipalClaim::new(AuthMethod::AzureMsi, oid).with_list("groups", groups);
		enforcer::enforce_identity(&claim, &role.bindings)?;

		let (ttl, max_ttl) = self.ttls(&role);
		let mut renewed = auth.clone();
		renewed.ttl = ttl;
		renewed.max_ttl = max_ttl;
		renewed.period = role.period;
		Ok(renewed)
	}

	#[tracing::instrument(skip_all, fields(op = ?request.operation, path = %request.path), name = "AzureBackend::route")]
	async fn route(&self, request: Request) -> AuthResult<Response> {
		use Operation::*;

		let segments = request.segments();
		match (request.operation, segments.as_slice()) {
			(Create | Update, ["login"]) => self.login(&request).await,

			(Read, ["config"]) => {
				let _guard = self.config_lock.read().await;
				Ok(match self.storage.get_json::<AzureConfig>(CONFIG_KEY).await? {
					Some(config) => Response::with_data(&config.to_response())?,
					None => Response::empty(),
				})
			}
			(Create | Update, ["config"]) => {
				let input: AzureConfigInput = request.decode()?;
				let _guard = self.config_lock.write().await;
				let mut config: AzureConfig = self.storage.get_json(CONFIG_KEY).await?.unwrap_or_default();
				input.apply(&mut config)?;
				self.storage.put_json(CONFIG_KEY, &config).await?;
				*self.clients.write().await = None;
				info!(tenant = %config.tenant_id, "azure config written");
				Response::with_data(&config.to_response())
			}
			(Delete, ["config"]) => {
				let _guard = self.config_lock.write().await;
				self.storage.delete(CONFIG_KEY).await?;
				*self.clients.write().await = None;
				Ok(Response::empty())
			}

			(List, ["role" | "roles"] | ["role" | "roles", ""]) => Ok(Response::list(self.roles.list().await?)),
			(Read, ["role", name]) => match self.roles.get(name).await? {
				Some(role) => Response::with_data(&role.to_response()?),
				None => Ok(Response::empty()),
			},
			(Create | Update, ["role", name]) => {
				let input: AzureRoleInput = request.decode()?;
				let (role, _) = self.roles.create_or_update(name, |role| input.apply(role)).await?;
				Response::with_data(&role.to_response()?)
			}
			(Delete, ["role", name]) => {
				self.roles.delete(name).await?;
				Ok(Response::empty())
			}

			_ => Err(AuthError::not_found(format!("{:?} {}", request.operation, request.path))),
		}
	}
}

#[async_trait]
impl Backend for AzureBackend {
	fn backend_type(&self) -> &'static str {
		"azure"
	}

	async fn handle(&self, request: Request) -> AuthResult<Response> {
		self.route(request).await
	}

	async fn renew(&self, auth: &Auth) -> AuthResult<Auth> {
		self.renew_auth(auth).await
	}
}
