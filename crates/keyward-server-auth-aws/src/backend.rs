// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::Utc;
use keyward_server_auth::{
	Auth, AuthError, AuthResult, Backend, Cooldown, Request, Response, RoleStore, Storage,
	SystemView,
};
use std::sync::Arc;

use crate::config::TrustStore;
use crate::credentials::DEFAULT_METADATA_URL;
use crate::instance::{InstanceApiFactory, QueryApiFactory};
use crate::ledger::ReplayLedger;
use crate::role::AwsBindings;
use crate::tidy::TidyWorker;

/// EC2 instance identity and IAM caller identity authentication.
pub struct AwsBackend {
	pub(crate) roles: RoleStore<AwsBindings>,
	pub(crate) trust: TrustStore,
	pub(crate) ledger: Arc<ReplayLedger>,
	pub(crate) tidy: TidyWorker,
	pub(crate) system: Arc<dyn SystemView>,
	pub(crate) http: reqwest::Client,
}

impl AwsBackend {
	/// A backend talking to real AWS endpoints.
	pub fn new(storage: Arc<dyn Storage>, system: Arc<dyn SystemView>) -> AuthResult<Self> {
		let http = keyward_common_http::new_client()
			.map_err(|e| AuthError::internal(format!("failed to build http client: {e}")))?;
		let factory = Arc::new(QueryApiFactory::new(http.clone(), DEFAULT_METADATA_URL));
		Ok(Self::with_factory(storage, system, http, factory))
	}

	/// A backend whose EC2/IAM clients come from `factory`.
	pub fn with_factory(
		storage: Arc<dyn Storage>,
		system: Arc<dyn SystemView>,
		http: reqwest::Client,
		factory: Arc<dyn InstanceApiFactory>,
	) -> Self {
		let ledger = Arc::new(ReplayLedger::new(Arc::clone(&storage)));
		Self {
			roles: RoleStore::new(Arc::clone(&storage)),
			trust: TrustStore::new(Arc::clone(&storage), factory),
			tidy: TidyWorker::new(Arc::clone(&storage), Arc::clone(&ledger), Cooldown::default()),
			ledger,
			system,
			http,
		}
	}

	pub fn roles(&self) -> &RoleStore<AwsBindings> {
		&self.roles
	}

	pub fn trust(&self) -> &TrustStore {
		&self.trust
	}

	pub fn ledger(&self) -> &ReplayLedger {
		&self.ledger
	}

	pub fn tidy(&self) -> &TidyWorker {
		&self.tidy
	}
}

#[async_trait]
impl Backend for AwsBackend {
	fn backend_type(&self) -> &'static str {
		"aws"
	}

	async fn handle(&self, request: Request) -> AuthResult<Response> {
		self.route(request).await
	}

	async fn renew(&self, auth: &Auth) -> AuthResult<Auth> {
		self.renew_auth(auth, Utc::now()).await
	}

	async fn periodic(&self) -> AuthResult<()> {
		self.tidy.periodic(Utc::now()).await
	}
}
