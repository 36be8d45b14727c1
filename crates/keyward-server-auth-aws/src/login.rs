// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Login and renewal for both AWS methods.

use chrono::{DateTime, Utc};
use keyward_server_auth::{
	Auth, AuthError, AuthResult, ClaimValue, PrincipalClaim, ReplayError, Request, Response,
	TtlBounds,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::backend::AwsBackend;
use crate::enforcer;
use crate::instance::DEFAULT_STS_ENDPOINT;
use crate::ledger::LoginAttempt;
use crate::pkcs7;
use crate::role::{AuthType, AwsRole};
use crate::sts::{self, PresignedRequest};

#[derive(Debug, Default, Deserialize)]
struct LoginInput {
	#[serde(default)]
	role: Option<String>,
	#[serde(default)]
	pkcs7: Option<String>,
	#[serde(default)]
	nonce: Option<String>,
	#[serde(default, alias = "iam_http_request_method")]
	method: Option<String>,
	#[serde(default, alias = "iam_request_url")]
	url: Option<String>,
	#[serde(default, alias = "iam_request_body")]
	body: Option<String>,
	#[serde(default, alias = "iam_request_headers")]
	headers: Option<Value>,
}

fn non_empty(value: Option<String>) -> Option<String> {
	value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn require_auth_type(role: &AwsRole, expected: AuthType) -> AuthResult<()> {
	if role.bindings.auth_type != expected {
		return Err(AuthError::bad_request(format!(
			"role {} is not configured for {} authentication",
			role.name,
			expected.as_str()
		)));
	}
	Ok(())
}

fn issue(
	role: &AwsRole,
	policies: Vec<String>,
	bounds: TtlBounds,
	claim: &PrincipalClaim,
) -> Auth {
	let mut metadata = BTreeMap::new();
	metadata.insert("role".to_string(), role.name.clone());
	metadata.insert(
		"auth_type".to_string(),
		role.bindings.auth_type.as_str().to_string(),
	);
	for (key, value) in &claim.attributes {
		if let ClaimValue::Text(text) = value {
			metadata.insert(key.clone(), text.clone());
		}
	}
	Auth {
		policies,
		metadata,
		ttl: bounds.token_ttl(role.ttl),
		max_ttl: bounds.shortest_max,
		period: role.period,
		renewable: true,
		display_name: claim.subject.clone(),
		internal_data: Default::default(),
	}
}

impl AwsBackend {
	pub(crate) async fn login(&self, request: &Request) -> AuthResult<Response> {
		let input: LoginInput = request.decode()?;
		let now = Utc::now();
		if let Some(pkcs7) = non_empty(input.pkcs7.clone()) {
			return self.login_ec2(input, &pkcs7, now).await.map(Response::with_auth);
		}
		if input.method.is_some() || input.url.is_some() {
			return self.login_iam(input).await.map(Response::with_auth);
		}
		Err(AuthError::bad_request(
			"either pkcs7 or a signed iam request must be supplied",
		))
	}

	#[tracing::instrument(skip_all, name = "AwsBackend::login_ec2")]
	async fn login_ec2(&self, input: LoginInput, pkcs7_body: &str, now: DateTime<Utc>) -> AuthResult<Auth> {
		let registered = self.trust.registered_certificates().await?;
		let trusted = pkcs7::trusted_certificates(&registered)?;
		let doc = pkcs7::verify_identity_document(pkcs7_body, &trusted)?;

		let mut claim = doc.to_claim();
		claim.supplied_nonce = input.nonce.clone();
		let role_name = non_empty(input.role).unwrap_or_else(|| doc.image_id.clone());
		let role = self.roles.require(&role_name).await?;
		require_auth_type(&role, AuthType::Ec2)?;

		let binding = enforcer::enforce_ec2(&doc, &role, &self.trust, &self.ledger).await?;
		claim.supplied_role_tag_value = binding.tag_value.clone();

		let tag_max_ttl = binding.tag.as_ref().map(|t| t.max_ttl);
		let bounds = TtlBounds::compute(self.system.max_lease_ttl(), role.max_ttl, tag_max_ttl);
		let tag = binding.tag.as_ref();
		let attempt = LoginAttempt {
			instance_id: &doc.instance_id,
			role: &role.name,
			nonce: claim.supplied_nonce.as_deref().unwrap_or_default(),
			pending_time: doc.pending_time,
			allow_instance_migration: role.bindings.allow_instance_migration
				|| tag.is_some_and(|t| t.allow_instance_migration),
			disallow_reauthentication: role.bindings.disallow_reauthentication
				|| tag.is_some_and(|t| t.disallow_reauthentication),
			retention: bounds.longest_max,
			role_tag_max_ttl: tag_max_ttl.unwrap_or(Duration::ZERO),
		};
		self.ledger.admit(&attempt, now).await?;

		let mut auth = issue(&role, binding.policies(&role), bounds, &claim);
		auth.metadata.remove("pending_time");
		if let Some(max_ttl) = tag_max_ttl.filter(|d| !d.is_zero()) {
			auth.metadata
				.insert("role_tag_max_ttl".to_string(), max_ttl.as_secs().to_string());
		}
		auth.set_internal("auth_type", AuthType::Ec2.as_str());
		auth.set_internal("instance_id", doc.instance_id.clone());
		auth.set_internal("region", doc.region.clone());
		auth.set_internal("account_id", doc.account_id.clone());
		if let Some(tag_value) = &binding.tag_value {
			auth.set_internal("role_tag_value", tag_value.clone());
		}
		info!(role = %role.name, instance_id = %doc.instance_id, "ec2 login succeeded");
		Ok(auth)
	}

	fn sts_endpoint(configured: &str) -> AuthResult<Url> {
		let raw = if configured.is_empty() {
			DEFAULT_STS_ENDPOINT
		} else {
			configured
		};
		Url::parse(raw).map_err(|e| AuthError::internal(format!("invalid sts endpoint {raw:?}: {e}")))
	}

	#[tracing::instrument(skip_all, name = "AwsBackend::login_iam")]
	async fn login_iam(&self, input: LoginInput) -> AuthResult<Auth> {
		let method = input.method.as_deref().unwrap_or("POST");
		let url = input
			.url
			.as_deref()
			.ok_or_else(|| AuthError::bad_request("missing request url"))?;
		let body = input
			.body
			.as_deref()
			.ok_or_else(|| AuthError::bad_request("missing request body"))?;
		let headers = input.headers.clone().unwrap_or(Value::Null);
		let presigned = PresignedRequest::from_login_fields(method, url, body, &headers)?;

		let config = self.trust.client_config().await?;
		let endpoint = Self::sts_endpoint(&config.sts_endpoint)?;
		let identity = sts::verify_caller_identity(
			&self.http,
			&presigned,
			&endpoint,
			Some(config.iam_server_id_header_value.as_str()),
		)
		.await?;
		let entity = identity.entity()?;
		let claim = identity.to_claim(&entity);

		let role_name = non_empty(input.role).unwrap_or_else(|| entity.friendly_name.clone());
		let role = self.roles.require(&role_name).await?;
		require_auth_type(&role, AuthType::Iam)?;
		enforcer::enforce_iam(&entity, &role)?;

		let bounds = TtlBounds::compute(self.system.max_lease_ttl(), role.max_ttl, None);
		let mut auth = issue(&role, role.policies.clone(), bounds, &claim);
		auth.display_name = entity.friendly_name.clone();
		auth.set_internal("auth_type", AuthType::Iam.as_str());
		auth.set_internal("canonical_arn", entity.canonical_arn());
		info!(role = %role.name, principal = %entity.canonical_arn(), "iam login succeeded");
		Ok(auth)
	}

	pub(crate) async fn renew_auth(&self, auth: &Auth, now: DateTime<Utc>) -> AuthResult<Auth> {
		let role_name = auth
			.metadata
			.get("role")
			.ok_or_else(|| AuthError::bad_request("auth has no role"))?;
		let role = self.roles.require(role_name).await?;

		match auth.internal_str("auth_type") {
			Some("ec2") => self.renew_ec2(auth, &role, now).await,
			Some("iam") => self.renew_iam(auth, &role),
			Some(other) => Err(AuthError::internal(format!("unknown auth_type {other:?} in auth"))),
			None => Err(AuthError::internal("auth has no auth_type")),
		}
	}

	#[tracing::instrument(skip_all, fields(role = %role.name), name = "AwsBackend::renew_ec2")]
	async fn renew_ec2(&self, auth: &Auth, role: &AwsRole, now: DateTime<Utc>) -> AuthResult<Auth> {
		require_auth_type(role, AuthType::Ec2)?;
		let internal = |key: &str| {
			auth.internal_str(key)
				.ok_or_else(|| AuthError::bad_request(format!("auth is missing {key}")))
		};
		let instance_id = internal("instance_id")?;
		let region = internal("region")?;
		let account_id = auth.internal_str("account_id").unwrap_or_default();

		let api = self.trust.instance_api(region, account_id).await?;
		let instance = api.describe_instance(instance_id).await?;
		if !instance.is_running() {
			debug!(instance_id, state = %instance.state, "renewal refused");
			return Err(AuthError::verification("instance is not in running state"));
		}
		if let Some(tag_value) = auth.internal_str("role_tag_value") {
			if self.ledger.is_blacklisted(tag_value).await? {
				return Err(ReplayError::TagBlacklisted.into());
			}
		}

		let entry = self
			.ledger
			.whitelist_entry(instance_id)
			.await?
			.ok_or_else(|| AuthError::not_found(format!("whitelist entry for {instance_id}")))?;
		let tag_max = Some(entry.role_tag_max_ttl).filter(|d| !d.is_zero());
		let bounds = TtlBounds::compute(self.system.max_lease_ttl(), role.max_ttl, tag_max);
		self.ledger.refresh(instance_id, bounds.longest_max, now).await?;

		let mut renewed = auth.clone();
		renewed.ttl = bounds.token_ttl(role.ttl);
		renewed.max_ttl = bounds.shortest_max;
		renewed.period = role.period;
		Ok(renewed)
	}

	fn renew_iam(&self, auth: &Auth, role: &AwsRole) -> AuthResult<Auth> {
		require_auth_type(role, AuthType::Iam)?;
		let canonical = auth
			.internal_str("canonical_arn")
			.ok_or_else(|| AuthError::bad_request("auth is missing canonical_arn"))?;
		if role.bindings.bound_iam_principal_arn != canonical {
			return Err(AuthError::binding("bound_iam_principal_arn"));
		}
		let bounds = TtlBounds::compute(self.system.max_lease_ttl(), role.max_ttl, None);
		let mut renewed = auth.clone();
		renewed.ttl = bounds.token_ttl(role.ttl);
		renewed.max_ttl = bounds.shortest_max;
		renewed.period = role.period;
		Ok(renewed)
	}
}
