// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AWS credential sources.
//!
//! Credentials resolve in order: keys configured on the backend, the process
//! environment, then the EC2 instance metadata service. When a client cache
//! entry names a role ARN, the resolved credentials are exchanged for that
//! role through STS and refreshed before they lapse.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyward_common_secret::SecretString;
use keyward_server_auth::{AuthError, AuthResult};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::query::{self, QueryTarget};

/// Lifetime requested for assumed-role credentials.
pub const ASSUMED_ROLE_DURATION: Duration = Duration::from_secs(15 * 60);

/// Credentials are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254";

#[derive(Debug, Clone)]
pub struct Credentials {
	pub access_key_id: String,
	pub secret_access_key: SecretString,
	pub session_token: Option<String>,
	pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
	pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
		Self {
			access_key_id: access_key_id.into(),
			secret_access_key: SecretString::new(secret_access_key.into()),
			session_token: None,
			expires_at: None,
		}
	}

	fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
		let margin = chrono::Duration::from_std(REFRESH_MARGIN).unwrap_or_default();
		matches!(self.expires_at, Some(at) if at - margin <= now)
	}
}

#[async_trait]
pub trait CredentialsProvider: Send + Sync {
	fn name(&self) -> &'static str;

	async fn credentials(&self) -> AuthResult<Credentials>;
}

/// Keys from `config/client`.
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
	pub fn new(credentials: Credentials) -> Self {
		Self(credentials)
	}
}

#[async_trait]
impl CredentialsProvider for StaticCredentials {
	fn name(&self) -> &'static str {
		"static"
	}

	async fn credentials(&self) -> AuthResult<Credentials> {
		Ok(self.0.clone())
	}
}

/// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and optional `AWS_SESSION_TOKEN`.
pub struct EnvironmentCredentials;

#[async_trait]
impl CredentialsProvider for EnvironmentCredentials {
	fn name(&self) -> &'static str {
		"environment"
	}

	async fn credentials(&self) -> AuthResult<Credentials> {
		let access_key = std::env::var("AWS_ACCESS_KEY_ID").ok().filter(|v| !v.is_empty());
		let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok().filter(|v| !v.is_empty());
		match (access_key, secret_key) {
			(Some(access_key), Some(secret_key)) => {
				let mut creds = Credentials::new(access_key, secret_key);
				creds.session_token = std::env::var("AWS_SESSION_TOKEN").ok().filter(|v| !v.is_empty());
				Ok(creds)
			}
			_ => Err(AuthError::not_found("AWS credentials in environment")),
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataCredentials {
	access_key_id: String,
	secret_access_key: String,
	token: Option<String>,
	expiration: Option<DateTime<Utc>>,
}

/// Role credentials from the EC2 instance metadata service (IMDSv2 with v1 fallback).
pub struct InstanceMetadataCredentials {
	http: reqwest::Client,
	base_url: String,
}

impl InstanceMetadataCredentials {
	pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
		Self {
			http,
			base_url: base_url.into().trim_end_matches('/').to_string(),
		}
	}

	async fn session_token(&self) -> Option<String> {
		let response = self
			.http
			.put(format!("{}/latest/api/token", self.base_url))
			.header("X-aws-ec2-metadata-token-ttl-seconds", "21600")
			.send()
			.await
			.ok()?;
		if !response.status().is_success() {
			return None;
		}
		response.text().await.ok()
	}

	async fn get(&self, path: &str, token: Option<&str>) -> AuthResult<String> {
		let mut request = self.http.get(format!("{}{path}", self.base_url));
		if let Some(token) = token {
			request = request.header("X-aws-ec2-metadata-token", token);
		}
		let response = request
			.send()
			.await
			.map_err(|e| AuthError::upstream("instance metadata", e.to_string()))?;
		if !response.status().is_success() {
			return Err(AuthError::upstream(
				"instance metadata",
				format!("{path} returned {}", response.status()),
			));
		}
		response
			.text()
			.await
			.map_err(|e| AuthError::upstream("instance metadata", e.to_string()))
	}
}

#[async_trait]
impl CredentialsProvider for InstanceMetadataCredentials {
	fn name(&self) -> &'static str {
		"instance-metadata"
	}

	async fn credentials(&self) -> AuthResult<Credentials> {
		let token = self.session_token().await;
		let listing = self
			.get("/latest/meta-data/iam/security-credentials/", token.as_deref())
			.await?;
		let role = listing
			.lines()
			.map(str::trim)
			.find(|l| !l.is_empty())
			.ok_or_else(|| AuthError::not_found("instance profile role"))?;
		let body = self
			.get(
				&format!("/latest/meta-data/iam/security-credentials/{role}"),
				token.as_deref(),
			)
			.await?;
		let parsed: MetadataCredentials = serde_json::from_str(&body)
			.map_err(|e| AuthError::upstream("instance metadata", e.to_string()))?;
		Ok(Credentials {
			access_key_id: parsed.access_key_id,
			secret_access_key: SecretString::new(parsed.secret_access_key),
			session_token: parsed.token,
			expires_at: parsed.expiration,
		})
	}
}

/// The first provider that yields credentials wins.
pub struct CredentialChain {
	providers: Vec<Arc<dyn CredentialsProvider>>,
}

impl CredentialChain {
	pub fn new(providers: Vec<Arc<dyn CredentialsProvider>>) -> Self {
		Self { providers }
	}

	/// Static keys when both are set, then environment, then instance metadata.
	pub fn standard(
		http: reqwest::Client,
		access_key: &str,
		secret_key: &str,
		metadata_url: &str,
	) -> Self {
		let mut providers: Vec<Arc<dyn CredentialsProvider>> = Vec::new();
		if !access_key.is_empty() && !secret_key.is_empty() {
			providers.push(Arc::new(StaticCredentials::new(Credentials::new(
				access_key, secret_key,
			))));
		}
		providers.push(Arc::new(EnvironmentCredentials));
		providers.push(Arc::new(InstanceMetadataCredentials::new(http, metadata_url)));
		Self::new(providers)
	}
}

#[async_trait]
impl CredentialsProvider for CredentialChain {
	fn name(&self) -> &'static str {
		"chain"
	}

	async fn credentials(&self) -> AuthResult<Credentials> {
		for provider in &self.providers {
			match provider.credentials().await {
				Ok(creds) => {
					debug!(provider = provider.name(), "resolved AWS credentials");
					return Ok(creds);
				}
				Err(e) => debug!(provider = provider.name(), error = %e, "credential source unavailable"),
			}
		}
		Err(AuthError::upstream(
			"aws",
			"no credentials available from configuration, environment or instance metadata",
		))
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResponse {
	assume_role_result: AssumeRoleResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResult {
	credentials: AssumedCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumedCredentials {
	access_key_id: String,
	secret_access_key: String,
	session_token: String,
	expiration: DateTime<Utc>,
}

/// Credentials for `role_arn`, obtained with `base` and cached until near expiry.
pub struct AssumeRoleCredentials {
	http: reqwest::Client,
	base: Arc<dyn CredentialsProvider>,
	role_arn: String,
	sts: QueryTarget,
	cached: Mutex<Option<Credentials>>,
}

impl AssumeRoleCredentials {
	pub fn new(
		http: reqwest::Client,
		base: Arc<dyn CredentialsProvider>,
		role_arn: impl Into<String>,
		sts_endpoint: Url,
	) -> Self {
		Self {
			http,
			base,
			role_arn: role_arn.into(),
			sts: QueryTarget::new(sts_endpoint, "us-east-1", "sts"),
			cached: Mutex::new(None),
		}
	}

	fn cached(&self, now: DateTime<Utc>) -> Option<Credentials> {
		let guard = match self.cached.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		guard.as_ref().filter(|c| !c.needs_refresh(now)).cloned()
	}

	fn store(&self, creds: Credentials) {
		let mut guard = match self.cached.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		*guard = Some(creds);
	}
}

#[async_trait]
impl CredentialsProvider for AssumeRoleCredentials {
	fn name(&self) -> &'static str {
		"assume-role"
	}

	#[tracing::instrument(skip(self), fields(role_arn = %self.role_arn), name = "AssumeRoleCredentials::credentials")]
	async fn credentials(&self) -> AuthResult<Credentials> {
		let now = Utc::now();
		if let Some(creds) = self.cached(now) {
			return Ok(creds);
		}

		let base = self.base.credentials().await?;
		let session_name = format!("keyward-{}", now.timestamp());
		let duration = ASSUMED_ROLE_DURATION.as_secs().to_string();
		let body = query::call(
			&self.http,
			&self.sts,
			&base,
			&[
				("Action", "AssumeRole"),
				("Version", "2011-06-15"),
				("RoleArn", &self.role_arn),
				("RoleSessionName", &session_name),
				("DurationSeconds", &duration),
			],
		)
		.await?;
		let parsed: AssumeRoleResponse = query::parse_xml("sts", &body)?;
		let assumed = parsed.assume_role_result.credentials;
		let creds = Credentials {
			access_key_id: assumed.access_key_id,
			secret_access_key: SecretString::new(assumed.secret_access_key),
			session_token: Some(assumed.session_token),
			expires_at: Some(assumed.expiration),
		};
		info!(expires_at = %assumed.expiration, "assumed role credentials refreshed");
		self.store(creds.clone());
		Ok(creds)
	}
}
