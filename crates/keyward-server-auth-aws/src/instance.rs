// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! EC2 and IAM lookups used to enforce instance bindings.

use async_trait::async_trait;
use keyward_server_auth::{AuthError, AuthResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::arn::{EntityType, IamEntity};
use crate::client_cache::ClientCacheKey;
use crate::config::ClientConfig;
use crate::credentials::{AssumeRoleCredentials, CredentialChain, CredentialsProvider};
use crate::query::{self, QueryTarget};

pub const INSTANCE_STATE_RUNNING: &str = "running";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceDescription {
	pub instance_id: String,
	pub image_id: String,
	pub state: String,
	pub vpc_id: String,
	pub subnet_id: String,
	pub iam_instance_profile_arn: Option<String>,
	pub tags: BTreeMap<String, String>,
}

impl InstanceDescription {
	pub fn is_running(&self) -> bool {
		self.state == INSTANCE_STATE_RUNNING
	}
}

/// Instance and instance-profile lookups for one region and credential set.
#[async_trait]
pub trait InstanceApi: Send + Sync {
	async fn describe_instance(&self, instance_id: &str) -> AuthResult<InstanceDescription>;

	/// ARNs of the roles attached to an instance profile.
	async fn instance_profile_roles(&self, profile_arn: &str) -> AuthResult<Vec<String>>;
}

/// Builds API clients for client cache misses. Must not perform I/O.
pub trait InstanceApiFactory: Send + Sync {
	fn build(&self, key: &ClientCacheKey, config: &ClientConfig) -> AuthResult<Arc<dyn InstanceApi>>;
}

/// EC2 wraps repeated elements in `<item>`.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ItemSet<T> {
	#[serde(default)]
	item: Vec<T>,
}

impl<T> Default for ItemSet<T> {
	fn default() -> Self {
		Self { item: Vec::new() }
	}
}

#[derive(Debug, Deserialize)]
struct DescribeInstancesResponse {
	#[serde(rename = "reservationSet", default)]
	reservation_set: ItemSet<Reservation>,
}

#[derive(Debug, Deserialize)]
struct Reservation {
	#[serde(rename = "instancesSet", default)]
	instances_set: ItemSet<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
	instance_id: String,
	#[serde(default)]
	image_id: String,
	instance_state: InstanceState,
	#[serde(default)]
	vpc_id: String,
	#[serde(default)]
	subnet_id: String,
	iam_instance_profile: Option<InstanceProfileRef>,
	#[serde(default)]
	tag_set: ItemSet<Tag>,
}

#[derive(Debug, Deserialize)]
struct InstanceState {
	name: String,
}

#[derive(Debug, Deserialize)]
struct InstanceProfileRef {
	arn: String,
}

#[derive(Debug, Deserialize)]
struct Tag {
	key: String,
	#[serde(default)]
	value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetInstanceProfileResponse {
	get_instance_profile_result: GetInstanceProfileResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetInstanceProfileResult {
	instance_profile: InstanceProfile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceProfile {
	#[serde(default)]
	roles: Members,
}

#[derive(Debug, Default, Deserialize)]
struct Members {
	#[serde(default)]
	member: Vec<RoleMember>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoleMember {
	arn: String,
}

fn parse_describe_instances(body: &str, instance_id: &str) -> AuthResult<InstanceDescription> {
	let parsed: DescribeInstancesResponse = query::parse_xml("ec2", body)?;
	let instance = parsed
		.reservation_set
		.item
		.into_iter()
		.flat_map(|r| r.instances_set.item)
		.find(|i| i.instance_id == instance_id)
		.ok_or_else(|| AuthError::verification("instance not found"))?;
	Ok(InstanceDescription {
		instance_id: instance.instance_id,
		image_id: instance.image_id,
		state: instance.instance_state.name,
		vpc_id: instance.vpc_id,
		subnet_id: instance.subnet_id,
		iam_instance_profile_arn: instance.iam_instance_profile.map(|p| p.arn),
		tags: instance
			.tag_set
			.item
			.into_iter()
			.map(|t| (t.key, t.value))
			.collect(),
	})
}

fn parse_instance_profile(body: &str) -> AuthResult<Vec<String>> {
	let parsed: GetInstanceProfileResponse = query::parse_xml("iam", body)?;
	Ok(parsed
		.get_instance_profile_result
		.instance_profile
		.roles
		.member
		.into_iter()
		.map(|m| m.arn)
		.collect())
}

/// [`InstanceApi`] over the EC2 and IAM query APIs.
pub struct QueryInstanceApi {
	http: reqwest::Client,
	credentials: Arc<dyn CredentialsProvider>,
	ec2: QueryTarget,
	iam: QueryTarget,
}

impl QueryInstanceApi {
	pub fn new(
		http: reqwest::Client,
		credentials: Arc<dyn CredentialsProvider>,
		ec2: QueryTarget,
		iam: QueryTarget,
	) -> Self {
		Self {
			http,
			credentials,
			ec2,
			iam,
		}
	}
}

#[async_trait]
impl InstanceApi for QueryInstanceApi {
	#[tracing::instrument(skip(self), fields(region = %self.ec2.region), name = "QueryInstanceApi::describe_instance")]
	async fn describe_instance(&self, instance_id: &str) -> AuthResult<InstanceDescription> {
		let creds = self.credentials.credentials().await?;
		let body = query::call(
			&self.http,
			&self.ec2,
			&creds,
			&[
				("Action", "DescribeInstances"),
				("Version", "2016-11-15"),
				("InstanceId.1", instance_id),
			],
		)
		.await?;
		let description = parse_describe_instances(&body, instance_id)?;
		debug!(state = %description.state, "described instance");
		Ok(description)
	}

	#[tracing::instrument(skip(self), name = "QueryInstanceApi::instance_profile_roles")]
	async fn instance_profile_roles(&self, profile_arn: &str) -> AuthResult<Vec<String>> {
		let profile = IamEntity::parse(profile_arn)?;
		if profile.entity_type != EntityType::InstanceProfile {
			return Err(AuthError::bad_request(format!(
				"{profile_arn} is not an instance profile"
			)));
		}
		let creds = self.credentials.credentials().await?;
		let body = query::call(
			&self.http,
			&self.iam,
			&creds,
			&[
				("Action", "GetInstanceProfile"),
				("Version", "2010-05-08"),
				("InstanceProfileName", &profile.friendly_name),
			],
		)
		.await?;
		parse_instance_profile(&body)
	}
}

pub const DEFAULT_IAM_ENDPOINT: &str = "https://iam.amazonaws.com/";
pub const DEFAULT_STS_ENDPOINT: &str = "https://sts.amazonaws.com/";

pub fn default_ec2_endpoint(region: &str) -> String {
	if region.starts_with("cn-") {
		format!("https://ec2.{region}.amazonaws.com.cn/")
	} else {
		format!("https://ec2.{region}.amazonaws.com/")
	}
}

fn endpoint(configured: &str, default: &str) -> AuthResult<Url> {
	let raw = if configured.is_empty() { default } else { configured };
	Url::parse(raw).map_err(|e| AuthError::bad_request(format!("invalid endpoint {raw:?}: {e}")))
}

/// Builds [`QueryInstanceApi`] clients from the stored client configuration.
pub struct QueryApiFactory {
	http: reqwest::Client,
	metadata_url: String,
}

impl QueryApiFactory {
	pub fn new(http: reqwest::Client, metadata_url: impl Into<String>) -> Self {
		Self {
			http,
			metadata_url: metadata_url.into(),
		}
	}
}

impl InstanceApiFactory for QueryApiFactory {
	fn build(&self, key: &ClientCacheKey, config: &ClientConfig) -> AuthResult<Arc<dyn InstanceApi>> {
		let ec2 = endpoint(&config.endpoint, &default_ec2_endpoint(&key.region))?;
		let iam = endpoint(&config.iam_endpoint, DEFAULT_IAM_ENDPOINT)?;

		let mut credentials: Arc<dyn CredentialsProvider> = Arc::new(CredentialChain::standard(
			self.http.clone(),
			&config.access_key,
			&config.secret_key,
			&self.metadata_url,
		));
		if !key.assumed_role_arn.is_empty() {
			let sts = endpoint(&config.sts_endpoint, DEFAULT_STS_ENDPOINT)?;
			credentials = Arc::new(AssumeRoleCredentials::new(
				self.http.clone(),
				credentials,
				key.assumed_role_arn.clone(),
				sts,
			));
		}

		Ok(Arc::new(QueryInstanceApi::new(
			self.http.clone(),
			credentials,
			QueryTarget::new(ec2, key.region.clone(), "ec2"),
			QueryTarget::new(iam, "us-east-1", "iam"),
		)))
	}
}
