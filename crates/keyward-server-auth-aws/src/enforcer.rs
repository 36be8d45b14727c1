// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Checks a verified identity against the role it asks for.

use keyward_server_auth::{policy, AuthError, AuthResult, ReplayError};
use tracing::debug;

use crate::arn::{self, IamEntity};
use crate::config::TrustStore;
use crate::instance::InstanceDescription;
use crate::ledger::ReplayLedger;
use crate::pkcs7::IdentityDocument;
use crate::role::AwsRole;
use crate::tag::RoleTag;

/// What an EC2 login resolved to beyond the role itself.
#[derive(Debug, Default)]
pub struct Ec2Binding {
	pub tag: Option<RoleTag>,
	pub tag_value: Option<String>,
	pub instance: Option<InstanceDescription>,
}

impl Ec2Binding {
	/// Policies granted: the tag's when it names any, else the role's.
	pub fn policies(&self, role: &AwsRole) -> Vec<String> {
		match &self.tag {
			Some(tag) if !tag.policies.is_empty() => policy::sanitize(&tag.policies),
			_ => role.policies.clone(),
		}
	}
}

fn require_equal(attribute: &str, bound: &str, actual: &str) -> AuthResult<()> {
	if !bound.is_empty() && bound != actual {
		debug!(attribute, bound, actual, "binding mismatch");
		return Err(AuthError::binding(attribute));
	}
	Ok(())
}

/// Enforce EC2 bindings. Instance lookups happen only when a binding needs them.
#[tracing::instrument(skip_all, fields(role = %role.name, instance_id = %doc.instance_id), name = "enforcer::enforce_ec2")]
pub async fn enforce_ec2(
	doc: &IdentityDocument,
	role: &AwsRole,
	trust: &TrustStore,
	ledger: &ReplayLedger,
) -> AuthResult<Ec2Binding> {
	let b = &role.bindings;
	require_equal("bound_ami_id", &b.bound_ami_id, &doc.image_id)?;
	require_equal("bound_account_id", &b.bound_account_id, &doc.account_id)?;
	require_equal("bound_region", &b.bound_region, &doc.region)?;
	require_equal("bound_ec2_instance_id", &b.bound_ec2_instance_id, &doc.instance_id)?;

	let needs_instance = !b.bound_vpc_id.is_empty()
		|| !b.bound_subnet_id.is_empty()
		|| !b.bound_iam_role_arn.is_empty()
		|| !b.bound_iam_instance_profile_arn.is_empty()
		|| !b.role_tag.is_empty();
	if !needs_instance {
		return Ok(Ec2Binding::default());
	}

	let api = trust.instance_api(&doc.region, &doc.account_id).await?;
	let instance = api.describe_instance(&doc.instance_id).await?;
	require_equal("bound_vpc_id", &b.bound_vpc_id, &instance.vpc_id)?;
	require_equal("bound_subnet_id", &b.bound_subnet_id, &instance.subnet_id)?;

	if !b.bound_iam_instance_profile_arn.is_empty() || !b.bound_iam_role_arn.is_empty() {
		let profile_arn = instance
			.iam_instance_profile_arn
			.as_deref()
			.ok_or_else(|| AuthError::verification("instance has no IAM instance profile"))?;

		if !b.bound_iam_instance_profile_arn.is_empty() {
			let bound = arn::canonicalize(&b.bound_iam_instance_profile_arn)?;
			let actual = arn::canonicalize(profile_arn)?;
			require_equal("bound_iam_instance_profile_arn", &bound, &actual)?;
		}

		if !b.bound_iam_role_arn.is_empty() {
			let roles = api.instance_profile_roles(profile_arn).await?;
			let matched = roles
				.iter()
				.filter_map(|r| arn::canonicalize(r).ok())
				.any(|r| r == b.bound_iam_role_arn);
			if !matched {
				return Err(AuthError::binding("bound_iam_role_arn"));
			}
		}
	}

	let mut binding = Ec2Binding::default();
	if !b.role_tag.is_empty() {
		let value = instance
			.tags
			.get(&b.role_tag)
			.cloned()
			.ok_or_else(|| AuthError::binding("role_tag"))?;
		if ledger.is_blacklisted(&value).await? {
			return Err(ReplayError::TagBlacklisted.into());
		}
		let tag = RoleTag::verify(&value, &role.hmac_key()?)?;
		check_tag(&tag, role, &doc.instance_id)?;
		binding.tag = Some(tag);
		binding.tag_value = Some(value);
	}
	binding.instance = Some(instance);
	Ok(binding)
}

/// A verified tag must name this role and instance and stay within the role's policies.
pub fn check_tag(tag: &RoleTag, role: &AwsRole, instance_id: &str) -> AuthResult<()> {
	if tag.role != role.name {
		return Err(AuthError::InvalidTag("tag names a different role".to_string()));
	}
	if !tag.instance_id.is_empty() && tag.instance_id != instance_id {
		return Err(AuthError::binding("instance_id"));
	}
	if !tag.policies.is_empty() && !policy::is_subset(&policy::sanitize(&tag.policies), &role.policies) {
		return Err(AuthError::binding("policies"));
	}
	Ok(())
}

/// The STS-reported principal must match the role's bound principal.
pub fn enforce_iam(entity: &IamEntity, role: &AwsRole) -> AuthResult<()> {
	let canonical = entity.canonical_arn();
	if role.bindings.bound_iam_principal_arn != canonical {
		debug!(
			bound = %role.bindings.bound_iam_principal_arn,
			actual = %canonical,
			"principal binding mismatch"
		);
		return Err(AuthError::binding("bound_iam_principal_arn"));
	}
	Ok(())
}
