// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AWS role bindings and their write inputs.

use keyward_server_auth::fields::{opt_duration, opt_string_list};
use keyward_server_auth::{AuthError, AuthResult, Bindings, RoleBinding};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::arn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
	#[default]
	Ec2,
	Iam,
}

impl AuthType {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuthType::Ec2 => "ec2",
			AuthType::Iam => "iam",
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsBindings {
	#[serde(default)]
	pub auth_type: AuthType,
	#[serde(default)]
	pub bound_ami_id: String,
	#[serde(default)]
	pub bound_account_id: String,
	#[serde(default)]
	pub bound_region: String,
	#[serde(default)]
	pub bound_vpc_id: String,
	#[serde(default)]
	pub bound_subnet_id: String,
	#[serde(default)]
	pub bound_ec2_instance_id: String,
	/// Canonical role ARN the instance profile must carry.
	#[serde(default)]
	pub bound_iam_role_arn: String,
	#[serde(default)]
	pub bound_iam_instance_profile_arn: String,
	/// Canonical principal ARN for IAM logins.
	#[serde(default)]
	pub bound_iam_principal_arn: String,
	/// Name of the EC2 tag that must carry a role tag.
	#[serde(default)]
	pub role_tag: String,
	#[serde(default)]
	pub allow_instance_migration: bool,
	#[serde(default)]
	pub disallow_reauthentication: bool,
}

pub type AwsRole = RoleBinding<AwsBindings>;

impl AwsBindings {
	fn has_ec2_bindings(&self) -> bool {
		!self.bound_ami_id.is_empty()
			|| !self.bound_account_id.is_empty()
			|| !self.bound_region.is_empty()
			|| !self.bound_vpc_id.is_empty()
			|| !self.bound_subnet_id.is_empty()
			|| !self.bound_ec2_instance_id.is_empty()
			|| !self.bound_iam_role_arn.is_empty()
			|| !self.bound_iam_instance_profile_arn.is_empty()
	}

	fn ec2_only_fields_set(&self) -> Option<&'static str> {
		[
			("bound_ami_id", !self.bound_ami_id.is_empty()),
			("bound_account_id", !self.bound_account_id.is_empty()),
			("bound_region", !self.bound_region.is_empty()),
			("bound_vpc_id", !self.bound_vpc_id.is_empty()),
			("bound_subnet_id", !self.bound_subnet_id.is_empty()),
			("bound_ec2_instance_id", !self.bound_ec2_instance_id.is_empty()),
			("bound_iam_role_arn", !self.bound_iam_role_arn.is_empty()),
			(
				"bound_iam_instance_profile_arn",
				!self.bound_iam_instance_profile_arn.is_empty(),
			),
			("role_tag", !self.role_tag.is_empty()),
			("allow_instance_migration", self.allow_instance_migration),
			("disallow_reauthentication", self.disallow_reauthentication),
		]
		.into_iter()
		.find_map(|(name, set)| set.then_some(name))
	}
}

impl Bindings for AwsBindings {
	fn validate(&self, _creating: bool) -> AuthResult<()> {
		match self.auth_type {
			AuthType::Ec2 => {
				if !self.bound_iam_principal_arn.is_empty() {
					return Err(AuthError::bad_request(
						"bound_iam_principal_arn is only valid for auth_type iam",
					));
				}
				if !self.has_ec2_bindings() {
					return Err(AuthError::bad_request(
						"at least one bound parameter must be specified on the role",
					));
				}
				if self.allow_instance_migration && self.disallow_reauthentication {
					return Err(AuthError::bad_request(
						"allow_instance_migration and disallow_reauthentication are mutually exclusive",
					));
				}
			}
			AuthType::Iam => {
				if self.bound_iam_principal_arn.is_empty() {
					return Err(AuthError::bad_request(
						"bound_iam_principal_arn is required for auth_type iam",
					));
				}
				if let Some(field) = self.ec2_only_fields_set() {
					return Err(AuthError::bad_request(format!(
						"{field} is only valid for auth_type ec2"
					)));
				}
			}
		}
		Ok(())
	}
}

/// Fields accepted by `role/<name>` writes. Absent fields keep their value.
#[derive(Debug, Default, Deserialize)]
pub struct AwsRoleInput {
	#[serde(default, deserialize_with = "opt_string_list::deserialize")]
	pub policies: Option<Vec<String>>,
	#[serde(default, with = "opt_duration")]
	pub ttl: Option<Duration>,
	#[serde(default, with = "opt_duration")]
	pub max_ttl: Option<Duration>,
	#[serde(default, with = "opt_duration")]
	pub period: Option<Duration>,
	pub auth_type: Option<AuthType>,
	pub bound_ami_id: Option<String>,
	pub bound_account_id: Option<String>,
	pub bound_region: Option<String>,
	pub bound_vpc_id: Option<String>,
	pub bound_subnet_id: Option<String>,
	pub bound_ec2_instance_id: Option<String>,
	pub bound_iam_role_arn: Option<String>,
	pub bound_iam_instance_profile_arn: Option<String>,
	pub bound_iam_principal_arn: Option<String>,
	pub role_tag: Option<String>,
	pub allow_instance_migration: Option<bool>,
	pub disallow_reauthentication: Option<bool>,
}

fn canonical_or_empty(value: String) -> AuthResult<String> {
	if value.is_empty() {
		Ok(value)
	} else {
		arn::canonicalize(&value)
	}
}

impl AwsRoleInput {
	pub fn apply(self, role: &mut AwsRole) -> AuthResult<()> {
		if let Some(policies) = self.policies {
			role.policies = policies;
		}
		if let Some(ttl) = self.ttl {
			role.ttl = ttl;
		}
		if let Some(max_ttl) = self.max_ttl {
			role.max_ttl = max_ttl;
		}
		if let Some(period) = self.period {
			role.period = period;
		}

		let b = &mut role.bindings;
		if let Some(auth_type) = self.auth_type {
			b.auth_type = auth_type;
		}
		if let Some(v) = self.bound_ami_id {
			b.bound_ami_id = v;
		}
		if let Some(v) = self.bound_account_id {
			b.bound_account_id = v;
		}
		if let Some(v) = self.bound_region {
			b.bound_region = v;
		}
		if let Some(v) = self.bound_vpc_id {
			b.bound_vpc_id = v;
		}
		if let Some(v) = self.bound_subnet_id {
			b.bound_subnet_id = v;
		}
		if let Some(v) = self.bound_ec2_instance_id {
			b.bound_ec2_instance_id = v;
		}
		if let Some(v) = self.bound_iam_role_arn {
			b.bound_iam_role_arn = canonical_or_empty(v)?;
		}
		if let Some(v) = self.bound_iam_instance_profile_arn {
			if !v.is_empty() {
				arn::IamEntity::parse(&v)?;
			}
			b.bound_iam_instance_profile_arn = v;
		}
		if let Some(v) = self.bound_iam_principal_arn {
			b.bound_iam_principal_arn = canonical_or_empty(v)?;
		}
		if let Some(v) = self.role_tag {
			if v.len() > 127 {
				return Err(AuthError::bad_request("role_tag must be at most 127 characters"));
			}
			b.role_tag = v;
		}
		if let Some(v) = self.allow_instance_migration {
			b.allow_instance_migration = v;
		}
		if let Some(v) = self.disallow_reauthentication {
			b.disallow_reauthentication = v;
		}
		Ok(())
	}
}

/// Fields accepted by `role/<name>/tag`.
#[derive(Debug, Default, Deserialize)]
pub struct RoleTagInput {
	#[serde(default, deserialize_with = "opt_string_list::deserialize")]
	pub policies: Option<Vec<String>>,
	#[serde(default, with = "opt_duration")]
	pub max_ttl: Option<Duration>,
	#[serde(default)]
	pub instance_id: String,
	#[serde(default)]
	pub disallow_reauthentication: bool,
	#[serde(default)]
	pub allow_instance_migration: bool,
}
