// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use keyward_server_auth::fields::{opt_duration, opt_string_list};
use keyward_server_auth::{AuthError, AuthResult, Bindings, RoleBinding};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureBindings {
	#[serde(default)]
	pub bound_service_principal_ids: Vec<String>,
	#[serde(default)]
	pub bound_group_ids: Vec<String>,
	#[serde(default)]
	pub bound_subscription_ids: Vec<String>,
	#[serde(default)]
	pub bound_resource_groups: Vec<String>,
	#[serde(default)]
	pub bound_locations: Vec<String>,
}

pub type AzureRole = RoleBinding<AzureBindings>;

impl AzureBindings {
	/// Whether the login must name a VM so its ARM record can be checked.
	pub fn needs_vm(&self) -> bool {
		!self.bound_subscription_ids.is_empty()
			|| !self.bound_resource_groups.is_empty()
			|| !self.bound_locations.is_empty()
	}
}

impl Bindings for AzureBindings {
	fn validate(&self, _creating: bool) -> AuthResult<()> {
		if self.bound_service_principal_ids.is_empty()
			&& self.bound_group_ids.is_empty()
			&& self.bound_subscription_ids.is_empty()
			&& self.bound_resource_groups.is_empty()
			&& self.bound_locations.is_empty()
		{
			return Err(AuthError::bad_request(
				"must have at least one bound constraint when creating/updating a role",
			));
		}
		Ok(())
	}
}

#[derive(Debug, Default, Deserialize)]
pub struct AzureRoleInput {
	#[serde(default, deserialize_with = "opt_string_list::deserialize")]
	pub policies: Option<Vec<String>>,
	#[serde(default, with = "opt_duration")]
	pub ttl: Option<Duration>,
	#[serde(default, with = "opt_duration")]
	pub max_ttl: Option<Duration>,
	#[serde(default, with = "opt_duration")]
	pub period: Option<Duration>,
	#[serde(default, deserialize_with = "opt_string_list::deserialize")]
	pub bound_service_principal_ids: Option<Vec<String>>,
	#[serde(default, deserialize_with = "opt_string_list::deserialize")]
	pub bound_group_ids: Option<Vec<String>>,
	#[serde(default, deserialize_with = "opt_string_list::deserialize")]
	pub bound_subscription_ids: Option<Vec<String>>,
	#[serde(default, deserialize_with = "opt_string_list::deserialize")]
	pub bound_resource_groups: Option<Vec<String>>,
	#[serde(default, deserialize_with = "opt_string_list::deserialize")]
	pub bound_locations: Option<Vec<String>>,
}

impl AzureRoleInput {
	pub fn apply(self, role: &mut AzureRole) -> AuthResult<()> {
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
		for (input, target) in [
			(self.bound_service_principal_ids, &mut b.bound_service_principal_ids),
			(self.bound_group_ids, &mut b.bound_group_ids),
			(self.bound_subscription_ids, &mut b.bound_subscription_ids),
			(self.bound_resource_groups, &mut b.bound_resource_groups),
			(self.bound_locations, &mut b.bound_locations),
		] {
			if let Some(values) = input {
				*target = values;
			}
		}
		Ok(())
	}
}
