// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Matches a verified managed identity against an Azure role.

use keyward_server_auth::{AuthError, AuthResult, PrincipalClaim};

use crate::arm::VirtualMachine;
use crate::role::AzureBindings;

fn contains(bound: &[String], value: &str) -> bool {
	bound.iter().any(|b| b.eq_ignore_ascii_case(value))
}

fn check(bound: &[String], value: Option<&str>, attribute: &'static str) -> AuthResult<()> {
	if bound.is_empty() {
		return Ok(());
	}
	match value {
		Some(value) if contains(bound, value) => Ok(()),
		_ => Err(AuthError::binding(attribute)),
	}
}

/// Checks that need only the token: principal and group membership.
pub fn enforce_identity(claim: &PrincipalClaim, bindings: &AzureBindings) -> AuthResult<()> {
	check(
		&bindings.bound_service_principal_ids,
		Some(claim.subject.as_str()),
		"bound_service_principal_ids",
	)?;
	if !bindings.bound_group_ids.is_empty()
		&& !claim
			.list("groups")
			.iter()
			.any(|g| contains(&bindings.bound_group_ids, g))
	{
		return Err(AuthError::binding("bound_group_ids"));
	}
	Ok(())
}

/// Full login-time enforcement. `vm` is the ARM record of the named VM,
/// when one was named. Subscription, resource group and location bindings
/// are checked against that record, never against request fields.
pub fn enforce_login(
	claim: &PrincipalClaim,
	bindings: &AzureBindings,
	vm: Option<&VirtualMachine>,
) -> AuthResult<()> {
	enforce_identity(claim, bindings)?;
	let vm = match vm {
		Some(vm) => vm,
		None if bindings.needs_vm() => {
			return Err(AuthError::bad_request(
				"vm_name is required for roles bound to subscriptions, resource groups or locations",
			));
		}
		None => return Ok(()),
	};

	if !vm.has_principal(&claim.subject) {
		return Err(AuthError::verification(
			"token object id does not match virtual machine identity",
		));
	}
	check(
		&bindings.bound_subscription_ids,
		vm.subscription_id(),
		"bound_subscription_ids",
	)?;
	check(
		&bindings.bound_resource_groups,
		vm.resource_group(),
		"bound_resource_groups",
	)?;
	check(
		&bindings.bound_locations,
		Some(vm.location.as_str()),
		"bound_locations",
	)
}
