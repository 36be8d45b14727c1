// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! IAM principal ARNs and their canonical form.
//!
//! Bindings compare principals by canonical ARN, which drops the IAM path and
//! maps an STS assumed-role session back to the role it was assumed from.

use keyward_server_auth::{AuthError, AuthResult};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
	User,
	Role,
	AssumedRole,
	InstanceProfile,
}

impl EntityType {
	fn parse(value: &str) -> Option<Self> {
		match value {
			"user" => Some(Self::User),
			"role" => Some(Self::Role),
			"assumed-role" => Some(Self::AssumedRole),
			"instance-profile" => Some(Self::InstanceProfile),
			_ => None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::User => "user",
			Self::Role => "role",
			Self::AssumedRole => "assumed-role",
			Self::InstanceProfile => "instance-profile",
		}
	}
}

/// A parsed IAM or STS principal ARN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IamEntity {
	pub partition: String,
	pub account_number: String,
	pub entity_type: EntityType,
	pub path: String,
	pub friendly_name: String,
	pub session_info: String,
}

impl IamEntity {
	pub fn parse(arn: &str) -> AuthResult<Self> {
		let invalid = || AuthError::bad_request(format!("unrecognized arn {arn:?}"));

		let parts: Vec<&str> = arn.split(':').collect();
		if parts.len() != 6 || parts[0] != "arn" {
			return Err(invalid());
		}
		let (partition, service, account) = (parts[1], parts[2], parts[4]);
		if partition.is_empty() || account.is_empty() {
			return Err(invalid());
		}

		let resource: Vec<&str> = parts[5].split('/').collect();
		if resource.len() < 2 {
			return Err(invalid());
		}
		let entity_type = EntityType::parse(resource[0]).ok_or_else(invalid)?;

		let (path, friendly_name, session_info) = match (service, entity_type) {
			("sts", EntityType::AssumedRole) => {
				if resource.len() != 3 {
					return Err(invalid());
				}
				(String::new(), resource[1], resource[2].to_string())
			}
			("iam", EntityType::User | EntityType::Role | EntityType::InstanceProfile) => {
				let last = resource.len() - 1;
				(resource[1..last].join("/"), resource[last], String::new())
			}
			_ => return Err(invalid()),
		};
		if friendly_name.is_empty() {
			return Err(invalid());
		}

		Ok(Self {
			partition: partition.to_string(),
			account_number: account.to_string(),
			entity_type,
			path,
			friendly_name: friendly_name.to_string(),
			session_info,
		})
	}

	/// `arn:<partition>:iam::<account>:<type>/<name>`, with assumed roles
	/// reported as the underlying role.
	pub fn canonical_arn(&self) -> String {
		let entity_type = match self.entity_type {
			EntityType::AssumedRole => EntityType::Role,
			other => other,
		};
		format!(
			"arn:{}:iam::{}:{}/{}",
			self.partition,
			self.account_number,
			entity_type.as_str(),
			self.friendly_name
		)
	}
}

impl fmt::Display for IamEntity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.canonical_arn())
	}
}

/// Canonicalize an ARN supplied as a role binding.
pub fn canonicalize(arn: &str) -> AuthResult<String> {
	IamEntity::parse(arn).map(|e| e.canonical_arn())
}
