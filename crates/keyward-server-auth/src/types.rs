// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Normalized identity claims and the auth result handed back to the host.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::fields::duration_secs;

/// Authentication methods served by keyward backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
	Ec2InstanceIdentity,
	IamCallerIdentity,
	ChefNode,
	RadiusUser,
	AzureMsi,
	HttpBasic,
}

impl AuthMethod {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuthMethod::Ec2InstanceIdentity => "ec2-instance-identity",
			AuthMethod::IamCallerIdentity => "iam-caller-identity",
			AuthMethod::ChefNode => "chef-node",
			AuthMethod::RadiusUser => "radius-user",
			AuthMethod::AzureMsi => "azure-msi",
			AuthMethod::HttpBasic => "http-basic",
		}
	}
}

impl fmt::Display for AuthMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A single- or multi-valued claim attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
	Text(String),
	List(Vec<String>),
}

/// Identity statement produced by a verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalClaim {
	pub method: AuthMethod,
	pub subject: String,
	pub candidate_role_name: Option<String>,
	pub attributes: BTreeMap<String, ClaimValue>,
	pub supplied_nonce: Option<String>,
	pub supplied_role_tag_value: Option<String>,
}

impl PrincipalClaim {
	pub fn new(method: AuthMethod, subject: impl Into<String>) -> Self {
		Self {
			method,
			subject: subject.into(),
			candidate_role_name: None,
			attributes: BTreeMap::new(),
			supplied_nonce: None,
			supplied_role_tag_value: None,
		}
	}

	pub fn with_text(mut self, key: &str, value: impl Into<String>) -> Self {
		self.attributes
			.insert(key.to_string(), ClaimValue::Text(value.into()));
		self
	}

	pub fn with_list(mut self, key: &str, values: Vec<String>) -> Self {
		self.attributes
			.insert(key.to_string(), ClaimValue::List(values));
		self
	}

	pub fn with_candidate_role(mut self, role: impl Into<String>) -> Self {
		self.candidate_role_name = Some(role.into());
		self
	}

	pub fn text(&self, key: &str) -> Option<&str> {
		match self.attributes.get(key) {
			Some(ClaimValue::Text(v)) => Some(v.as_str()),
			_ => None,
		}
	}

	pub fn list(&self, key: &str) -> &[String] {
		match self.attributes.get(key) {
			Some(ClaimValue::List(v)) => v.as_slice(),
			_ => &[],
		}
	}
}

/// Result of a successful login or renewal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Auth {
	pub policies: Vec<String>,
	pub metadata: BTreeMap<String, String>,
	#[serde(with = "duration_secs")]
	pub ttl: Duration,
	#[serde(default, with = "duration_secs")]
	pub max_ttl: Duration,
	#[serde(default, with = "duration_secs")]
	pub period: Duration,
	pub renewable: bool,
	pub display_name: String,
	#[serde(default)]
	pub internal_data: Map<String, Value>,
}

impl Auth {
	pub fn internal_str(&self, key: &str) -> Option<&str> {
		self.internal_data.get(key).and_then(Value::as_str)
	}

	pub fn set_internal(&mut self, key: &str, value: impl Into<Value>) {
		self.internal_data.insert(key.to_string(), value.into());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn claim_accessors() {
		let claim = PrincipalClaim::new(AuthMethod::AzureMsi, "oid-1")
			.with_text("location", "westus")
			.with_list("groups", vec!["g1".into(), "g2".into()]);
		assert_eq!(claim.text("location"), Some("westus"));
		assert_eq!(claim.list("groups").len(), 2);
		assert!(claim.list("location").is_empty());
		assert!(claim.text("groups").is_none());
	}

	#[test]
	fn method_serializes_kebab_case() {
		let json = serde_json::to_string(&AuthMethod::Ec2InstanceIdentity).unwrap();
		assert_eq!(json, "\"ec2-instance-identity\"");
		assert_eq!(AuthMethod::HttpBasic.to_string(), "http-basic");
	}

	#[test]
	fn auth_roundtrips_through_json() {
		let mut auth = Auth {
			policies: vec!["default".into()],
			ttl: Duration::from_secs(60),
			renewable: true,
			..Default::default()
		};
		auth.set_internal("instance_id", "i-1");
		let json = serde_json::to_value(&auth).unwrap();
		assert_eq!(json["ttl"], 60);
		let back: Auth = serde_json::from_value(json).unwrap();
		assert_eq!(back.internal_str("instance_id"), Some("i-1"));
	}
}
