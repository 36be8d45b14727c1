// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host-wide lease limits handed to every backend.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{parse_duration, ConfigError};

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(768 * 3600);

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SystemConfigLayer {
	/// Humantime string, e.g. `"1h"`.
	pub default_lease_ttl: Option<String>,
	pub max_lease_ttl: Option<String>,
}

impl SystemConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.default_lease_ttl.is_some() {
			self.default_lease_ttl = other.default_lease_ttl;
		}
		if other.max_lease_ttl.is_some() {
			self.max_lease_ttl = other.max_lease_ttl;
		}
	}

	pub fn finalize(self) -> Result<SystemConfig, ConfigError> {
		let default_lease_ttl = match self.default_lease_ttl {
			Some(v) => parse_duration("system.default_lease_ttl", &v)?,
			None => DEFAULT_LEASE_TTL,
		};
		let max_lease_ttl = match self.max_lease_ttl {
			Some(v) => parse_duration("system.max_lease_ttl", &v)?,
			None => DEFAULT_LEASE_TTL,
		};
		Ok(SystemConfig {
			default_lease_ttl,
			max_lease_ttl,
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemConfig {
	pub default_lease_ttl: Duration,
	pub max_lease_ttl: Duration,
}

impl Default for SystemConfig {
	fn default() -> Self {
		Self {
			default_lease_ttl: DEFAULT_LEASE_TTL,
			max_lease_ttl: DEFAULT_LEASE_TTL,
		}
	}
}
