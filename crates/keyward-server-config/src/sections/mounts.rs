// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Auth backends mounted under `/v1/auth/<path>`.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMethod {
	Aws,
	Chef,
	Radius,
	Azure,
	Httpbasic,
}

impl MountMethod {
	pub fn as_str(&self) -> &'static str {
		match self {
			MountMethod::Aws => "aws",
			MountMethod::Chef => "chef",
			MountMethod::Radius => "radius",
			MountMethod::Azure => "azure",
			MountMethod::Httpbasic => "httpbasic",
		}
	}
}

impl fmt::Display for MountMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for MountMethod {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_lowercase().as_str() {
			"aws" => Ok(MountMethod::Aws),
			"chef" => Ok(MountMethod::Chef),
			"radius" => Ok(MountMethod::Radius),
			"azure" => Ok(MountMethod::Azure),
			"httpbasic" | "http-basic" => Ok(MountMethod::Httpbasic),
			other => Err(ConfigError::invalid("mounts.method", format!("unknown method '{other}'"))),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MountConfig {
	pub path: String,
	pub method: MountMethod,
}

impl MountConfig {
	/// Parse the env form: comma-separated `path=method` pairs, where a bare
	/// method mounts at its own name.
	pub fn parse_list(value: &str) -> Result<Vec<MountConfig>, ConfigError> {
		value
			.split(',')
			.map(str::trim)
			.filter(|entry| !entry.is_empty())
			.map(|entry| match entry.split_once('=') {
				Some((path, method)) => Ok(MountConfig {
					path: path.trim().to_string(),
					method: method.parse()?,
				}),
				None => {
					let method: MountMethod = entry.parse()?;
					Ok(MountConfig {
						path: method.as_str().to_string(),
						method,
					})
				}
			})
			.collect()
	}
}
