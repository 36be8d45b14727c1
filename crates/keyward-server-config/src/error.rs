// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// A value was present but could not be parsed or is out of range.
	#[error("invalid value for {key}: {message}")]
	InvalidValue { key: String, message: String },

	/// An explicitly requested config file does not exist.
	#[error("config file {0} does not exist")]
	MissingFile(PathBuf),

	#[error("failed to read config file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse TOML config at {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	/// The merged configuration is inconsistent.
	#[error("invalid configuration: {0}")]
	Validation(String),
}

impl ConfigError {
	pub(crate) fn invalid(key: &str, message: impl Into<String>) -> Self {
		ConfigError::InvalidValue {
			key: key.to_string(),
			message: message.into(),
		}
	}
}

/// Parse a humantime duration (`"60s"`, `"768h"`) or bare whole seconds.
pub(crate) fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
	let value = value.trim();
	if let Ok(secs) = value.parse::<u64>() {
		return Ok(Duration::from_secs(secs));
	}
	humantime::parse_duration(value).map_err(|e| ConfigError::invalid(key, format!("'{value}': {e}")))
}
