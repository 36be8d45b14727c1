// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Where configuration layers come from.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	HttpConfigLayer, JobsConfigLayer, LoggingConfigLayer, MountConfig, SystemConfigLayer,
};

pub const SYSTEM_CONFIG_PATH: &str = "/etc/keyward/server.toml";
pub const ENV_PREFIX: &str = "KEYWARD_SERVER_";

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Contributes nothing; every section falls back to its `finalize` defaults.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		Ok(ServerConfigLayer::default())
	}
}

pub struct TomlSource {
	path: PathBuf,
	required: bool,
}

impl TomlSource {
	/// A file the operator asked for explicitly; it must exist.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			required: true,
		}
	}

	/// The well-known system path, skipped when absent.
	pub fn system() -> Self {
		Self {
			path: PathBuf::from(SYSTEM_CONFIG_PATH),
			required: false,
		}
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			if self.required {
				return Err(ConfigError::MissingFile(self.path.clone()));
			}
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::FileRead {
			path: self.path.clone(),
			source,
		})?;
		let layer = toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
			path: self.path.clone(),
			source,
		})?;
		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

type Lookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// `KEYWARD_SERVER_<FIELD>` variables. Empty values count as unset.
pub struct EnvSource {
	lookup: Box<Lookup>,
}

impl EnvSource {
	pub fn new() -> Self {
		Self::with_lookup(|name| std::env::var(name).ok())
	}

	/// Read variables through `lookup` instead of the process environment.
	pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
		Self {
			lookup: Box::new(lookup),
		}
	}

	fn var(&self, field: &str) -> Option<String> {
		(self.lookup)(&format!("{ENV_PREFIX}{field}")).filter(|v| !v.trim().is_empty())
	}

	fn parsed<T: FromStr>(&self, field: &str) -> Result<Option<T>, ConfigError> {
		self.var(field)
			.map(|v| {
				v.trim().parse().map_err(|_| {
					ConfigError::invalid(&format!("{ENV_PREFIX}{field}"), format!("cannot parse '{v}'"))
				})
			})
			.transpose()
	}
}

impl Default for EnvSource {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			http: Some(HttpConfigLayer {
				host: self.var("HOST"),
				port: self.parsed("PORT")?,
			}),
			logging: Some(LoggingConfigLayer {
				level: self.var("LOG_LEVEL"),
				format: self.var("LOG_FORMAT").map(|v| v.parse()).transpose()?,
			}),
			system: Some(SystemConfigLayer {
				default_lease_ttl: self.var("DEFAULT_LEASE_TTL"),
				max_lease_ttl: self.var("MAX_LEASE_TTL"),
			}),
			jobs: Some(JobsConfigLayer {
				periodic_tick_interval: self.var("PERIODIC_TICK_INTERVAL"),
			}),
			mounts: self
				.var("MOUNTS")
				.map(|v| MountConfig::parse_list(&v))
				.transpose()?,
		})
	}
}
