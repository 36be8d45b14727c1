// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server configuration for keyward.
//!
//! Layers are merged in precedence order: built-in defaults, then
//! `/etc/keyward/server.toml` (or an explicit path), then `KEYWARD_SERVER_*`
//! environment variables.

mod error;
mod layer;
mod sections;
mod sources;

use std::collections::HashSet;

use tracing::debug;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{
	ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource, ENV_PREFIX, SYSTEM_CONFIG_PATH,
};

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub http: HttpConfig,
	pub logging: LoggingConfig,
	pub system: SystemConfig,
	pub jobs: JobsConfig,
	pub mounts: Vec<MountConfig>,
}

impl ServerConfig {
	pub fn socket_addr(&self) -> String {
		self.http.socket_addr()
	}
}

/// Load configuration from defaults, the system TOML file and the environment.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource::new()),
	])
}

/// Like [`load_config`] but reads the TOML file at `config_path`, which must exist.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource::new()),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

/// Resolve a merged layer, applying defaults and validation.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let config = ServerConfig {
		http: layer.http.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
		system: layer.system.unwrap_or_default().finalize()?,
		jobs: layer.jobs.unwrap_or_default().finalize()?,
		mounts: layer.mounts.unwrap_or_else(default_mounts),
	};
	validate_config(&config)?;
	Ok(config)
}

fn default_mounts() -> Vec<MountConfig> {
	[
		MountMethod::Aws,
		MountMethod::Chef,
		MountMethod::Radius,
		MountMethod::Azure,
		MountMethod::Httpbasic,
	]
	.into_iter()
	.map(|method| MountConfig {
		path: method.as_str().to_string(),
		method,
	})
	.collect()
}

fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
	if config.system.default_lease_ttl > config.system.max_lease_ttl {
		return Err(ConfigError::Validation(
			"system.default_lease_ttl cannot exceed system.max_lease_ttl".to_string(),
		));
	}

	let mut seen = HashSet::new();
	for mount in &config.mounts {
		let valid = !mount.path.is_empty()
			&& mount
				.path
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
		if !valid {
			return Err(ConfigError::Validation(format!(
				"invalid mount path '{}'",
				mount.path
			)));
		}
		if !seen.insert(mount.path.as_str()) {
			return Err(ConfigError::Validation(format!(
				"mount path '{}' is used more than once",
				mount.path
			)));
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;
	use std::time::Duration;

	#[test]
	fn test_finalize_defaults() {
		let config = finalize(ServerConfigLayer::default()).unwrap();
		assert_eq!(config.socket_addr(), "127.0.0.1:8200");
		assert_eq!(config.mounts.len(), 5);
		assert_eq!(config.system.max_lease_ttl, Duration::from_secs(768 * 3600));
	}

	#[test]
	fn test_env_overrides_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, "[http]\nport = 9000\nhost = \"0.0.0.0\"\n").unwrap();

		let env = EnvSource::with_lookup(|name| (name == "KEYWARD_SERVER_PORT").then(|| "9443".to_string()));
		let config = load_from_sources(vec![
			Box::new(env),
			Box::new(TomlSource::new(file.path())),
			Box::new(DefaultsSource),
		])
		.unwrap();
		assert_eq!(config.socket_addr(), "0.0.0.0:9443");
	}

	#[test]
	fn test_default_lease_above_max_rejected() {
		let layer = ServerConfigLayer {
			system: Some(SystemConfigLayer {
				default_lease_ttl: Some("2h".to_string()),
				max_lease_ttl: Some("1h".to_string()),
			}),
			..Default::default()
		};
		assert!(matches!(finalize(layer), Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_duplicate_and_invalid_mount_paths_rejected() {
		for mounts in ["aws,aws", "a/b=aws"] {
			let layer = ServerConfigLayer {
				mounts: Some(MountConfig::parse_list(mounts).unwrap()),
				..Default::default()
			};
			assert!(finalize(layer).is_err(), "{mounts}");
		}
	}

	#[test]
	fn test_toml_file_over_defaults() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"
[system]
default_lease_ttl = "30m"
max_lease_ttl = "2h"

[jobs]
periodic_tick_interval = "15s"

[[mounts]]
path = "ec2"
method = "aws"
"#
		)
		.unwrap();

		let layer = TomlSource::new(file.path()).load().unwrap();
		let config = finalize(layer).unwrap();
		assert_eq!(config.system.default_lease_ttl, Duration::from_secs(1800));
		assert_eq!(config.jobs.periodic_tick_interval, Duration::from_secs(15));
		assert_eq!(
			config.mounts,
			vec![MountConfig {
				path: "ec2".to_string(),
				method: MountMethod::Aws
			}]
		);
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn lease_ordering_is_enforced(default in 1u64..10_000, max in 1u64..10_000) {
			let layer = ServerConfigLayer {
				system: Some(SystemConfigLayer {
					default_lease_ttl: Some(default.to_string()),
					max_lease_ttl: Some(max.to_string()),
				}),
				..Default::default()
			};
			prop_assert_eq!(finalize(layer).is_ok(), default <= max);
		}
	}
}
