// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Jobs configuration section.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{parse_duration, ConfigError};

pub const DEFAULT_PERIODIC_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Backends rely on being ticked at least this often.
pub const MAX_PERIODIC_TICK_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct JobsConfigLayer {
	pub periodic_tick_interval: Option<String>,
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.periodic_tick_interval.is_some() {
			self.periodic_tick_interval = other.periodic_tick_interval;
		}
	}

	pub fn finalize(self) -> Result<JobsConfig, ConfigError> {
		let periodic_tick_interval = match self.periodic_tick_interval {
			Some(v) => parse_duration("jobs.periodic_tick_interval", &v)?,
			None => DEFAULT_PERIODIC_TICK_INTERVAL,
		};
		if periodic_tick_interval.is_zero() || periodic_tick_interval > MAX_PERIODIC_TICK_INTERVAL {
			return Err(ConfigError::invalid(
				"jobs.periodic_tick_interval",
				"must be between 1s and 1h",
			));
		}
		Ok(JobsConfig {
			periodic_tick_interval,
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobsConfig {
	pub periodic_tick_interval: Duration,
}

impl Default for JobsConfig {
	fn default() -> Self {
		Self {
			periodic_tick_interval: DEFAULT_PERIODIC_TICK_INTERVAL,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_layer_finalize_defaults() {
		let config = JobsConfigLayer::default().finalize().unwrap();
		assert_eq!(config.periodic_tick_interval, Duration::from_secs(60));
	}

	#[test]
	fn test_tick_interval_is_bounded() {
		for bad in ["0", "2h"] {
			let layer = JobsConfigLayer {
				periodic_tick_interval: Some(bad.to_string()),
			};
			assert!(layer.finalize().is_err(), "{bad}");
		}
		let layer: JobsConfigLayer = toml::from_str(r#"periodic_tick_interval = "5m""#).unwrap();
		assert_eq!(
			layer.finalize().unwrap().periodic_tick_interval,
			Duration::from_secs(300)
		);
	}
}
