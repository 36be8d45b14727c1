// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::sections::{
	HttpConfigLayer, JobsConfigLayer, LoggingConfigLayer, MountConfig, SystemConfigLayer,
};

/// Server configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub http: Option<HttpConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
	#[serde(default)]
	pub system: Option<SystemConfigLayer>,
	#[serde(default)]
	pub jobs: Option<JobsConfigLayer>,
	/// Replaced wholesale by a higher-precedence layer, never appended.
	#[serde(default)]
	pub mounts: Option<Vec<MountConfig>>,
}

impl ServerConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_option(&mut self.http, other.http, HttpConfigLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
		merge_option(&mut self.system, other.system, SystemConfigLayer::merge);
		merge_option(&mut self.jobs, other.jobs, JobsConfigLayer::merge);
		if other.mounts.is_some() {
			self.mounts = other.mounts;
		}
	}
}

fn merge_option<T>(target: &mut Option<T>, source: Option<T>, merge_fn: fn(&mut T, T)) {
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sections::MountMethod;

	#[test]
	fn test_merge_keeps_unset_sections() {
		let mut base: ServerConfigLayer = toml::from_str(
			r#"
[http]
port = 9000

[[mounts]]
path = "aws"
method = "aws"
"#,
		)
		.unwrap();
		base.merge(ServerConfigLayer {
			http: Some(HttpConfigLayer {
				host: Some("0.0.0.0".to_string()),
				port: None,
			}),
			..Default::default()
		});

		let http = base.http.unwrap();
		assert_eq!(http.host.as_deref(), Some("0.0.0.0"));
		assert_eq!(http.port, Some(9000));
		assert_eq!(base.mounts.unwrap()[0].method, MountMethod::Aws);
	}

	#[test]
	fn test_mounts_replaced_not_appended() {
		let mut base = ServerConfigLayer {
			mounts: Some(MountConfig::parse_list("aws,chef").unwrap()),
			..Default::default()
		};
		base.merge(ServerConfigLayer {
			mounts: Some(MountConfig::parse_list("radius").unwrap()),
			..Default::default()
		});
		assert_eq!(base.mounts.unwrap().len(), 1);
	}
}
