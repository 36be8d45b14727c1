// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Serde helpers for request fields and stored records.
//!
//! Durations are stored as whole seconds. On input they may also be given as
//! humantime strings (`"90s"`, `"72h"`) or numeric strings (`"60"`). Lists may
//! be a JSON array or a comma-separated string.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serializer};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
	Secs(u64),
	Text(String),
}

fn parse_raw<E: de::Error>(raw: RawDuration) -> Result<Duration, E> {
	match raw {
		RawDuration::Secs(secs) => Ok(Duration::from_secs(secs)),
		RawDuration::Text(text) => parse_duration(&text).map_err(E::custom),
	}
}

/// Parse `"3600"`, `"1h"` or `"1h 30m"`.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
	let text = text.trim();
	if text.is_empty() {
		return Ok(Duration::ZERO);
	}
	if let Ok(secs) = text.parse::<u64>() {
		return Ok(Duration::from_secs(secs));
	}
	humantime::parse_duration(text).map_err(|e| format!("invalid duration '{text}': {e}"))
}

pub mod duration_secs {
	use super::*;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(duration.as_secs())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		parse_raw(RawDuration::deserialize(deserializer)?)
	}
}

pub mod opt_duration {
	use super::*;

	pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match duration {
			Some(d) => serializer.serialize_some(&d.as_secs()),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		match Option::<RawDuration>::deserialize(deserializer)? {
			Some(raw) => parse_raw(raw).map(Some),
			None => Ok(None),
		}
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawList {
	Many(Vec<String>),
	One(String),
}

fn split_list(raw: RawList) -> Vec<String> {
	let items = match raw {
		RawList::Many(items) => items,
		RawList::One(text) => text.split(',').map(str::to_string).collect(),
	};
	items
		.into_iter()
		.map(|s| s.trim().to_string())
		.filter(|s| !s.is_empty())
		.collect()
}

pub mod string_list {
	use super::*;

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(split_list(RawList::deserialize(deserializer)?))
	}
}

pub mod opt_string_list {
	use super::*;

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Option::<RawList>::deserialize(deserializer)?.map(split_list))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Serialize;

	#[derive(Debug, Serialize, Deserialize)]
	struct Input {
		#[serde(default, with = "opt_duration")]
		max_ttl: Option<Duration>,
		#[serde(default, deserialize_with = "opt_string_list::deserialize")]
		#[serde(skip_serializing)]
		policies: Option<Vec<String>>,
	}

	#[test]
	fn durations_accept_seconds_and_humantime() {
		let a: Input = serde_json::from_str(r#"{"max_ttl": 120}"#).unwrap();
		let b: Input = serde_json::from_str(r#"{"max_ttl": "2m"}"#).unwrap();
		let c: Input = serde_json::from_str(r#"{"max_ttl": "120"}"#).unwrap();
		assert_eq!(a.max_ttl, Some(Duration::from_secs(120)));
		assert_eq!(b.max_ttl, a.max_ttl);
		assert_eq!(c.max_ttl, a.max_ttl);

		let none: Input = serde_json::from_str("{}").unwrap();
		assert!(none.max_ttl.is_none());
	}

	#[test]
	fn bad_duration_is_rejected() {
		assert!(serde_json::from_str::<Input>(r#"{"max_ttl": "soon"}"#).is_err());
	}

	#[test]
	fn lists_accept_csv_and_arrays() {
		let a: Input = serde_json::from_str(r#"{"policies": "p, q,,r"}"#).unwrap();
		let b: Input = serde_json::from_str(r#"{"policies": ["p", "q", "r"]}"#).unwrap();
		assert_eq!(a.policies, Some(vec!["p".into(), "q".into(), "r".into()]));
		assert_eq!(a.policies, b.policies);
	}

	#[test]
	fn durations_serialize_as_seconds() {
		let input = Input {
			max_ttl: Some(Duration::from_secs(90)),
			policies: None,
		};
		assert_eq!(serde_json::to_string(&input).unwrap(), r#"{"max_ttl":90}"#);
	}
}
