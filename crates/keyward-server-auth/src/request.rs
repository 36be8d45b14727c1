// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host request and response shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AuthError, AuthResult};
use crate::types::Auth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
	Create,
	Read,
	Update,
	Delete,
	List,
}

impl Operation {
	/// Create and Update share handlers; existence decides the semantics.
	pub fn is_write(self) -> bool {
		matches!(self, Operation::Create | Operation::Update)
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
	pub remote_addr: Option<String>,
}

/// A request routed to a backend, with the mount prefix already stripped.
#[derive(Debug, Clone)]
pub struct Request {
	pub operation: Operation,
	pub path: String,
	pub data: Map<String, Value>,
	pub connection: Option<ConnectionInfo>,
}

impl Request {
	pub fn new(operation: Operation, path: impl Into<String>) -> Self {
		Self {
			operation,
			path: path.into(),
			data: Map::new(),
			connection: None,
		}
	}

	/// Attach request data. Non-object values are ignored.
	pub fn with_data(mut self, data: Value) -> Self {
		if let Value::Object(map) = data {
			self.data = map;
		}
		self
	}

	/// Decode the field bag into a typed input struct.
	pub fn decode<T: DeserializeOwned>(&self) -> AuthResult<T> {
		serde_json::from_value(Value::Object(self.data.clone()))
			.map_err(|e| AuthError::bad_request(format!("invalid request data: {e}")))
	}

	/// Path segments with empty segments removed, except a trailing one.
	///
	/// `role/` yields `["role", ""]` so list-style routes can be matched.
	pub fn segments(&self) -> Vec<&str> {
		let trimmed = self.path.trim_start_matches('/');
		let mut segments: Vec<&str> = trimmed.split('/').collect();
		let trailing_empty = segments.len() > 1 && segments.last() == Some(&"");
		segments.retain(|s| !s.is_empty());
		if trailing_empty {
			segments.push("");
		}
		segments
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Response {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Map<String, Value>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub auth: Option<Auth>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub warnings: Vec<String>,
}

impl Response {
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn with_data<T: Serialize>(data: &T) -> AuthResult<Self> {
		match serde_json::to_value(data)? {
			Value::Object(map) => Ok(Self {
				data: Some(map),
				..Self::default()
			}),
			other => Err(AuthError::internal(format!(
				"response data must be an object, got {other}"
			))),
		}
	}

	pub fn with_auth(auth: Auth) -> Self {
		Self {
			auth: Some(auth),
			..Self::default()
		}
	}

	pub fn list(keys: Vec<String>) -> Self {
		let mut map = Map::new();
		map.insert(
			"keys".to_string(),
			Value::Array(keys.into_iter().map(Value::String).collect()),
		);
		Self {
			data: Some(map),
			..Self::default()
		}
	}

	pub fn warning(mut self, warning: impl Into<String>) -> Self {
		self.warnings.push(warning.into());
		self
	}

	pub fn field(&self, name: &str) -> Option<&Value> {
		self.data.as_ref().and_then(|d| d.get(name))
	}
}
