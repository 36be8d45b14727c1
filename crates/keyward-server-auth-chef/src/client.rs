// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Signed Chef server API client.

use chrono::{SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use rsa::RsaPrivateKey;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::{debug, instrument};
use url::Url;

use crate::config::ChefConfig;
use crate::error::{ChefApiError, ChefApiResult};
use crate::signing;

/// The parts of a Chef node document authentication uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChefNode {
	pub name: String,
	#[serde(default = "default_environment")]
	pub chef_environment: String,
	#[serde(default)]
	pub run_list: Vec<String>,
	#[serde(default)]
	pub normal: NodeAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NodeAttributes {
	#[serde(default)]
	pub tags: Vec<String>,
}

fn default_environment() -> String {
	"_default".to_string()
}

impl ChefNode {
	/// Roles named by `role[<name>]` run-list entries.
	pub fn roles(&self) -> Vec<String> {
		self.run_list
			.iter()
			.filter_map(|entry| entry.strip_prefix("role[")?.strip_suffix(']'))
			.map(str::to_string)
			.collect::<BTreeSet<_>>()
			.into_iter()
			.collect()
	}

	pub fn tags(&self) -> &[String] {
		&self.normal.tags
	}
}

#[derive(Debug, Deserialize)]
struct ClientDocument {
	public_key: String,
}

pub struct ChefClient {
	http: Client,
	base_url: Url,
	client_name: String,
	key: RsaPrivateKey,
}

impl ChefClient {
	pub fn new(http: Client, config: &ChefConfig) -> ChefApiResult<Self> {
		if config.base_url.is_empty() || config.client_name.is_empty() || config.client_key.is_empty() {
			return Err(ChefApiError::Config(
				"base_url, client_name and client_key must be configured".to_string(),
			));
		}
		let base_url = Url::parse(&format!("{}/", config.base_url.trim_end_matches('/')))
			.map_err(|e| ChefApiError::Config(format!("invalid base_url: {e}")))?;
		Ok(Self {
			http,
			base_url,
			client_name: config.client_name.clone(),
			key: signing::parse_private_key(&config.client_key)?,
		})
	}

	#[instrument(skip(self), fields(client = %self.client_name), name = "ChefClient::get")]
	async fn get<T: DeserializeOwned>(&self, resource: &str, what: &str) -> ChefApiResult<T> {
		let url = self
			.base_url
			.join(resource)
			.map_err(|e| ChefApiError::Config(format!("invalid resource path: {e}")))?;
		let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
		let headers = signing::signed_headers(&self.key, &self.client_name, "GET", url.path(), b"", &timestamp)?;

		let mut request = self.http.get(url.clone()).header("Accept", "application/json");
		for (name, value) in headers {
			request = request.header(name, value);
		}
		let response = request.send().await?;
		let status = response.status();
		debug!(%status, path = url.path(), "chef api response");
		if status == StatusCode::NOT_FOUND {
			return Err(ChefApiError::NotFound(what.to_string()));
		}
		if !status.is_success() {
			let message = response.text().await.unwrap_or_default();
			return Err(ChefApiError::Api {
				status: status.as_u16(),
				message: message.chars().take(256).collect(),
			});
		}
		response
			.json()
			.await
			.map_err(|e| ChefApiError::InvalidResponse(e.to_string()))
	}

	/// PEM public key registered for `client_name`.
	pub async fn client_public_key(&self, client_name: &str) -> ChefApiResult<String> {
		let doc: ClientDocument = self
			.get(&format!("clients/{client_name}"), &format!("client {client_name}"))
			.await?;
		Ok(doc.public_key)
	}

	pub async fn node(&self, name: &str) -> ChefApiResult<ChefNode> {
		self.get(&format!("nodes/{name}"), &format!("node {name}")).await
	}
}
