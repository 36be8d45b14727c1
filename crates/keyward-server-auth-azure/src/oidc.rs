// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AAD token verification through OIDC discovery and the issuer's JWKS.

use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{OidcError, OidcResult};

/// Tolerated clock difference for `exp`, in seconds. `nbf` gets none.
pub const CLOCK_LEEWAY_SECS: u64 = 60;

#[derive(Debug, Clone, Deserialize)]
struct DiscoveryDocument {
	issuer: String,
	jwks_uri: String,
}

/// Claims keyward reads from a managed identity token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
	#[serde(default)]
	pub oid: String,
	#[serde(default)]
	pub sub: String,
	#[serde(default)]
	pub tid: String,
	#[serde(default)]
	pub groups: Vec<String>,
	#[serde(default)]
	pub nbf: Option<i64>,
}

/// Rejects a token whose `nbf` is later than `now` (Unix seconds).
fn check_not_before(nbf: Option<i64>, now: i64) -> OidcResult<()> {
	match nbf {
		Some(nbf) if nbf > now => Err(OidcError::NotYetValid),
		_ => Ok(()),
	}
}

/// Discovered issuer with a cached key set.
pub struct OidcProvider {
	http: reqwest::Client,
	issuer: String,
	jwks_uri: String,
	keys: RwLock<JwkSet>,
}

impl OidcProvider {
	/// Fetch `<issuer>/.well-known/openid-configuration` and the key set it names.
	#[tracing::instrument(skip(http), name = "OidcProvider::discover")]
	pub async fn discover(http: reqwest::Client, issuer: &str) -> OidcResult<Self> {
		let url = format!(
			"{}/.well-known/openid-configuration",
			issuer.trim_end_matches('/')
		);
		let response = http.get(&url).send().await?;
		if !response.status().is_success() {
			return Err(OidcError::Discovery(format!(
				"{url} returned {}",
				response.status()
			)));
		}
		let document: DiscoveryDocument = response
			.json()
			.await
			.map_err(|e| OidcError::Discovery(format!("invalid discovery document: {e}")))?;
		if document.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
			return Err(OidcError::Discovery(format!(
				"issuer mismatch: expected {issuer}, discovered {}",
				document.issuer
			)));
		}

		let keys = fetch_keys(&http, &document.jwks_uri).await?;
		info!(issuer = %document.issuer, keys = keys.keys.len(), "oidc provider discovered");
		Ok(Self {
			http,
			issuer: document.issuer,
			jwks_uri: document.jwks_uri,
			keys: RwLock::new(keys),
		})
	}

	pub fn issuer(&self) -> &str {
		&self.issuer
	}

	/// Verify signature, `aud`, `iss`, `exp` and `nbf`. An unknown `kid`
	/// triggers one key-set refresh to follow issuer key rotation.
	#[tracing::instrument(skip(self, token), name = "OidcProvider::verify")]
	pub async fn verify(&self, token: &str, audience: &str) -> OidcResult<IdentityClaims> {
		let header = decode_header(token)?;
		let kid = header.kid.unwrap_or_default();

		let key = match self.decoding_key(&kid).await? {
			Some(key) => key,
			None => {
				debug!(%kid, "unknown signing key, refreshing key set");
				let fresh = fetch_keys(&self.http, &self.jwks_uri).await?;
				*self.keys.write().await = fresh;
				self.decoding_key(&kid)
					.await?
					.ok_or_else(|| OidcError::UnknownKey(kid.clone()))?
			}
		};

		let mut validation = Validation::new(Algorithm::RS256);
		validation.set_audience(&[audience]);
		validation.set_issuer(&[self.issuer.as_str()]);
		validation.validate_nbf = false;
		validation.leeway = CLOCK_LEEWAY_SECS;

		let claims = decode::<IdentityClaims>(token, &key, &validation)?.claims;
		check_not_before(claims.nbf, Utc::now().timestamp())?;
		if claims.oid.is_empty() {
			return Err(OidcError::MissingClaim("oid"));
		}
		Ok(claims)
	}

	async fn decoding_key(&self, kid: &str) -> OidcResult<Option<DecodingKey>> {
		let keys = self.keys.read().await;
		let jwk = if kid.is_empty() && keys.keys.len() == 1 {
			keys.keys.first()
		} else {
			keys.find(kid)
		};
		jwk.map(DecodingKey::from_jwk).transpose().map_err(OidcError::from)
	}
}

async fn fetch_keys(http: &reqwest::Client, jwks_uri: &str) -> OidcResult<JwkSet> {
	let response = http.get(jwks_uri).send().await?;
	if !response.status().is_success() {
		return Err(OidcError::Discovery(format!(
			"{jwks_uri} returned {}",
			response.status()
		)));
	}
	response
		.json()
		.await
		.map_err(|e| OidcError::Discovery(format!("invalid key set: {e}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn not_before_allows_no_leeway() {
		check_not_before(None, 1_000).unwrap();
		check_not_before(Some(990), 1_000).unwrap();
		check_not_before(Some(1_000), 1_000).unwrap();
		assert!(matches!(check_not_before(Some(1_001), 1_000), Err(OidcError::NotYetValid)));
		assert!(matches!(check_not_before(Some(1_030), 1_000), Err(OidcError::NotYetValid)));
	}
}
