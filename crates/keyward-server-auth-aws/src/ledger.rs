// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Replay protection for EC2 logins.
//!
//! The identity whitelist records, per instance, the client nonce and the
//! identity document's pending time of the last accepted login. The role tag
//! blacklist records revoked tags. Whitelist transitions for one instance are
//! serialized by a per-instance lock held across read, decide and write.
//!
//! | stored entry          | presented login                          | outcome            |
//! |-----------------------|------------------------------------------|--------------------|
//! | none                  | any                                      | create             |
//! | reauth disallowed     | any                                      | `ReauthDisallowed` |
//! | any                   | older pending time                       | `StaleIdentity`    |
//! | nonce N               | nonce N                                  | refresh            |
//! | nonce N               | other nonce, migration, newer pending    | replace nonce      |
//! | nonce N               | other nonce otherwise                    | `NonceMismatch`    |

use chrono::{DateTime, Utc};
use keyward_server_auth::fields::duration_secs;
use keyward_server_auth::tidy::{self, Expiring, TidySummary};
use keyward_server_auth::{AuthError, AuthResult, KeyedLocks, ReplayError, Storage, StorageExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const WHITELIST_PREFIX: &str = "whitelist/identity/";
pub const BLACKLIST_PREFIX: &str = "blacklist/roletag/";

pub const MAX_NONCE_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
	pub role: String,
	pub client_nonce: String,
	pub creation_time: DateTime<Utc>,
	pub last_updated_time: DateTime<Utc>,
	pub expiration_time: DateTime<Utc>,
	pub pending_time: DateTime<Utc>,
	#[serde(default)]
	pub disallow_reauthentication: bool,
	#[serde(default, with = "duration_secs")]
	pub role_tag_max_ttl: Duration,
}

impl WhitelistEntry {
	/// Read view; the nonce is never returned.
	pub fn to_response(&self) -> AuthResult<serde_json::Map<String, serde_json::Value>> {
		let mut map = match serde_json::to_value(self)? {
			serde_json::Value::Object(map) => map,
			_ => return Err(AuthError::internal("whitelist entry did not serialize to an object")),
		};
		map.remove("client_nonce");
		Ok(map)
	}
}

impl Expiring for WhitelistEntry {
	fn expiration_time(&self) -> DateTime<Utc> {
		self.expiration_time
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
	#[serde(default)]
	pub role: String,
	pub creation_time: DateTime<Utc>,
	pub expiration_time: DateTime<Utc>,
}

impl Expiring for BlacklistEntry {
	fn expiration_time(&self) -> DateTime<Utc> {
		self.expiration_time
	}
}

/// An EC2 login presented to the whitelist.
#[derive(Debug, Clone)]
pub struct LoginAttempt<'a> {
	pub instance_id: &'a str,
	pub role: &'a str,
	pub nonce: &'a str,
	pub pending_time: DateTime<Utc>,
	pub allow_instance_migration: bool,
	/// Role or tag forbids any further login by this instance.
	pub disallow_reauthentication: bool,
	/// Whitelist retention; the longest of the applicable maximum TTLs.
	pub retention: Duration,
	pub role_tag_max_ttl: Duration,
}

pub(crate) fn add_duration(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
	chrono::Duration::from_std(duration)
		.ok()
		.and_then(|d| now.checked_add_signed(d))
		.unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn nonce_matches(a: &str, b: &str) -> bool {
	a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Decide the whitelist entry that results from `attempt`.
pub fn transition(
	current: Option<&WhitelistEntry>,
	attempt: &LoginAttempt<'_>,
	now: DateTime<Utc>,
) -> Result<WhitelistEntry, ReplayError> {
	let expiration = add_duration(now, attempt.retention);

	let Some(stored) = current else {
		if attempt.nonce.is_empty() && !attempt.disallow_reauthentication {
			return Err(ReplayError::MissingNonce);
		}
		return Ok(WhitelistEntry {
			role: attempt.role.to_string(),
			client_nonce: attempt.nonce.to_string(),
			creation_time: now,
			last_updated_time: now,
			expiration_time: expiration,
			pending_time: attempt.pending_time,
			disallow_reauthentication: attempt.disallow_reauthentication,
			role_tag_max_ttl: attempt.role_tag_max_ttl,
		});
	};

	if stored.disallow_reauthentication {
		return Err(ReplayError::ReauthDisallowed);
	}
	if attempt.nonce.is_empty() && !attempt.disallow_reauthentication {
		return Err(ReplayError::MissingNonce);
	}
	if attempt.pending_time < stored.pending_time {
		return Err(ReplayError::StaleIdentity);
	}
	if !nonce_matches(attempt.nonce, &stored.client_nonce)
		&& !(attempt.allow_instance_migration && attempt.pending_time > stored.pending_time)
	{
		return Err(ReplayError::NonceMismatch);
	}

	let mut next = stored.clone();
	next.role = attempt.role.to_string();
	next.client_nonce = attempt.nonce.to_string();
	next.pending_time = attempt.pending_time;
	next.last_updated_time = now;
	next.expiration_time = stored.expiration_time.max(expiration);
	next.disallow_reauthentication |= attempt.disallow_reauthentication;
	next.role_tag_max_ttl = attempt.role_tag_max_ttl;
	Ok(next)
}

pub struct ReplayLedger {
	storage: Arc<dyn Storage>,
	whitelist_locks: KeyedLocks,
	blacklist_lock: RwLock<()>,
}

impl ReplayLedger {
	pub fn new(storage: Arc<dyn Storage>) -> Self {
		Self {
			storage,
			whitelist_locks: KeyedLocks::new(),
			blacklist_lock: RwLock::new(()),
		}
	}

	fn whitelist_key(instance_id: &str) -> String {
		format!("{WHITELIST_PREFIX}{instance_id}")
	}

	fn blacklist_key(tag: &str) -> String {
		format!("{BLACKLIST_PREFIX}{tag}")
	}

	/// Apply `attempt` to the whitelist and persist the result.
	#[tracing::instrument(skip(self, attempt), fields(instance_id = %attempt.instance_id), name = "ReplayLedger::admit")]
	pub async fn admit(&self, attempt: &LoginAttempt<'_>, now: DateTime<Utc>) -> AuthResult<WhitelistEntry> {
		if attempt.nonce.len() > MAX_NONCE_LEN {
			return Err(AuthError::bad_request(format!(
				"nonce must be at most {MAX_NONCE_LEN} bytes"
			)));
		}
		let key = Self::whitelist_key(attempt.instance_id);
		let _guard = self.whitelist_locks.lock(&key).await;

		let current: Option<WhitelistEntry> = self.storage.get_json(&key).await?;
		let next = transition(current.as_ref(), attempt, now).map_err(|e| {
			warn!(error = %e, "login rejected by replay ledger");
			AuthError::from(e)
		})?;
		self.storage.put_json(&key, &next).await?;
		debug!(created = current.is_none(), "whitelist entry written");
		Ok(next)
	}

	/// Extend retention of an existing entry during renewal.
	pub async fn refresh(
		&self,
		instance_id: &str,
		retention: Duration,
		now: DateTime<Utc>,
	) -> AuthResult<WhitelistEntry> {
		let key = Self::whitelist_key(instance_id);
		let _guard = self.whitelist_locks.lock(&key).await;
		let mut entry: WhitelistEntry = self
			.storage
			.get_json(&key)
			.await?
			.ok_or_else(|| AuthError::not_found(format!("whitelist entry for {instance_id}")))?;
		entry.last_updated_time = now;
		entry.expiration_time = add_duration(now, retention);
		self.storage.put_json(&key, &entry).await?;
		Ok(entry)
	}

	pub async fn whitelist_entry(&self, instance_id: &str) -> AuthResult<Option<WhitelistEntry>> {
		let key = Self::whitelist_key(instance_id);
		let _guard = self.whitelist_locks.lock(&key).await;
		self.storage.get_json(&key).await
	}

	pub async fn delete_whitelist_entry(&self, instance_id: &str) -> AuthResult<()> {
		let key = Self::whitelist_key(instance_id);
		let _guard = self.whitelist_locks.lock(&key).await;
		self.storage.delete(&key).await?;
		info!(instance_id = %instance_id, "whitelist entry deleted");
		Ok(())
	}

	pub async fn list_whitelist(&self) -> AuthResult<Vec<String>> {
		Ok(self.storage.list(WHITELIST_PREFIX).await?)
	}

	pub async fn is_blacklisted(&self, tag: &str) -> AuthResult<bool> {
		Ok(self.blacklist_entry(tag).await?.is_some())
	}

	pub async fn blacklist_entry(&self, tag: &str) -> AuthResult<Option<BlacklistEntry>> {
		let _guard = self.blacklist_lock.read().await;
		self.storage.get_json(&Self::blacklist_key(tag)).await
	}

	/// Revoke `tag` until `expiration_time`. Re-blacklisting keeps the creation time.
	pub async fn blacklist(
		&self,
		tag: &str,
		role: &str,
		expiration_time: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> AuthResult<BlacklistEntry> {
		let key = Self::blacklist_key(tag);
		let _guard = self.blacklist_lock.write().await;
		let existing: Option<BlacklistEntry> = self.storage.get_json(&key).await?;
		let entry = BlacklistEntry {
			role: role.to_string(),
			creation_time: existing.map(|e| e.creation_time).unwrap_or(now),
			expiration_time,
		};
		self.storage.put_json(&key, &entry).await?;
		info!("role tag blacklisted");
		Ok(entry)
	}

	pub async fn remove_blacklisted(&self, tag: &str) -> AuthResult<()> {
		let _guard = self.blacklist_lock.write().await;
		self.storage.delete(&Self::blacklist_key(tag)).await?;
		Ok(())
	}

	pub async fn list_blacklist(&self) -> AuthResult<Vec<String>> {
		let _guard = self.blacklist_lock.read().await;
		Ok(self.storage.list(BLACKLIST_PREFIX).await?)
	}

	/// Delete whitelist entries past expiration plus `safety_buffer`.
	///
	/// Each entry is re-read under its instance lock so a concurrent login
	/// that refreshed it is never undone.
	pub async fn tidy_whitelist(&self, safety_buffer: Duration, now: DateTime<Utc>) -> AuthResult<TidySummary> {
		let mut summary = TidySummary::default();
		for instance_id in self.storage.list(WHITELIST_PREFIX).await? {
			if instance_id.ends_with('/') {
				continue;
			}
			summary.scanned += 1;
			let key = Self::whitelist_key(&instance_id);
			let _guard = self.whitelist_locks.lock(&key).await;
			let entry: WhitelistEntry = match self.storage.get_json(&key).await {
				Ok(Some(entry)) => entry,
				Ok(None) => continue,
				Err(e) => {
					warn!(key = %key, error = %e, "failed to decode whitelist entry during tidy");
					summary.failed += 1;
					continue;
				}
			};
			if now > add_duration(entry.expiration_time, safety_buffer) {
				match self.storage.delete(&key).await {
					Ok(()) => summary.deleted += 1,
					Err(e) => {
						warn!(key = %key, error = %e, "failed to delete whitelist entry");
						summary.failed += 1;
					}
				}
			}
		}
		info!(
			scanned = summary.scanned,
			deleted = summary.deleted,
			failed = summary.failed,
			"identity whitelist tidy finished"
		);
		Ok(summary)
	}

	/// Delete blacklist entries past expiration plus `safety_buffer`.
	pub async fn tidy_blacklist(&self, safety_buffer: Duration, now: DateTime<Utc>) -> AuthResult<TidySummary> {
		let _guard = self.blacklist_lock.write().await;
		tidy::sweep_expired::<BlacklistEntry>(self.storage.as_ref(), BLACKLIST_PREFIX, safety_buffer, now).await
	}
}
