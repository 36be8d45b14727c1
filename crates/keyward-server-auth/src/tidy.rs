// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Building blocks for periodic cleanup of expiring ledger entries.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::AuthResult;
use crate::fields::duration_secs;
use crate::storage::{Storage, StorageExt};

/// Minimum spacing between periodic sweeps.
pub const TIDY_COOLDOWN: Duration = Duration::from_secs(3600);

pub const BLACKLIST_SAFETY_BUFFER: Duration = Duration::from_secs(180 * 24 * 3600);
pub const WHITELIST_SAFETY_BUFFER: Duration = Duration::from_secs(72 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TidyConfig {
	#[serde(with = "duration_secs")]
	pub safety_buffer: Duration,
	#[serde(default)]
	pub disable_periodic_tidy: bool,
}

impl TidyConfig {
	pub fn new(safety_buffer: Duration) -> Self {
		Self {
			safety_buffer,
			disable_periodic_tidy: false,
		}
	}

	pub fn blacklist_default() -> Self {
		Self::new(BLACKLIST_SAFETY_BUFFER)
	}

	pub fn whitelist_default() -> Self {
		Self::new(WHITELIST_SAFETY_BUFFER)
	}

	/// Stored config at `key`, or `default` when none was written.
	pub async fn load(storage: &dyn Storage, key: &str, default: Self) -> AuthResult<Self> {
		Ok(storage.get_json(key).await?.unwrap_or(default))
	}
}

/// Ledger entries that carry an expiration.
pub trait Expiring {
	fn expiration_time(&self) -> DateTime<Utc>;
}

/// Lock-free single-flight gate: one holder at a time, losers do nothing.
#[derive(Debug, Default)]
pub struct SingleFlight {
	running: AtomicBool,
	completed: AtomicU64,
}

impl SingleFlight {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns a guard if no other holder exists.
	pub fn try_acquire(&self) -> Option<SingleFlightGuard<'_>> {
		self.running
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.ok()
			.map(|_| SingleFlightGuard { flight: self })
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::Acquire)
	}

	/// Number of sweeps that ran to completion.
	pub fn completed(&self) -> u64 {
		self.completed.load(Ordering::Acquire)
	}
}

pub struct SingleFlightGuard<'a> {
	flight: &'a SingleFlight,
}

impl SingleFlightGuard<'_> {
	pub fn complete(self) {
		self.flight.completed.fetch_add(1, Ordering::AcqRel);
	}
}

impl Drop for SingleFlightGuard<'_> {
	fn drop(&mut self) {
		self.flight.running.store(false, Ordering::Release);
	}
}

/// Admits at most one periodic run per `period`.
#[derive(Debug)]
pub struct Cooldown {
	period: Duration,
	next_allowed: Mutex<Option<DateTime<Utc>>>,
}

impl Cooldown {
	pub fn new(period: Duration) -> Self {
		Self {
			period,
			next_allowed: Mutex::new(None),
		}
	}

	/// True when the window is open; the next window starts `period` from `now`.
	pub fn try_begin(&self, now: DateTime<Utc>) -> bool {
		let mut next = match self.next_allowed.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		if matches!(*next, Some(at) if now < at) {
			return false;
		}
		let period = chrono::Duration::from_std(self.period).unwrap_or(chrono::Duration::hours(1));
		*next = Some(now + period);
		true
	}
}

impl Default for Cooldown {
	fn default() -> Self {
		Self::new(TIDY_COOLDOWN)
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TidySummary {
	pub scanned: usize,
	pub deleted: usize,
	pub failed: usize,
}

/// Delete entries under `prefix` whose expiration plus `safety_buffer` has passed.
///
/// Per-entry failures are logged and counted; only the listing can fail the sweep.
pub async fn sweep_expired<T>(
	storage: &dyn Storage,
	prefix: &str,
	safety_buffer: Duration,
	now: DateTime<Utc>,
) -> AuthResult<TidySummary>
where
	T: DeserializeOwned + Expiring + Send,
{
	let buffer = chrono::Duration::from_std(safety_buffer).unwrap_or(chrono::Duration::MAX);
	let keys = storage.list(prefix).await?;
	let mut summary = TidySummary::default();

	for name in keys.iter().filter(|k| !k.ends_with('/')) {
		summary.scanned += 1;
		let key = format!("{prefix}{name}");
		let entry: T = match storage.get_json(&key).await {
			Ok(Some(entry)) => entry,
			Ok(None) => continue,
			Err(e) => {
				warn!(key = %key, error = %e, "failed to decode entry during tidy");
				summary.failed += 1;
				continue;
			}
		};

		let cutoff = entry
			.expiration_time()
			.checked_add_signed(buffer)
			.unwrap_or(DateTime::<Utc>::MAX_UTC);
		if now > cutoff {
			if let Err(e) = storage.delete(&key).await {
				warn!(key = %key, error = %e, "failed to delete expired entry");
				summary.failed += 1;
				continue;
			}
			debug!(key = %key, "deleted expired entry");
			summary.deleted += 1;
		}
	}

	info!(
		prefix = %prefix,
		scanned = summary.scanned,
		deleted = summary.deleted,
		failed = summary.failed,
		"tidy sweep finished"
	);
	Ok(summary)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::InMemoryStorage;

	#[derive(Debug, Serialize, Deserialize)]
	struct Entry {
		expiration_time: DateTime<Utc>,
	}

	impl Expiring for Entry {
		fn expiration_time(&self) -> DateTime<Utc> {
			self.expiration_time
		}
	}

	#[tokio::test]
	async fn sweep_removes_only_expired_entries() {
		let storage = InMemoryStorage::new();
		let now = Utc::now();
		for (name, offset) in [("a", -2), ("b", -1), ("c", 1)] {
			let entry = Entry {
				expiration_time: now + chrono::Duration::hours(offset),
			};
			storage
				.put_json(&format!("blacklist/roletag/{name}"), &entry)
				.await
				.unwrap();
		}
		storage
			.put("blacklist/roletag/corrupt", b"{".to_vec())
			.await
			.unwrap();

		let summary = sweep_expired::<Entry>(&storage, "blacklist/roletag/", Duration::ZERO, now)
			.await
			.unwrap();

		assert_eq!(summary.deleted, 2);
		assert_eq!(summary.failed, 1);
		assert_eq!(
			storage.list("blacklist/roletag/").await.unwrap(),
			vec!["c", "corrupt"]
		);
	}

	#[tokio::test]
	async fn safety_buffer_delays_deletion() {
		let storage = InMemoryStorage::new();
		let now = Utc::now();
		let entry = Entry {
			expiration_time: now - chrono::Duration::hours(1),
		};
		storage.put_json("whitelist/identity/i-1", &entry).await.unwrap();

		let summary = sweep_expired::<Entry>(
			&storage,
			"whitelist/identity/",
			WHITELIST_SAFETY_BUFFER,
			now,
		)
		.await
		.unwrap();
		assert_eq!(summary.deleted, 0);
	}

	#[test]
	fn single_flight_admits_one_holder() {
		let flight = SingleFlight::new();
		let guard = flight.try_acquire().expect("first acquire");
		assert!(flight.try_acquire().is_none());
		guard.complete();
		assert_eq!(flight.completed(), 1);
		assert!(!flight.is_running());
		assert!(flight.try_acquire().is_some());
	}

	#[test]
	fn cooldown_spaces_runs() {
		let cooldown = Cooldown::new(Duration::from_secs(3600));
		let t0 = Utc::now();
		assert!(cooldown.try_begin(t0));
		assert!(!cooldown.try_begin(t0 + chrono::Duration::minutes(59)));
		assert!(cooldown.try_begin(t0 + chrono::Duration::minutes(61)));
	}

	#[tokio::test]
	async fn tidy_config_defaults_when_unset() {
		let storage = InMemoryStorage::new();
		let config = TidyConfig::load(&storage, "config/tidy/roletag-blacklist", TidyConfig::blacklist_default())
			.await
			.unwrap();
		assert_eq!(config.safety_buffer, BLACKLIST_SAFETY_BUFFER);
		assert!(!config.disable_periodic_tidy);
	}
}
