// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host lease defaults and TTL bound computation.

use std::time::Duration;

/// Lease limits provided by the host.
pub trait SystemView: Send + Sync {
	fn default_lease_ttl(&self) -> Duration;
	fn max_lease_ttl(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct StaticSystemView {
	pub default_lease_ttl: Duration,
	pub max_lease_ttl: Duration,
}

impl StaticSystemView {
	pub fn new(default_lease_ttl: Duration, max_lease_ttl: Duration) -> Self {
		Self {
			default_lease_ttl,
			max_lease_ttl,
		}
	}
}

impl Default for StaticSystemView {
	fn default() -> Self {
		Self::new(Duration::from_secs(768 * 3600), Duration::from_secs(768 * 3600))
	}
}

impl SystemView for StaticSystemView {
	fn default_lease_ttl(&self) -> Duration {
		self.default_lease_ttl
	}

	fn max_lease_ttl(&self) -> Duration {
		self.max_lease_ttl
	}
}

/// Token lifetime bound and replay-retention bound for an accepted login.
///
/// `shortest_max` caps the issued token; `longest_max` sets how long the
/// whitelist entry is retained so replay detection outlives any token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlBounds {
	pub shortest_max: Duration,
	pub longest_max: Duration,
}

impl TtlBounds {
	/// Zero role or tag values defer to the host maximum.
	pub fn compute(host_max: Duration, role_max: Duration, tag_max: Option<Duration>) -> Self {
		let tag_max = tag_max.unwrap_or(Duration::ZERO);
		let shortest_max = [role_max, tag_max]
			.into_iter()
			.filter(|d| !d.is_zero())
			.fold(host_max, Duration::min);
		let longest_max = host_max.max(role_max).max(tag_max);
		Self {
			shortest_max,
			longest_max,
		}
	}

	/// The TTL to issue: the role TTL when set, never above `shortest_max`.
	pub fn token_ttl(&self, role_ttl: Duration) -> Duration {
		if role_ttl.is_zero() {
			self.shortest_max
		} else {
			role_ttl.min(self.shortest_max)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const H: u64 = 3600;

	fn secs(s: u64) -> Duration {
		Duration::from_secs(s)
	}

	#[test]
	fn zero_values_defer_to_host() {
		let bounds = TtlBounds::compute(secs(10 * H), Duration::ZERO, None);
		assert_eq!(bounds.shortest_max, secs(10 * H));
		assert_eq!(bounds.longest_max, secs(10 * H));
	}

	#[test]
	fn shortest_and_longest_diverge() {
		let bounds = TtlBounds::compute(secs(10 * H), secs(2 * H), Some(secs(20 * H)));
		assert_eq!(bounds.shortest_max, secs(2 * H));
		assert_eq!(bounds.longest_max, secs(20 * H));
	}

	#[test]
	fn token_ttl_never_exceeds_shortest() {
		let bounds = TtlBounds::compute(secs(H), secs(200), Some(secs(100)));
		assert_eq!(bounds.token_ttl(Duration::ZERO), secs(100));
		assert_eq!(bounds.token_ttl(secs(50)), secs(50));
		assert_eq!(bounds.token_ttl(secs(5000)), secs(100));
	}

	mod proptests {
		use super::*;
		use proptest::prelude::*;

		proptest! {
			#[test]
			fn issued_ttl_within_bounds(host in 1u64..100_000, role in 0u64..100_000, tag in 0u64..100_000, role_ttl in 0u64..100_000) {
				let bounds = TtlBounds::compute(secs(host), secs(role), Some(secs(tag)));
				let ttl = bounds.token_ttl(secs(role_ttl));
				prop_assert!(ttl <= secs(host));
				if role > 0 { prop_assert!(ttl <= secs(role)); }
				if tag > 0 { prop_assert!(ttl <= secs(tag)); }
				prop_assert!(bounds.longest_max >= ttl);
			}
		}
	}
}
