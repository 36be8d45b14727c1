// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Lock striping for per-key read-modify-write sequences.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{Mutex, MutexGuard};

const DEFAULT_STRIPES: usize = 256;

/// A fixed set of mutexes selected by key hash.
///
/// Two keys may share a stripe; a key never maps to two stripes.
#[derive(Debug)]
pub struct KeyedLocks {
	stripes: Vec<Mutex<()>>,
}

impl KeyedLocks {
	pub fn new() -> Self {
		Self::with_stripes(DEFAULT_STRIPES)
	}

	pub fn with_stripes(count: usize) -> Self {
		let count = count.max(1);
		Self {
			stripes: (0..count).map(|_| Mutex::new(())).collect(),
		}
	}

	pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
		self.stripes[self.index(key)].lock().await
	}

	fn index(&self, key: &str) -> usize {
		let mut hasher = DefaultHasher::new();
		key.hash(&mut hasher);
		(hasher.finish() % self.stripes.len() as u64) as usize
	}
}

impl Default for KeyedLocks {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;
	use std::time::Duration;

	#[tokio::test]
	async fn same_key_is_serialized() {
		let locks = Arc::new(KeyedLocks::new());
		let inside = Arc::new(AtomicUsize::new(0));
		let max_seen = Arc::new(AtomicUsize::new(0));

		let mut handles = Vec::new();
		for _ in 0..8 {
			let locks = Arc::clone(&locks);
			let inside = Arc::clone(&inside);
			let max_seen = Arc::clone(&max_seen);
			handles.push(tokio::spawn(async move {
				let _guard = locks.lock("i-1234").await;
				let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
				max_seen.fetch_max(now, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(5)).await;
				inside.fetch_sub(1, Ordering::SeqCst);
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}
		assert_eq!(max_seen.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn index_is_stable() {
		let locks = KeyedLocks::with_stripes(16);
		assert_eq!(locks.index("a"), locks.index("a"));
		assert!(locks.index("b") < 16);
	}
}
