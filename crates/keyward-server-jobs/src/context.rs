// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-run context and cooperative cancellation.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

use crate::types::TriggerSource;

/// What a job sees while it runs.
pub struct JobContext {
	pub run_id: String,
	pub triggered_by: TriggerSource,
	pub started_at: DateTime<Utc>,
	pub cancellation_token: CancellationToken,
}

impl JobContext {
	pub fn new(run_id: impl Into<String>, triggered_by: TriggerSource, cancellation_token: CancellationToken) -> Self {
		Self {
			run_id: run_id.into(),
			triggered_by,
			started_at: Utc::now(),
			cancellation_token,
		}
	}
}

/// Cancellation flag shared by every run of one registered job.
///
/// Jobs may poll [`is_cancelled`](Self::is_cancelled) between steps; the
/// scheduler also races each run against [`cancelled`](Self::cancelled) so a
/// run blocked on I/O is abandoned.
#[derive(Clone)]
pub struct CancellationToken {
	tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
	pub fn new() -> Self {
		let (tx, _) = watch::channel(false);
		Self { tx: Arc::new(tx) }
	}

	pub fn cancel(&self) {
		self.tx.send_replace(true);
	}

	pub fn is_cancelled(&self) -> bool {
		*self.tx.borrow()
	}

	/// Resolves once [`cancel`](Self::cancel) has been called.
	pub async fn cancelled(&self) {
		let mut rx = self.tx.subscribe();
		// The sender lives in `self`, so `wait_for` only errors if it is dropped.
		let _ = rx.wait_for(|cancelled| *cancelled).await;
	}
}

impl Default for CancellationToken {
	fn default() -> Self {
		Self::new()
	}
}
