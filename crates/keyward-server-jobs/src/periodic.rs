// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The host tick that gives each mounted backend a chance to do housekeeping.

use async_trait::async_trait;
use keyward_server_auth::Backend;
use std::sync::Arc;
use tracing::warn;

use crate::context::JobContext;
use crate::error::JobError;
use crate::job::Job;
use crate::types::JobOutput;

pub const PERIODIC_TICK_JOB_ID: &str = "periodic-tick";

/// Calls [`Backend::periodic`] on every mount in turn. A failing backend is
/// logged and does not stop the others.
pub struct PeriodicTickJob {
	mounts: Vec<(String, Arc<dyn Backend>)>,
}

impl PeriodicTickJob {
	pub fn new(mounts: Vec<(String, Arc<dyn Backend>)>) -> Self {
		Self { mounts }
	}
}

#[async_trait]
impl Job for PeriodicTickJob {
	fn id(&self) -> &str {
		PERIODIC_TICK_JOB_ID
	}

	fn name(&self) -> &str {
		"Periodic tick"
	}

	fn description(&self) -> &str {
		"Runs background maintenance, such as tidy sweeps, for every mounted auth backend"
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		let mut failed = Vec::new();
		for (path, backend) in &self.mounts {
			if ctx.cancellation_token.is_cancelled() {
				return Err(JobError::Cancelled);
			}
			if let Err(e) = backend.periodic().await {
				warn!(mount = %path, backend = backend.backend_type(), error = %e, "periodic tick failed");
				failed.push(path.clone());
			}
		}

		let metadata = serde_json::json!({
			"mounts": self.mounts.len(),
			"failed": failed,
		});
		if failed.is_empty() {
			Ok(JobOutput::new(format!("ticked {} mounts", self.mounts.len())).with_metadata(metadata))
		} else {
			Err(JobError::failed(
				format!("periodic tick failed for {}", failed.join(", ")),
				false,
			))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::context::CancellationToken;
	use crate::types::TriggerSource;
	use keyward_server_auth::{Auth, AuthError, AuthResult, Request, Response};
	use std::sync::atomic::{AtomicU32, Ordering};

	struct Counting {
		ticks: AtomicU32,
		fail: bool,
	}

	#[async_trait]
	impl Backend for Counting {
		fn backend_type(&self) -> &'static str {
			"counting"
		}

		async fn handle(&self, _request: Request) -> AuthResult<Response> {
			Ok(Response::empty())
		}

		async fn renew(&self, auth: &Auth) -> AuthResult<Auth> {
			Ok(auth.clone())
		}

		async fn periodic(&self) -> AuthResult<()> {
			self.ticks.fetch_add(1, Ordering::SeqCst);
			if self.fail {
				Err(AuthError::internal("sweep failed"))
			} else {
				Ok(())
			}
		}
	}

	fn ctx() -> JobContext {
		JobContext::new("run", TriggerSource::Manual, CancellationToken::new())
	}

	#[tokio::test]
	async fn ticks_every_mount_even_after_a_failure() {
		let broken = Arc::new(Counting { ticks: AtomicU32::new(0), fail: true });
		let healthy = Arc::new(Counting { ticks: AtomicU32::new(0), fail: false });
		let job = PeriodicTickJob::new(vec![
			("aws".into(), broken.clone() as Arc<dyn Backend>),
			("chef".into(), healthy.clone() as Arc<dyn Backend>),
		]);

		let err = job.run(&ctx()).await.unwrap_err();
		assert!(err.to_string().contains("aws"), "{err}");
		assert_eq!(broken.ticks.load(Ordering::SeqCst), 1);
		assert_eq!(healthy.ticks.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn cancelled_tick_stops_early() {
		let healthy = Arc::new(Counting { ticks: AtomicU32::new(0), fail: false });
		let job = PeriodicTickJob::new(vec![("chef".into(), healthy.clone() as Arc<dyn Backend>)]);
		let ctx = ctx();
		ctx.cancellation_token.cancel();
		assert!(matches!(job.run(&ctx).await, Err(JobError::Cancelled)));
		assert_eq!(healthy.ticks.load(Ordering::SeqCst), 0);
	}
}
