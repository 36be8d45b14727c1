// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use crate::context::JobContext;
use crate::error::JobError;
use crate::types::JobOutput;

/// A unit of background work the scheduler can run on an interval or on demand.
#[async_trait]
pub trait Job: Send + Sync {
	/// Stable identifier; registering a second job with the same id replaces the first.
	fn id(&self) -> &str;

	/// Human-readable name shown in health output.
	fn name(&self) -> &str {
		self.id()
	}

	fn description(&self) -> &str {
		""
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError>;
}
