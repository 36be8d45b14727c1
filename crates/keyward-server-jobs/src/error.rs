// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use keyward_server_auth::{AuthError, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
	#[error("Job failed: {message}")]
	Failed { message: String, retryable: bool },

	/// A backend call made by the job failed.
	#[error("Backend error: {0}")]
	Backend(#[from] AuthError),

	#[error("Job cancelled")]
	Cancelled,

	#[error("Job not found: {0}")]
	NotFound(String),
}

impl JobError {
	pub fn failed(message: impl Into<String>, retryable: bool) -> Self {
		Self::Failed {
			message: message.into(),
			retryable,
		}
	}

	/// Upstream outages and storage contention are worth another attempt.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Failed { retryable, .. } => *retryable,
			Self::Backend(e) => matches!(e.kind(), ErrorKind::Upstream | ErrorKind::Conflict),
			Self::Cancelled | Self::NotFound(_) => false,
		}
	}
}

pub type Result<T> = std::result::Result<T, JobError>;
