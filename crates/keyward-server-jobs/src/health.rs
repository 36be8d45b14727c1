// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job health derived from run history.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{JobRun, JobStatus};

/// Consecutive failures at which a job is reported unhealthy.
pub const UNHEALTHY_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
	Healthy,
	Degraded,
	Unhealthy,
}

impl HealthState {
	pub fn from_history(last_run: Option<&JobRun>, consecutive_failures: u32) -> Self {
		match last_run.map(|run| run.status) {
			Some(JobStatus::Failed) if consecutive_failures >= UNHEALTHY_AFTER_FAILURES => HealthState::Unhealthy,
			Some(JobStatus::Failed) if consecutive_failures >= 1 => HealthState::Degraded,
			_ => HealthState::Healthy,
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct LastRunInfo {
	pub run_id: String,
	pub status: JobStatus,
	pub started_at: DateTime<Utc>,
	pub duration_ms: Option<i64>,
	pub error: Option<String>,
}

impl From<JobRun> for LastRunInfo {
	fn from(run: JobRun) -> Self {
		Self {
			run_id: run.id,
			status: run.status,
			started_at: run.started_at,
			duration_ms: run.duration_ms,
			error: run.error_message,
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct JobHealthStatus {
	pub job_id: String,
	pub name: String,
	pub status: HealthState,
	pub last_run: Option<LastRunInfo>,
	pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobsHealthStatus {
	pub status: HealthState,
	pub jobs: Vec<JobHealthStatus>,
}

impl JobsHealthStatus {
	/// Overall state is the worst of the individual jobs.
	pub fn from_jobs(mut jobs: Vec<JobHealthStatus>) -> Self {
		jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
		let status = jobs
			.iter()
			.map(|j| j.status)
			.max()
			.unwrap_or(HealthState::Healthy);
		Self { status, jobs }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::TriggerSource;

	fn finished(status: JobStatus) -> JobRun {
		let mut run = JobRun::start("run-1", "job-1", TriggerSource::Schedule);
		run.finish(status, None, None, Utc::now());
		run
	}

	fn job(id: &str, status: HealthState) -> JobHealthStatus {
		JobHealthStatus {
			job_id: id.to_string(),
			name: id.to_string(),
			status,
			last_run: None,
			consecutive_failures: 0,
		}
	}

	#[test]
	fn state_follows_consecutive_failures() {
		assert_eq!(HealthState::from_history(None, 0), HealthState::Healthy);

		let failed = finished(JobStatus::Failed);
		assert_eq!(HealthState::from_history(Some(&failed), 0), HealthState::Healthy);
		assert_eq!(HealthState::from_history(Some(&failed), 1), HealthState::Degraded);
		assert_eq!(HealthState::from_history(Some(&failed), 2), HealthState::Degraded);
		assert_eq!(HealthState::from_history(Some(&failed), 3), HealthState::Unhealthy);

		let cancelled = finished(JobStatus::Cancelled);
		assert_eq!(HealthState::from_history(Some(&cancelled), 5), HealthState::Healthy);
	}

	#[test]
	fn overall_state_is_worst_job() {
		let health = JobsHealthStatus::from_jobs(vec![
			job("b", HealthState::Degraded),
			job("a", HealthState::Healthy),
		]);
		assert_eq!(health.status, HealthState::Degraded);
		assert_eq!(health.jobs[0].job_id, "a");

		assert_eq!(JobsHealthStatus::from_jobs(vec![]).status, HealthState::Healthy);
	}
}
