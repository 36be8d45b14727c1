// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded in-memory record of job runs.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use crate::types::{JobRun, JobStatus};

/// Runs kept per job; older runs are dropped.
pub const MAX_RUNS_PER_JOB: usize = 50;

#[derive(Default)]
pub struct RunHistory {
	runs: Mutex<HashMap<String, VecDeque<JobRun>>>,
}

impl RunHistory {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn record_run_start(&self, run: &JobRun) {
		let mut runs = self.runs.lock().await;
		let entries = runs.entry(run.job_id.clone()).or_default();
		entries.push_back(run.clone());
		while entries.len() > MAX_RUNS_PER_JOB {
			entries.pop_front();
		}
	}

	pub async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobStatus,
		error_message: Option<String>,
		metadata: Option<serde_json::Value>,
	) {
		let mut runs = self.runs.lock().await;
		if let Some(run) = find_run(&mut runs, run_id) {
			run.finish(status, error_message, metadata, Utc::now());
		}
	}

	pub async fn record_retry(&self, run_id: &str, retry_count: u32) {
		let mut runs = self.runs.lock().await;
		if let Some(run) = find_run(&mut runs, run_id) {
			run.retry_count = retry_count;
		}
	}

	pub async fn last_run(&self, job_id: &str) -> Option<JobRun> {
		self.runs
			.lock()
			.await
			.get(job_id)
			.and_then(|entries| entries.back().cloned())
	}

	pub async fn runs(&self, job_id: &str) -> Vec<JobRun> {
		self.runs
			.lock()
			.await
			.get(job_id)
			.map(|entries| entries.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// Failed runs since the most recent success or cancellation.
	pub async fn consecutive_failures(&self, job_id: &str) -> u32 {
		let runs = self.runs.lock().await;
		runs.get(job_id)
			.map(|entries| {
				entries
					.iter()
					.rev()
					.filter(|run| run.is_finished())
					.take_while(|run| run.status == JobStatus::Failed)
					.count() as u32
			})
			.unwrap_or(0)
	}
}

fn find_run<'a>(runs: &'a mut HashMap<String, VecDeque<JobRun>>, run_id: &str) -> Option<&'a mut JobRun> {
	runs.values_mut()
		.flat_map(|entries| entries.iter_mut())
		.find(|run| run.id == run_id)
}
