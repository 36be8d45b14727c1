// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background job scheduler for the keyward server.
//!
//! Runs periodic jobs with retry and keeps a bounded in-memory run history
//! from which job health is derived. The periodic tick that drives every
//! mounted backend's housekeeping is one such job.

pub mod context;
pub mod error;
pub mod health;
pub mod history;
pub mod job;
pub mod periodic;
pub mod scheduler;
pub mod types;

pub use context::{CancellationToken, JobContext};
pub use error::{JobError, Result};
pub use health::{HealthState, JobHealthStatus, JobsHealthStatus, LastRunInfo, UNHEALTHY_AFTER_FAILURES};
pub use history::RunHistory;
pub use job::Job;
pub use periodic::PeriodicTickJob;
pub use scheduler::JobScheduler;
pub use types::{JobOutput, JobRun, JobSchedule, JobStatus, TriggerSource};
