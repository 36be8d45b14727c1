// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Whitelist and blacklist cleanup, forced or periodic.

use chrono::{DateTime, Utc};
use keyward_server_auth::fields::opt_duration;
use keyward_server_auth::{
	AuthResult, Cooldown, SingleFlight, Storage, StorageExt, TidyConfig, TidySummary,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::ledger::ReplayLedger;

pub const WHITELIST_TIDY_CONFIG_KEY: &str = "config/tidy/identity-whitelist";
pub const BLACKLIST_TIDY_CONFIG_KEY: &str = "config/tidy/roletag-blacklist";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TidyKind {
	IdentityWhitelist,
	RoleTagBlacklist,
}

impl TidyKind {
	pub const ALL: [TidyKind; 2] = [TidyKind::IdentityWhitelist, TidyKind::RoleTagBlacklist];

	pub fn as_str(&self) -> &'static str {
		match self {
			TidyKind::IdentityWhitelist => "identity-whitelist",
			TidyKind::RoleTagBlacklist => "roletag-blacklist",
		}
	}

	pub fn from_path(segment: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|k| k.as_str() == segment)
	}

	fn config_key(&self) -> &'static str {
		match self {
			TidyKind::IdentityWhitelist => WHITELIST_TIDY_CONFIG_KEY,
			TidyKind::RoleTagBlacklist => BLACKLIST_TIDY_CONFIG_KEY,
		}
	}

	fn default_config(&self) -> TidyConfig {
		match self {
			TidyKind::IdentityWhitelist => TidyConfig::whitelist_default(),
			TidyKind::RoleTagBlacklist => TidyConfig::blacklist_default(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TidyOutcome {
	Completed(TidySummary),
	/// Another sweep of the same kind holds the single-flight flag.
	AlreadyRunning,
}

#[derive(Debug, Default, Deserialize)]
pub struct TidyConfigInput {
	#[serde(default, with = "opt_duration")]
	pub safety_buffer: Option<Duration>,
	pub disable_periodic_tidy: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TidyRunInput {
	#[serde(default, with = "opt_duration")]
	pub safety_buffer: Option<Duration>,
}

pub struct TidyWorker {
	storage: Arc<dyn Storage>,
	ledger: Arc<ReplayLedger>,
	whitelist: SingleFlight,
	blacklist: SingleFlight,
	cooldown: Cooldown,
}

impl TidyWorker {
	pub fn new(storage: Arc<dyn Storage>, ledger: Arc<ReplayLedger>, cooldown: Cooldown) -> Self {
		Self {
			storage,
			ledger,
			whitelist: SingleFlight::new(),
			blacklist: SingleFlight::new(),
			cooldown,
		}
	}

	fn flight(&self, kind: TidyKind) -> &SingleFlight {
		match kind {
			TidyKind::IdentityWhitelist => &self.whitelist,
			TidyKind::RoleTagBlacklist => &self.blacklist,
		}
	}

	/// Number of completed sweeps of `kind`.
	pub fn completed(&self, kind: TidyKind) -> u64 {
		self.flight(kind).completed()
	}

	pub async fn config(&self, kind: TidyKind) -> AuthResult<TidyConfig> {
		TidyConfig::load(self.storage.as_ref(), kind.config_key(), kind.default_config()).await
	}

	pub async fn write_config(&self, kind: TidyKind, input: TidyConfigInput) -> AuthResult<TidyConfig> {
		let mut config = self.config(kind).await?;
		if let Some(buffer) = input.safety_buffer {
			config.safety_buffer = buffer;
		}
		if let Some(disable) = input.disable_periodic_tidy {
			config.disable_periodic_tidy = disable;
		}
		self.storage.put_json(kind.config_key(), &config).await?;
		Ok(config)
	}

	pub async fn delete_config(&self, kind: TidyKind) -> AuthResult<()> {
		self.storage.delete(kind.config_key()).await?;
		Ok(())
	}

	/// Sweep `kind` once. `safety_buffer` overrides the stored one.
	#[tracing::instrument(skip(self), fields(kind = kind.as_str()), name = "TidyWorker::run")]
	pub async fn run(
		&self,
		kind: TidyKind,
		safety_buffer: Option<Duration>,
		now: DateTime<Utc>,
	) -> AuthResult<TidyOutcome> {
		let Some(guard) = self.flight(kind).try_acquire() else {
			info!("tidy already running, skipping");
			return Ok(TidyOutcome::AlreadyRunning);
		};
		let buffer = match safety_buffer {
			Some(buffer) => buffer,
			None => self.config(kind).await?.safety_buffer,
		};
		let summary = match kind {
			TidyKind::IdentityWhitelist => self.ledger.tidy_whitelist(buffer, now).await?,
			TidyKind::RoleTagBlacklist => self.ledger.tidy_blacklist(buffer, now).await?,
		};
		guard.complete();
		Ok(TidyOutcome::Completed(summary))
	}

	/// Host tick: at most one pass per cooldown period, skipping disabled kinds.
	pub async fn periodic(&self, now: DateTime<Utc>) -> AuthResult<()> {
		if !self.cooldown.try_begin(now) {
			return Ok(());
		}
		for kind in TidyKind::ALL {
			let config = match self.config(kind).await {
				Ok(config) => config,
				Err(e) => {
					warn!(kind = kind.as_str(), error = %e, "failed to load tidy config");
					continue;
				}
			};
			if config.disable_periodic_tidy {
				continue;
			}
			if let Err(e) = self.run(kind, None, now).await {
				warn!(kind = kind.as_str(), error = %e, "periodic tidy failed");
			}
		}
		Ok(())
	}
}
