// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! keyward server binary.

use clap::{Parser, Subcommand};
use keyward_server::{build_mounts, create_router, AppState, MountedBackend};
use keyward_server_auth::Backend;
use keyward_server_config::{LogFormat, LoggingConfig};
use keyward_server_jobs::{JobScheduler, PeriodicTickJob, RunHistory};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod version;

/// keyward server - pluggable machine and user authentication.
#[derive(Parser, Debug)]
#[command(name = "keyward-server", about = "keyward auth backend host", version)]
struct Args {
	/// TOML config file (defaults to /etc/keyward/server.toml).
	#[arg(long, env = "KEYWARD_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version and build information
	Version,
}

fn init_tracing(logging: &LoggingConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
	let registry = tracing_subscriber::registry().with(filter);
	match logging.format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

/// One periodic tick job fanning out to every mount.
fn build_scheduler(mounts: &BTreeMap<String, Arc<MountedBackend>>, interval: Duration) -> JobScheduler {
	let targets: Vec<(String, Arc<dyn Backend>)> = mounts
		.iter()
		.map(|(path, backend)| (path.clone(), Arc::clone(backend) as Arc<dyn Backend>))
		.collect();
	let mut scheduler = JobScheduler::new(Arc::new(RunHistory::new()));
	scheduler.register_periodic(Arc::new(PeriodicTickJob::new(targets)), interval);
	scheduler
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => keyward_server_config::load_config_with_file(path)?,
		None => keyward_server_config::load_config()?,
	};
	init_tracing(&config.logging);

	tracing::info!(
		addr = %config.socket_addr(),
		mounts = config.mounts.len(),
		default_lease_ttl = %humantime::format_duration(config.system.default_lease_ttl),
		max_lease_ttl = %humantime::format_duration(config.system.max_lease_ttl),
		"starting keyward-server"
	);

	let mounts = build_mounts(&config)?;

	let scheduler = Arc::new(build_scheduler(&mounts, config.jobs.periodic_tick_interval));
	scheduler.start().await;
	tracing::info!(
		interval = %humantime::format_duration(config.jobs.periodic_tick_interval),
		"periodic tick scheduled"
	);

	let state = AppState::new(mounts).with_scheduler(Arc::clone(&scheduler));
	let app = create_router(state).layer(TraceLayer::new_for_http());

	let listener = tokio::net::TcpListener::bind(config.socket_addr()).await?;
	tracing::info!(addr = %listener.local_addr()?, "listening");

	tokio::select! {
		result = axum::serve(listener, app) => {
			if let Err(e) = result {
				tracing::error!(error = %e, "server error");
			}
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("received shutdown signal");
		}
	}

	scheduler.shutdown().await;
	tracing::info!("server shutdown complete");
	Ok(())
}
