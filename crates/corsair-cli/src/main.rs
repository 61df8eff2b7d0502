// SPDX-License-Identifier: GPL-3.0-or-later
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use corsair_application::{AppState, Collaborators, SystemClock, TracingEventPublisher};
use corsair_config::{load as load_config, TelemetryConfig};
use corsair_infrastructure::{http_client, init_library, InMemoryBlocklist, PathCheckImporter};
use corsair_scheduler::Scheduler;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(config_path(std::env::args_os()).as_deref())?;
    init_tracing(&config.telemetry);

    if let Err(errors) = config.validate() {
        for problem in &errors {
            error!(target: "cli", "{}", problem);
        }
        bail!("invalid configuration: {} problem(s)", errors.len());
    }

    let library = init_library(&config).await?;
    let state = AppState::new(
        config,
        Collaborators {
            library: library.clone(),
            blocklist: Arc::new(InMemoryBlocklist::new()),
            importer: Arc::new(PathCheckImporter::new(library)),
            events: Arc::new(TracingEventPublisher),
            clock: Arc::new(SystemClock),
            http: http_client()?,
        },
    )?;
    state.on_start();
    check_indexers(&state).await;

    let scheduler = Scheduler::new(state);
    scheduler.register_jobs().await;
    let scheduler_handle = scheduler.start();
    info!(target: "cli", "corsair running");

    shutdown_signal().await;
    scheduler.shutdown();
    scheduler_handle.await?;
    info!(target: "cli", "stopped");

    Ok(())
}

/// First positional argument, if any, is the TOML config file.
fn config_path(mut args: impl Iterator<Item = OsString>) -> Option<PathBuf> {
    args.nth(1).map(PathBuf::from)
}

fn init_tracing(telemetry: &TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&telemetry.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    if telemetry.json {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_names(true).with_level(true))
            .init();
    }
}

async fn check_indexers(state: &AppState) {
    for indexer in &state.indexers {
        match indexer.test_connection().await {
            Ok(()) => info!(target: "cli", indexer = indexer.name(), "indexer reachable"),
            Err(err) => warn!(target: "cli", indexer = indexer.name(), error = %err, "indexer check failed"),
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let mut interrupt = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("install SIGINT handler");

    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("install SIGTERM handler");

    #[cfg(not(unix))]
    let interrupt = tokio::signal::ctrl_c();

    #[cfg(unix)]
    tokio::select! {
        _ = interrupt.recv() => {},
        _ = terminate.recv() => {},
    }

    #[cfg(not(unix))]
    {
        interrupt.await.expect("ctrl_c handler");
    }

    info!(target: "cli", "shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_first_argument() {
        let args = ["corsair", "/etc/corsair.toml"].map(OsString::from);
        assert_eq!(
            config_path(args.into_iter()),
            Some(PathBuf::from("/etc/corsair.toml"))
        );
    }

    #[test]
    fn config_path_is_optional() {
        let args = ["corsair"].map(OsString::from);
        assert_eq!(config_path(args.into_iter()), None);
    }

    #[cfg(unix)]
    #[test]
    fn unix_signal_kinds_available() {
        use tokio::signal::unix::SignalKind;
        let _ = SignalKind::interrupt();
        let _ = SignalKind::terminate();
    }
}
