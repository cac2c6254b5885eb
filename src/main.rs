//! Bootstrap — process entry point. Loads configuration, wires the host
//! engine's dependencies, and runs until a shutdown signal arrives.
//!
//! Extension implementations, the artifact resolver/classloader, and the
//! scanner backend are out of scope for this crate (spec.md §1) and are
//! expected to be supplied by the deployment; the defaults wired in below
//! are placeholders that make a freshly-built host observable without
//! those collaborators plugged in.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use exec_host::config::HostConfig;
use exec_host::container::{ArtifactFactory, ArtifactHandle};
use exec_host::controller::HttpControllerClient;
use exec_host::engine::HostEngine;
use exec_host::extension::Extension;
use exec_host::model::{ControllerEndpoint, Coordinates};
use exec_host::scanner::{ScannerFactory, ScannerHandle, ScannerRuntimeStatus};
use exec_host::state_store::FileStateStore;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// No artifact resolver is wired in by default; every resolution fails
/// until a deployment-specific [`ArtifactFactory`] replaces this one.
struct UnresolvedArtifactFactory;

#[async_trait]
impl ArtifactFactory for UnresolvedArtifactFactory {
    async fn resolve(&self, coordinates: &Coordinates) -> Option<Arc<dyn ArtifactHandle>> {
        warn!("no artifact resolver configured, cannot resolve {}", coordinates);
        None
    }
}

/// In-memory scanner handle used until a deployment wires in one backed by
/// the actual artifact runtime. Transitions always succeed.
struct NoopScannerHandle {
    status: Mutex<ScannerRuntimeStatus>,
}

#[async_trait]
impl ScannerHandle for NoopScannerHandle {
    async fn status(&self) -> ScannerRuntimeStatus {
        *self.status.lock().await
    }

    async fn start(&self, _poll_interval_ms: u64) -> Result<(), String> {
        *self.status.lock().await = ScannerRuntimeStatus::Running;
        Ok(())
    }

    async fn stop(&self) -> Result<(), String> {
        *self.status.lock().await = ScannerRuntimeStatus::Stopped;
        Ok(())
    }

    async fn scan_now(&self) -> Result<(), String> {
        *self.status.lock().await = ScannerRuntimeStatus::Scanning;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), String> {
        *self.status.lock().await = ScannerRuntimeStatus::Shutdown;
        Ok(())
    }
}

struct NoopScannerFactory;

impl ScannerFactory for NoopScannerFactory {
    fn create(&self, _artifact: &Arc<dyn ArtifactHandle>) -> Box<dyn ScannerHandle> {
        Box::new(NoopScannerHandle {
            status: Mutex::new(ScannerRuntimeStatus::Stopped),
        })
    }
}

/// No built-in capability extensions ship with this crate; a deployment
/// registers its own by replacing this discovery function.
fn discover_extensions() -> Vec<Arc<dyn Extension>> {
    Vec::new()
}

#[tokio::main]
async fn main() -> Result<()> {
    let _basic_tracing = init_tracing_basic();

    info!("starting exec-host v{}", env!("CARGO_PKG_VERSION"));

    let config = HostConfig::load().map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("configuration validation failed: {e}"))?;

    drop(_basic_tracing);
    init_tracing_global();

    info!("configuration loaded: server_id={}, state_dir={}", config.server_id, config.state_dir);

    let state_store = Arc::new(FileStateStore::new(config.state_dir.clone()));
    let controller_endpoints = config
        .controllers
        .iter()
        .map(|url| ControllerEndpoint { url: url.clone() })
        .collect();
    let controller_client = Arc::new(HttpControllerClient::new(controller_endpoints));

    let engine = HostEngine::bootstrap(
        config,
        discover_extensions,
        Arc::new(UnresolvedArtifactFactory),
        Arc::new(NoopScannerFactory),
        state_store,
        controller_client,
    )
    .await
    .context("failed to bootstrap host engine")?;

    info!("exec-host is ready");

    shutdown_signal().await;

    info!("shutting down");
    engine.destroy().await;
    info!("shutdown complete");

    Ok(())
}

/// Phase 1: minimal tracing so config loading itself can log. Uses
/// `set_default` (thread-local) so it can be replaced by phase 2's global
/// subscriber once configuration is known.
fn init_tracing_basic() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_default(subscriber)
}

/// Phase 2: the global subscriber used for the rest of the process
/// lifetime.
fn init_tracing_global() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            warn!("received SIGTERM, initiating graceful shutdown");
        }
    }
}
