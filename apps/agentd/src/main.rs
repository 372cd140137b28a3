//! # PriceNet Field Agent Daemon
//!
//! Orchestrates one field installation: heartbeat-driven price distribution
//! plus the scheduled identity reconciliation pass.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          agentd                                         │
//! │                                                                         │
//! │  config.toml ──► PipelineConfig ──┬──► HeartbeatLoop (price cycles)    │
//! │                                   └──► Reconciler interval task        │
//! │                                             │                           │
//! │  SIGINT ──► watch channel ──► both tasks drain and exit                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pricenet_pipeline::config::PipelineConfig;
use pricenet_pipeline::dispatch::Dispatcher;
use pricenet_pipeline::heartbeat::HeartbeatLoop;
use pricenet_pipeline::history::DeliveryHistory;
use pricenet_pipeline::source::CatalogSource;
use pricenet_registry::{IdentityReconciler, Registry, RegistryConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starting PriceNet field agent...");

    // Load configuration (path from the first CLI argument, if given).
    // Configuration faults are the only fatal error class - fail here, not
    // mid-cycle.
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = PipelineConfig::load(config_path)?;
    info!(
        agent_id = %config.agent.id,
        source = %config.source.kind,
        terminals = config.terminals.len(),
        interval_minutes = config.automation_interval_minutes,
        "Configuration loaded"
    );

    // Open the registry
    let registry =
        Registry::new(RegistryConfig::new(config.registry.database_path.clone())).await?;
    info!("Registry ready");

    // Shared delivery history (observability surface)
    let history = Arc::new(DeliveryHistory::new(config.history.capacity));

    // Build the pipeline
    let source = CatalogSource::from_settings(&config.source);
    let dispatcher = Dispatcher::new(
        config.agent.id.clone(),
        config.terminals.clone(),
        config.dispatch.clone(),
        registry.devices(),
        history.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat = HeartbeatLoop::new(
        config.clone(),
        registry.clone(),
        source,
        dispatcher,
        shutdown_rx.clone(),
    )?;
    let heartbeat_task = tokio::spawn(heartbeat.run());

    // Independent reconciliation schedule; a pass already in progress is
    // skipped, never queued.
    let reconciler = IdentityReconciler::new(registry.pool().clone());
    let reconcile_interval = config.reconcile_interval();
    let mut reconcile_shutdown = shutdown_rx.clone();
    let reconciler_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(reconcile_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match reconciler.run().await {
                        Ok(Some(report)) if !report.is_noop() => {
                            info!(
                                identifier_groups = report.identifier_groups_merged,
                                address_groups = report.address_groups_merged,
                                reattached = report.orphans_reattached,
                                orphaned = report.orphans.len(),
                                "Reconciliation merged records"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Reconciliation pass failed"),
                    }
                }
                changed = reconcile_shutdown.changed() => {
                    if changed.is_err() || *reconcile_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received, stopping...");

    if shutdown_tx.send(true).is_err() {
        error!("All pipeline tasks already gone");
    }

    // An in-flight cycle finishes its current phase boundary before exiting.
    let _ = heartbeat_task.await;
    let _ = reconciler_task.await;

    registry.close().await;
    info!("PriceNet field agent stopped");

    Ok(())
}

/// Waits for SIGINT (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}
