//! # Heartbeat Loop
//!
//! Periodic driver tying catalog fetch → render → dispatch → registry
//! update, one cycle per interval.
//!
//! ## Cycle State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Heartbeat Cycle                                    │
//! │                                                                         │
//! │          ┌──────────────────────────────────────────────┐              │
//! │          ▼                                              │              │
//! │  ┌────────────┐   presence upsert first, regardless     │              │
//! │  │    Idle    │   of downstream outcome                 │              │
//! │  └─────┬──────┘                                         │              │
//! │        ▼                                                │              │
//! │  ┌────────────┐  non-empty source  ┌────────────┐       │              │
//! │  │  Fetching  │ ─────────────────► │ Rendering  │       │              │
//! │  └─────┬──────┘                    └─────┬──────┘       │              │
//! │        │ empty / failed source           ▼              │              │
//! │        │ (failure annotation,      ┌────────────┐       │              │
//! │        │  render+dispatch skipped) │Dispatching │       │              │
//! │        │                           └─────┬──────┘       │              │
//! │        ▼                                 ▼              │              │
//! │  ┌──────────────────────────────────────────┐           │              │
//! │  │                Reporting                 │ ──────────┘              │
//! │  └──────────────────────────────────────────┘                          │
//! │                                                                         │
//! │  • cycles never overlap: the next tick waits for Reporting             │
//! │  • a cooperative stop signal is checked BETWEEN phases, never          │
//! │    mid-transfer - an in-flight transfer completes or fails cleanly     │
//! │  • the last cycle outcome is always queryable, even after partial      │
//! │    failure                                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

use pricenet_core::render::{self, RenderLayout};
use pricenet_registry::{AgentStatusUpdate, Registry};

use crate::config::{PipelineConfig, SourceKind};
use crate::dispatch::{DispatchSummary, Dispatcher};
use crate::error::PipelineResult;
use crate::source::CatalogSource;

// =============================================================================
// Cycle Phase
// =============================================================================

/// Phases of one heartbeat cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Rendering,
    Dispatching,
    Reporting,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CyclePhase::Idle => write!(f, "idle"),
            CyclePhase::Fetching => write!(f, "fetching"),
            CyclePhase::Rendering => write!(f, "rendering"),
            CyclePhase::Dispatching => write!(f, "dispatching"),
            CyclePhase::Reporting => write!(f, "reporting"),
        }
    }
}

// =============================================================================
// Cycle Outcome
// =============================================================================

/// Result of one heartbeat cycle, kept queryable after the cycle ends.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// The furthest phase the cycle reached before Reporting.
    pub phase_reached: CyclePhase,

    /// When the cycle started.
    pub started_at: DateTime<Utc>,

    /// When the cycle reached Reporting.
    pub finished_at: DateTime<Utc>,

    /// Source kind that fed the cycle.
    pub source_kind: SourceKind,

    /// Products fetched this cycle.
    pub product_count: usize,

    /// Bytes of rendered price file (0 when rendering was skipped).
    pub rendered_bytes: usize,

    /// Why the source produced nothing, when it did - the cycle skipped
    /// render and dispatch and went straight to Reporting.
    pub source_failure: Option<String>,

    /// Dispatch tallies, when the cycle reached Dispatching.
    pub dispatch: Option<DispatchSummary>,

    /// True when a stop signal cut the cycle short between phases.
    pub stopped_early: bool,
}

impl CycleOutcome {
    /// True when the cycle fetched, rendered and dispatched.
    pub fn completed_pipeline(&self) -> bool {
        self.source_failure.is_none() && self.dispatch.is_some()
    }
}

// =============================================================================
// Heartbeat Loop
// =============================================================================

/// The per-agent heartbeat driver.
///
/// One recurring timer per agent process; cycles do not overlap.
pub struct HeartbeatLoop {
    config: PipelineConfig,
    registry: Registry,
    source: CatalogSource,
    layout: RenderLayout,
    dispatcher: Dispatcher,
    last_outcome: Arc<RwLock<Option<CycleOutcome>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl HeartbeatLoop {
    /// Creates the heartbeat loop.
    ///
    /// Fails only on configuration faults (an unusable render layout).
    pub fn new(
        config: PipelineConfig,
        registry: Registry,
        source: CatalogSource,
        dispatcher: Dispatcher,
        shutdown_rx: watch::Receiver<bool>,
    ) -> PipelineResult<Self> {
        let layout = config.render.layout()?;

        Ok(HeartbeatLoop {
            config,
            registry,
            source,
            layout,
            dispatcher,
            last_outcome: Arc::new(RwLock::new(None)),
            shutdown_rx,
        })
    }

    /// Shared handle to the most recent cycle outcome.
    pub fn outcome_handle(&self) -> Arc<RwLock<Option<CycleOutcome>>> {
        self.last_outcome.clone()
    }

    /// Runs cycles until the stop signal flips.
    ///
    /// The first cycle runs immediately; later cycles follow the configured
    /// interval. A cycle in progress always finishes before the loop exits.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.automation_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_minutes = self.config.automation_interval_minutes,
            terminals = self.dispatcher.terminal_count(),
            "Heartbeat loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.stop_requested() {
                        break;
                    }
                    let outcome = self.run_cycle().await;
                    *self.last_outcome.write().await = Some(outcome);
                }
                changed = self.shutdown_rx.changed() => {
                    // A dropped sender means no further signals can come.
                    if changed.is_err() || self.stop_requested() {
                        break;
                    }
                }
            }
        }

        info!("Heartbeat loop stopped");
    }

    /// Runs one full cycle: Idle → Fetching → Rendering → Dispatching →
    /// Reporting.
    ///
    /// The stop signal is honored between phases only, so an in-flight
    /// transfer always completes or fails cleanly.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let started_at = Utc::now();

        // Own presence first: liveness tracking is decoupled from whatever
        // the rest of the cycle does.
        self.report_presence().await;

        // Fetching
        let fetch = self.source.fetch().await;

        if fetch.products.is_empty() {
            // Empty or failed source: straight to Reporting with the
            // annotation; render and dispatch are skipped entirely.
            let reason = fetch
                .failure
                .unwrap_or_else(|| "source returned zero products".to_string());
            warn!(source = %self.source.kind(), reason = %reason, "Cycle skipped render and dispatch");
            return self.finish(CycleOutcome {
                phase_reached: CyclePhase::Fetching,
                started_at,
                finished_at: Utc::now(),
                source_kind: self.source.kind(),
                product_count: 0,
                rendered_bytes: 0,
                source_failure: Some(reason),
                dispatch: None,
                stopped_early: false,
            });
        }

        if self.stop_requested() {
            return self.finish(self.stopped(
                CyclePhase::Fetching,
                started_at,
                fetch.products.len(),
                0,
            ));
        }

        // Rendering - a non-empty catalog whose exported fields are all
        // empty still yields present lines, and still dispatches.
        let body = render::render(&fetch.products, &self.layout);
        let rendered_bytes = body.len();

        if self.stop_requested() {
            return self.finish(self.stopped(
                CyclePhase::Rendering,
                started_at,
                fetch.products.len(),
                rendered_bytes,
            ));
        }

        // Dispatching
        let summary = self
            .dispatcher
            .dispatch(body.as_bytes(), fetch.products.len())
            .await;

        // Reporting
        self.finish(CycleOutcome {
            phase_reached: CyclePhase::Dispatching,
            started_at,
            finished_at: Utc::now(),
            source_kind: self.source.kind(),
            product_count: fetch.products.len(),
            rendered_bytes,
            source_failure: None,
            dispatch: Some(summary),
            stopped_early: false,
        })
    }

    /// Reports this agent's own presence; failure is logged, never fatal.
    async fn report_presence(&self) {
        let update = AgentStatusUpdate {
            agent_id: self.config.agent.id.clone(),
            store_code: self.config.agent.store_code.clone(),
            store_name: self.config.agent.store_name.clone(),
            status: Some("ok".to_string()),
            address: None,
            timestamp: None,
        };

        if let Err(e) = self.registry.report_agent_status(update).await {
            warn!(error = %e, "Failed to report agent presence");
        }
    }

    fn finish(&self, outcome: CycleOutcome) -> CycleOutcome {
        info!(
            source = %outcome.source_kind,
            products = outcome.product_count,
            rendered_bytes = outcome.rendered_bytes,
            source_failure = outcome.source_failure.as_deref().unwrap_or("none"),
            delivered = outcome.dispatch.map(|d| d.delivered).unwrap_or(0),
            "Cycle complete"
        );
        outcome
    }

    fn stopped(
        &self,
        phase_reached: CyclePhase,
        started_at: DateTime<Utc>,
        products: usize,
        bytes: usize,
    ) -> CycleOutcome {
        CycleOutcome {
            phase_reached,
            started_at,
            finished_at: Utc::now(),
            source_kind: self.source.kind(),
            product_count: products,
            rendered_bytes: bytes,
            source_failure: None,
            dispatch: None,
            stopped_early: true,
        }
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
