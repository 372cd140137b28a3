//! # Distribution Dispatcher
//!
//! Pushes the rendered price file to every configured legacy terminal with
//! per-terminal delivery accounting.
//!
//! ## Dispatch Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Dispatch Phase                                    │
//! │                                                                         │
//! │  rendered file ──┬──► [task] till-1: probe ──► transfer ──► Delivered  │
//! │                  ├──► [task] till-2: probe ✗ ───────────► Unreachable  │
//! │                  └──► [task] till-3: probe ──► transfer ✗ ► Failed     │
//! │                                                                         │
//! │  • terminals run as isolated tasks; one failure never touches the      │
//! │    others                                                              │
//! │  • no intra-cycle retries - the next scheduled cycle is the retry      │
//! │  • the whole phase runs under one deadline; terminals unfinished at    │
//! │    the deadline are recorded unreachable for this cycle                │
//! │  • every outcome lands in the rolling history; only Delivered stamps   │
//! │    the owning device's last-sync timestamp and product count           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use pricenet_core::types::{DeliveryOutcome, DeliveryStatus};
use pricenet_registry::repository::device::DeviceRepository;

use crate::config::{DispatchSettings, TerminalConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::history::DeliveryHistory;
use crate::transport;

// =============================================================================
// Summary
// =============================================================================

/// Per-cycle dispatch tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Terminals that acknowledged the file.
    pub delivered: usize,

    /// Terminals reachable but failing the transfer.
    pub transfer_failed: usize,

    /// Terminals failing the probe or unfinished at the phase deadline.
    pub unreachable: usize,
}

impl DispatchSummary {
    /// Total terminals attempted this cycle.
    pub fn total(&self) -> usize {
        self.delivered + self.transfer_failed + self.unreachable
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Pushes rendered files to the configured terminal fleet.
pub struct Dispatcher {
    /// Agent owning the terminals (delivery stamps go to its device rows).
    agent_id: String,

    /// Configured terminals.
    terminals: Vec<TerminalConfig>,

    /// Probe / transfer / phase timeouts.
    settings: DispatchSettings,

    /// Device rows to stamp on successful delivery.
    devices: DeviceRepository,

    /// Rolling outcome history.
    history: Arc<DeliveryHistory>,
}

impl Dispatcher {
    /// Creates a dispatcher for an agent's terminal fleet.
    pub fn new(
        agent_id: impl Into<String>,
        terminals: Vec<TerminalConfig>,
        settings: DispatchSettings,
        devices: DeviceRepository,
        history: Arc<DeliveryHistory>,
    ) -> Self {
        Dispatcher {
            agent_id: agent_id.into(),
            terminals,
            settings,
            devices,
            history,
        }
    }

    /// Number of configured terminals.
    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    /// Dispatches one rendered file to every terminal.
    ///
    /// Terminals run concurrently as isolated tasks under one phase
    /// deadline. Nothing here errors: every outcome is recorded and
    /// tallied, never propagated.
    pub async fn dispatch(&self, payload: &[u8], product_count: usize) -> DispatchSummary {
        if self.terminals.is_empty() {
            debug!("No terminals configured, dispatch is a no-op");
            return DispatchSummary::default();
        }

        info!(
            terminals = self.terminals.len(),
            bytes = payload.len(),
            product_count,
            "Dispatching price file"
        );

        let payload: Arc<[u8]> = Arc::from(payload.to_vec());
        let deadline = Instant::now() + self.settings.phase_timeout();

        let mut tasks: JoinSet<(usize, DeliveryStatus, Option<String>)> = JoinSet::new();
        for (index, terminal) in self.terminals.iter().enumerate() {
            let terminal = terminal.clone();
            let payload = payload.clone();
            let settings = self.settings.clone();
            tasks.spawn(async move {
                let (status, detail) = attempt_terminal(&terminal, &payload, &settings).await;
                (index, status, detail)
            });
        }

        let mut summary = DispatchSummary::default();
        let mut recorded = vec![false; self.terminals.len()];

        loop {
            let joined = match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => joined,
                // All tasks finished.
                Ok(None) => break,
                // Phase deadline: stop waiting, mark the rest unreachable.
                Err(_) => {
                    warn!(
                        phase_timeout_secs = self.settings.phase_timeout_secs,
                        "Dispatch phase deadline exceeded"
                    );
                    tasks.abort_all();
                    break;
                }
            };

            match joined {
                Ok((index, status, detail)) => {
                    recorded[index] = true;
                    self.account(index, status, detail, product_count, &mut summary)
                        .await;
                }
                Err(e) => {
                    // A task that died is a failed transfer for accounting
                    // purposes; its index is unknown, so it is settled in
                    // the deadline sweep below.
                    warn!(error = %e, "Terminal dispatch task failed");
                }
            }
        }

        // Terminals without a recorded outcome (deadline or dead task)
        // are unreachable for this cycle.
        let deadline_detail =
            PipelineError::PhaseTimeout(self.settings.phase_timeout_secs).to_string();
        for index in 0..self.terminals.len() {
            if !recorded[index] {
                self.account(
                    index,
                    DeliveryStatus::Unreachable,
                    Some(deadline_detail.clone()),
                    product_count,
                    &mut summary,
                )
                .await;
            }
        }

        info!(
            delivered = summary.delivered,
            transfer_failed = summary.transfer_failed,
            unreachable = summary.unreachable,
            "Dispatch phase complete"
        );

        summary
    }

    /// Records one terminal outcome: tally, rolling history, and - on
    /// success only - the owning device's sync stamp.
    async fn account(
        &self,
        index: usize,
        status: DeliveryStatus,
        detail: Option<String>,
        product_count: usize,
        summary: &mut DispatchSummary,
    ) {
        let terminal = &self.terminals[index];
        let now = Utc::now();

        match status {
            DeliveryStatus::Delivered => summary.delivered += 1,
            DeliveryStatus::TransferFailed => summary.transfer_failed += 1,
            DeliveryStatus::Unreachable => summary.unreachable += 1,
        }

        self.history
            .record(DeliveryOutcome {
                terminal: terminal.descriptor.clone(),
                address: terminal.endpoint(),
                status,
                detail,
                product_count,
                recorded_at: now,
            })
            .await;

        if status == DeliveryStatus::Delivered {
            match self
                .devices
                .mark_synced(&self.agent_id, terminal.device_id(), product_count as i64, now)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        terminal = %terminal.descriptor,
                        "Delivered to a terminal with no registered device row"
                    );
                }
                Err(e) => {
                    warn!(
                        terminal = %terminal.descriptor,
                        error = %e,
                        "Failed to stamp device sync"
                    );
                }
            }
        }
    }
}

/// One terminal's attempt: probe, then transfer. Isolated per task.
async fn attempt_terminal(
    terminal: &TerminalConfig,
    payload: &[u8],
    settings: &DispatchSettings,
) -> (DeliveryStatus, Option<String>) {
    match try_terminal(terminal, payload, settings).await {
        Ok(()) => (DeliveryStatus::Delivered, None),
        Err(e @ PipelineError::Unreachable(_)) => {
            (DeliveryStatus::Unreachable, Some(e.to_string()))
        }
        Err(e) => (DeliveryStatus::TransferFailed, Some(e.to_string())),
    }
}

async fn try_terminal(
    terminal: &TerminalConfig,
    payload: &[u8],
    settings: &DispatchSettings,
) -> PipelineResult<()> {
    if !transport::probe(&terminal.address, terminal.port, settings.probe_timeout()).await {
        return Err(PipelineError::Unreachable(format!(
            "{}: reachability probe failed",
            terminal.endpoint()
        )));
    }

    transport::deliver(terminal, payload, settings.transfer_timeout()).await
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferMethod;
    use pricenet_registry::Registry;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn terminal(descriptor: &str, port: u16, method: TransferMethod) -> TerminalConfig {
        TerminalConfig {
            descriptor: descriptor.into(),
            address: "127.0.0.1".into(),
            port,
            method,
            username: None,
            password: None,
            remote_path: None,
            device_id: None,
        }
    }

    /// Binds a loopback listener and returns it with its port.
    async fn sink_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// Accepts connections until one carries data: the reachability probe
    /// connects and drops without writing, the transfer follows with the
    /// payload.
    fn drain(listener: TcpListener) -> tokio::task::JoinHandle<Vec<u8>> {
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut received = Vec::new();
                let _ = stream.read_to_end(&mut received).await;
                if !received.is_empty() {
                    return received;
                }
            }
        })
    }

    fn fast_settings() -> DispatchSettings {
        DispatchSettings {
            probe_timeout_secs: 1,
            transfer_timeout_secs: 5,
            phase_timeout_secs: 10,
        }
    }

    #[tokio::test]
    async fn test_partial_failure_isolation() {
        let registry = Registry::in_memory().await.unwrap();
        let history = Arc::new(DeliveryHistory::new(50));

        // Terminals 1 and 3 listen; terminal 2's port is closed.
        let (l1, p1) = sink_listener().await;
        let (l2, p2) = sink_listener().await;
        let (l3, p3) = sink_listener().await;
        drop(l2);
        let d1 = drain(l1);
        let d3 = drain(l3);

        let dispatcher = Dispatcher::new(
            "agent-1",
            vec![
                terminal("till-1", p1, TransferMethod::RawStream),
                terminal("till-2", p2, TransferMethod::RawStream),
                terminal("till-3", p3, TransferMethod::RawStream),
            ],
            fast_settings(),
            registry.devices(),
            history.clone(),
        );

        let summary = dispatcher.dispatch(b"111;Cola;0.99\n", 1).await;

        // The middle terminal's failure never touches its neighbors.
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.unreachable, 1);
        assert_eq!(summary.transfer_failed, 0);

        assert_eq!(d1.await.unwrap(), b"111;Cola;0.99\n");
        assert_eq!(d3.await.unwrap(), b"111;Cola;0.99\n");

        let outcomes = history.recent(10).await;
        assert_eq!(outcomes.len(), 3);
        let failed: Vec<_> = outcomes
            .iter()
            .filter(|o| o.status == DeliveryStatus::Unreachable)
            .map(|o| o.terminal.as_str())
            .collect();
        assert_eq!(failed, vec!["till-2"]);
    }

    #[tokio::test]
    async fn test_delivery_stamps_registered_device_only_on_success() {
        let registry = Registry::in_memory().await.unwrap();
        let history = Arc::new(DeliveryHistory::new(50));
        let now = Utc::now();

        // Register both terminals as devices.
        for id in ["till-1", "till-2"] {
            registry
                .devices()
                .upsert(
                    "agent-1",
                    &pricenet_core::types::DeviceReport {
                        device_id: id.into(),
                        ..Default::default()
                    },
                    now,
                )
                .await
                .unwrap();
        }

        let (l1, p1) = sink_listener().await;
        let (l2, p2) = sink_listener().await;
        drop(l2);
        let d1 = drain(l1);

        let dispatcher = Dispatcher::new(
            "agent-1",
            vec![
                terminal("till-1", p1, TransferMethod::RawStream),
                terminal("till-2", p2, TransferMethod::RawStream),
            ],
            fast_settings(),
            registry.devices(),
            history,
        );

        dispatcher.dispatch(b"111;Cola;0.99\n", 42).await;
        d1.await.unwrap();

        let stamped = registry.devices().get("agent-1", "till-1").await.unwrap().unwrap();
        assert_eq!(stamped.product_count, Some(42));
        assert!(stamped.last_sync_at.is_some());

        // The unreachable terminal's device row is untouched.
        let untouched = registry.devices().get("agent-1", "till-2").await.unwrap().unwrap();
        assert_eq!(untouched.product_count, None);
        assert!(untouched.last_sync_at.is_none());
    }

    #[tokio::test]
    async fn test_phase_deadline_marks_unfinished_unreachable() {
        let registry = Registry::in_memory().await.unwrap();
        let history = Arc::new(DeliveryHistory::new(50));

        // A terminal that accepts the control connection but never greets:
        // the FTP push hangs until its transfer timeout, far past the phase
        // deadline.
        let hang_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hang_port = hang_listener.local_addr().unwrap().port();
        let hold = tokio::spawn(async move {
            let (stream, _) = hang_listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            drop(stream);
        });

        let (l1, p1) = sink_listener().await;
        let d1 = drain(l1);

        let dispatcher = Dispatcher::new(
            "agent-1",
            vec![
                terminal("till-fast", p1, TransferMethod::RawStream),
                terminal("till-hung", hang_port, TransferMethod::FtpPush),
            ],
            DispatchSettings {
                probe_timeout_secs: 1,
                transfer_timeout_secs: 30,
                phase_timeout_secs: 1,
            },
            registry.devices(),
            history.clone(),
        );

        let summary = dispatcher.dispatch(b"111;Cola;0.99\n", 1).await;
        hold.abort();

        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.unreachable, 1);
        d1.await.unwrap();

        let outcomes = history.recent(10).await;
        let hung = outcomes
            .iter()
            .find(|o| o.terminal == "till-hung")
            .unwrap();
        assert_eq!(hung.status, DeliveryStatus::Unreachable);
        assert!(hung.detail.as_deref().unwrap().contains("timed out"));
    }
}
