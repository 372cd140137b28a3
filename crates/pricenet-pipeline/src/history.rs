//! # Delivery History
//!
//! Bounded rolling history of per-terminal delivery outcomes, exposed to
//! observability tooling.
//!
//! ## Surface
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Delivery History Surface                            │
//! │                                                                         │
//! │  record(outcome)      ── append; oldest entry evicts past capacity     │
//! │  recent(limit)        ── newest-first bounded query                     │
//! │  export(path)         ── full rolling window to a transportable file   │
//! │  clear()              ── administrative reset                           │
//! │                                                                         │
//! │  Outcomes are ephemeral: nothing here persists beyond the export       │
//! │  surface. The most recent outcome is always queryable, even after      │
//! │  a partially failed cycle.                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::VecDeque;
use std::path::Path;

use tokio::sync::RwLock;
use tracing::{debug, info};

use pricenet_core::types::DeliveryOutcome;

use crate::error::PipelineResult;

/// Bounded rolling history of delivery outcomes.
///
/// Shared via `Arc`; readers and the recording writer synchronize on an
/// internal RwLock.
#[derive(Debug)]
pub struct DeliveryHistory {
    capacity: usize,
    entries: RwLock<VecDeque<DeliveryOutcome>>,
}

impl DeliveryHistory {
    /// Creates a history bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        DeliveryHistory {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::new()),
        }
    }

    /// Appends an outcome, evicting the oldest entry past capacity.
    pub async fn record(&self, outcome: DeliveryOutcome) {
        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        debug!(
            terminal = %outcome.terminal,
            status = %outcome.status,
            "Recording delivery outcome"
        );
        entries.push_back(outcome);
    }

    /// Returns up to `limit` outcomes, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<DeliveryOutcome> {
        let entries = self.entries.read().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Number of retained outcomes.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when no outcomes are retained.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Exports the full rolling window as JSON to a transportable file.
    ///
    /// Returns the number of exported entries.
    pub async fn export(&self, path: &Path) -> PipelineResult<usize> {
        let snapshot: Vec<DeliveryOutcome> = {
            let entries = self.entries.read().await;
            entries.iter().cloned().collect()
        };

        let body = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(path, body).await?;

        info!(path = %path.display(), entries = snapshot.len(), "Delivery history exported");
        Ok(snapshot.len())
    }

    /// Administrative clear.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        let dropped = entries.len();
        entries.clear();
        info!(dropped, "Delivery history cleared");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pricenet_core::types::DeliveryStatus;

    fn outcome(terminal: &str, status: DeliveryStatus) -> DeliveryOutcome {
        DeliveryOutcome {
            terminal: terminal.into(),
            address: "10.0.0.9:21".into(),
            status,
            detail: None,
            product_count: 10,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let history = DeliveryHistory::new(3);
        for i in 0..5 {
            history
                .record(outcome(&format!("till-{i}"), DeliveryStatus::Delivered))
                .await;
        }

        assert_eq!(history.len().await, 3);
        let recent = history.recent(10).await;
        let terminals: Vec<_> = recent.iter().map(|o| o.terminal.as_str()).collect();
        // Newest first; till-0 and till-1 were evicted.
        assert_eq!(terminals, vec!["till-4", "till-3", "till-2"]);
    }

    #[tokio::test]
    async fn test_recent_limit() {
        let history = DeliveryHistory::new(10);
        for i in 0..6 {
            history
                .record(outcome(&format!("till-{i}"), DeliveryStatus::Unreachable))
                .await;
        }

        assert_eq!(history.recent(2).await.len(), 2);
        assert_eq!(history.recent(100).await.len(), 6);
    }

    #[tokio::test]
    async fn test_export_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let history = DeliveryHistory::new(10);
        history.record(outcome("till-1", DeliveryStatus::Delivered)).await;
        history
            .record(outcome("till-2", DeliveryStatus::TransferFailed))
            .await;

        let exported = history.export(&path).await.unwrap();
        assert_eq!(exported, 2);

        let body = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<DeliveryOutcome> = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].terminal, "till-1");

        history.clear().await;
        assert!(history.is_empty().await);
    }
}
