//! # Liveness Evaluator
//!
//! Pure online/offline evaluation from a reported status string and a
//! last-update timestamp.
//!
//! ## Decision Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Liveness Decision Tree                             │
//! │                                                                         │
//! │  status string                                                          │
//! │       │                                                                 │
//! │       ├── explicit OFFLINE vocabulary ──────────────► Offline          │
//! │       │   (offline, unknown, disabled, error,                          │
//! │       │    inactive - case-insensitive)                                │
//! │       │                                                                 │
//! │       ├── explicit ONLINE vocabulary ──┐                               │
//! │       │   (ok, online, active, success)│                               │
//! │       │                                ├──► freshness check:           │
//! │       └── absent / unrecognized ───────┘    now - last_update <= 120s  │
//! │                                              │            │             │
//! │                                           within        beyond /        │
//! │                                              │          missing         │
//! │                                              ▼            ▼             │
//! │                                           Online       Offline          │
//! │                                                                         │
//! │  Explicit signals always win over freshness. A missing or              │
//! │  unparseable timestamp fails safe to Offline.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The evaluator takes `now` as an argument so it stays deterministic and
//! directly testable; it never reads a clock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Freshness Window
// =============================================================================

/// Freshness threshold for inferring liveness absent an explicit status.
pub const FRESHNESS_WINDOW: Duration = Duration::seconds(120);

// =============================================================================
// Presence
// =============================================================================

/// Evaluated presence of an agent or device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Reporting and fresh, or explicitly online and fresh.
    Online,
    /// Explicitly down, stale, or never heard from.
    Offline,
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Presence::Online => write!(f, "online"),
            Presence::Offline => write!(f, "offline"),
        }
    }
}

// =============================================================================
// Reported Status Vocabulary
// =============================================================================

/// Classification of a raw reported status string.
///
/// The vocabularies are an explicit mapping table rather than ad hoc string
/// comparison, so both sets are exhaustive and testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedStatus {
    /// Explicit online vocabulary: ok, online, active, success.
    ExplicitOnline,
    /// Explicit offline vocabulary: offline, unknown, disabled, error, inactive.
    ExplicitOffline,
    /// Anything else, including an absent status.
    Ambiguous,
}

impl ReportedStatus {
    /// Classifies a raw status string, case-insensitively.
    pub fn classify(status: Option<&str>) -> Self {
        let Some(raw) = status else {
            return ReportedStatus::Ambiguous;
        };

        match raw.trim().to_lowercase().as_str() {
            "offline" | "unknown" | "disabled" | "error" | "inactive" => {
                ReportedStatus::ExplicitOffline
            }
            "ok" | "online" | "active" | "success" => ReportedStatus::ExplicitOnline,
            _ => ReportedStatus::Ambiguous,
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Evaluates presence from a raw status string and a last-update timestamp.
///
/// - An explicit offline status wins unconditionally.
/// - An explicit online or ambiguous/absent status falls back to freshness:
///   online iff `now - last_update <= FRESHNESS_WINDOW`.
/// - A missing timestamp is offline (fail safe).
pub fn evaluate(
    status: Option<&str>,
    last_update: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Presence {
    if ReportedStatus::classify(status) == ReportedStatus::ExplicitOffline {
        return Presence::Offline;
    }

    match last_update {
        Some(ts) if now.signed_duration_since(ts) <= FRESHNESS_WINDOW => Presence::Online,
        _ => Presence::Offline,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2025-06-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_fresh_ok_is_online() {
        let last = now() - Duration::seconds(60);
        assert_eq!(evaluate(Some("ok"), Some(last), now()), Presence::Online);
    }

    #[test]
    fn test_stale_ok_is_offline() {
        let last = now() - Duration::seconds(200);
        assert_eq!(evaluate(Some("ok"), Some(last), now()), Presence::Offline);
    }

    #[test]
    fn test_explicit_offline_overrides_freshness() {
        // Reported down this very second: still offline.
        assert_eq!(
            evaluate(Some("offline"), Some(now()), now()),
            Presence::Offline
        );
        assert_eq!(
            evaluate(Some("ERROR"), Some(now()), now()),
            Presence::Offline
        );
    }

    #[test]
    fn test_offline_vocabulary_is_case_insensitive() {
        for s in ["Offline", "UNKNOWN", "Disabled", "eRRor", " inactive "] {
            assert_eq!(
                ReportedStatus::classify(Some(s)),
                ReportedStatus::ExplicitOffline,
                "status {s:?}"
            );
        }
    }

    #[test]
    fn test_ambiguous_status_uses_freshness() {
        let fresh = now() - Duration::seconds(30);
        let stale = now() - Duration::seconds(500);
        assert_eq!(
            evaluate(Some("rebooting"), Some(fresh), now()),
            Presence::Online
        );
        assert_eq!(
            evaluate(Some("rebooting"), Some(stale), now()),
            Presence::Offline
        );
    }

    #[test]
    fn test_absent_status_uses_freshness() {
        let fresh = now() - Duration::seconds(119);
        assert_eq!(evaluate(None, Some(fresh), now()), Presence::Online);
    }

    #[test]
    fn test_boundary_exactly_120s_is_online() {
        let last = now() - FRESHNESS_WINDOW;
        assert_eq!(evaluate(Some("ok"), Some(last), now()), Presence::Online);
    }

    #[test]
    fn test_missing_timestamp_fails_safe() {
        assert_eq!(evaluate(Some("ok"), None, now()), Presence::Offline);
        assert_eq!(evaluate(None, None, now()), Presence::Offline);
    }
}
