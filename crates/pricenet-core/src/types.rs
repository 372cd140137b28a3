//! # Domain Types
//!
//! Core domain types used throughout PriceNet.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Agent       │   │  LegacyDevice   │   │    Product      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (normalized)│   │  agent_id (FK)  │   │  barcode (key)  │       │
//! │  │  store code/name│   │  device_id      │   │  name           │       │
//! │  │  address        │   │  kind           │   │  price_cents    │       │
//! │  │  status         │   │  last_sync_at   │   │  promo          │       │
//! │  │  updated_at     │   │  product_count  │   └─────────────────┘       │
//! │  └─────────────────┘   └─────────────────┘                             │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   StoreLink     │   │ NetworkedDevice │   │ DeliveryOutcome │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  agent_id       │   │  id (UUID)      │   │  terminal       │       │
//! │  │  code           │   │  address        │   │  status         │       │
//! │  │  name           │   │  store_code     │   │  recorded_at    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity Invariants
//! - `Agent.id` is always normalized (trim + case-fold); exactly one live row
//!   per normalized identifier survives reconciliation
//! - `(LegacyDevice.agent_id, LegacyDevice.device_id)` is unique; merges use
//!   insert-or-replace on that pair, never blind insert

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Agent
// =============================================================================

/// A field installation process: one store's local integration point.
///
/// Created on first status report, updated on every heartbeat, removed only
/// by explicit administrative delete or reconciliation merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Agent {
    /// Canonical identifier (normalized: trimmed, case-folded).
    pub id: String,

    /// Display store code reported by the agent.
    pub store_code: Option<String>,

    /// Display store name reported by the agent.
    pub store_name: Option<String>,

    /// Last reported network address.
    pub address: Option<String>,

    /// Last raw status string, as reported.
    pub status: Option<String>,

    /// When the agent last reported.
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Device Kind
// =============================================================================

/// Kind of point-of-sale equipment owned by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Permanently installed equipment (scales, kiosks).
    Fixed,
    /// Legacy terminal consuming the delimited price file.
    Legacy,
}

impl Default for DeviceKind {
    fn default() -> Self {
        DeviceKind::Legacy
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Fixed => write!(f, "fixed"),
            DeviceKind::Legacy => write!(f, "legacy"),
        }
    }
}

// =============================================================================
// Legacy Device
// =============================================================================

/// A terminal owned by an Agent.
///
/// The pair `(agent_id, device_id)` is the primary key. Upserts keyed on the
/// pair use insert-or-replace semantics; field-level coalesce keeps a known
/// value when a newer report omits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LegacyDevice {
    /// Owning agent's canonical id.
    pub agent_id: String,

    /// Device identifier, unique within an agent.
    pub device_id: String,

    /// Display name.
    pub name: Option<String>,

    /// Device kind (fixed/legacy).
    pub kind: DeviceKind,

    /// Last reported status string.
    pub status: Option<String>,

    /// Network address of the terminal.
    pub address: Option<String>,

    /// Optional linked store code.
    pub store_code: Option<String>,

    /// Optional linked store name.
    pub store_name: Option<String>,

    /// When the last catalog sync reached this terminal.
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Product count of the last delivered catalog.
    pub product_count: Option<i64>,

    /// When the device row was last written.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A device annotated with its evaluated presence, as returned by
/// `list_agent_devices`.
#[derive(Debug, Clone, Serialize)]
pub struct DevicePresence {
    /// The underlying device row.
    #[serde(flatten)]
    pub device: LegacyDevice,

    /// Evaluated presence at query time.
    pub presence: crate::liveness::Presence,
}

// =============================================================================
// Device Report (ingress payload)
// =============================================================================

/// One device entry in a `report_device_batch` ingress call.
///
/// All fields except `device_id` are optional: absent fields never clear a
/// previously known value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceReport {
    /// Device identifier, unique within the reporting agent.
    pub device_id: String,

    /// Display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Device kind; defaults to legacy when absent.
    #[serde(default)]
    pub kind: Option<DeviceKind>,

    /// Reported status string.
    #[serde(default)]
    pub status: Option<String>,

    /// Terminal network address.
    #[serde(default)]
    pub address: Option<String>,

    /// Linked store code.
    #[serde(default)]
    pub store_code: Option<String>,

    /// Linked store name.
    #[serde(default)]
    pub store_name: Option<String>,
}

// =============================================================================
// Store Link
// =============================================================================

/// A store location attached to an agent.
///
/// Replaced wholesale by `replace_agent_stores`; migrated with the agent
/// during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StoreLink {
    /// Owning agent's canonical id.
    pub agent_id: String,

    /// Store code, unique within an agent.
    pub code: String,

    /// Display name.
    pub name: Option<String>,
}

// =============================================================================
// Networked Device
// =============================================================================

/// Modern API-managed equipment with a plain CRUD lifecycle.
///
/// Registry-owned; referenced by legacy devices only through the optional
/// store linkage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct NetworkedDevice {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name.
    pub name: String,

    /// Equipment kind label (printer, scale, kiosk...).
    pub kind: Option<String>,

    /// Network address.
    pub address: Option<String>,

    /// Linked store code.
    pub store_code: Option<String>,

    /// Last reported status string.
    pub status: Option<String>,

    /// When the row was last written.
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Product
// =============================================================================

/// A product in the canonical price catalog.
///
/// Prices are integer cents (smallest currency unit); decimal text exists
/// only in the rendered legacy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Barcode - the unique catalog key.
    pub barcode: String,

    /// Display name shown on the terminal.
    pub name: String,

    /// Price in cents.
    pub price_cents: i64,

    /// Optional promotion text.
    pub promo: Option<String>,
}

impl Product {
    /// Creates a product with no promotion.
    pub fn new(barcode: impl Into<String>, name: impl Into<String>, price_cents: i64) -> Self {
        Product {
            barcode: barcode.into(),
            name: name.into(),
            price_cents,
            promo: None,
        }
    }
}

// =============================================================================
// Delivery Outcome
// =============================================================================

/// Result of one terminal delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// File transferred and acknowledged.
    Delivered,
    /// Terminal reachable but the transfer failed.
    TransferFailed,
    /// Reachability probe failed or the dispatch deadline passed first.
    Unreachable,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::TransferFailed => write!(f, "transfer-failed"),
            DeliveryStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Per-terminal, per-cycle delivery accounting entry.
///
/// Ephemeral: lives only in the bounded rolling history, never persisted
/// beyond the export surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    /// Terminal descriptor from configuration.
    pub terminal: String,

    /// Terminal address:port.
    pub address: String,

    /// Attempt result.
    pub status: DeliveryStatus,

    /// Failure detail, when there is one.
    pub detail: Option<String>,

    /// Product count of the file offered to the terminal.
    pub product_count: usize,

    /// When the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_default() {
        assert_eq!(DeviceKind::default(), DeviceKind::Legacy);
    }

    #[test]
    fn test_delivery_status_display() {
        assert_eq!(DeliveryStatus::Delivered.to_string(), "delivered");
        assert_eq!(DeliveryStatus::TransferFailed.to_string(), "transfer-failed");
        assert_eq!(DeliveryStatus::Unreachable.to_string(), "unreachable");
    }

    #[test]
    fn test_device_report_optional_fields_deserialize() {
        let report: DeviceReport =
            serde_json::from_str(r#"{"device_id": "till-1", "status": "ok"}"#).unwrap();
        assert_eq!(report.device_id, "till-1");
        assert_eq!(report.status.as_deref(), Some("ok"));
        assert!(report.name.is_none());
        assert!(report.kind.is_none());
    }
}
