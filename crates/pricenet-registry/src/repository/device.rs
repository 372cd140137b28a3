//! # Device Repository
//!
//! Database operations for legacy device rows.
//!
//! ## Upsert Semantics
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                Device Upsert (insert-or-replace)                        │
//! │                                                                         │
//! │  Key: (agent_id, device_id) - PRIMARY KEY, both normalized             │
//! │                                                                         │
//! │  report: { device_id: "till-1", status: "ok" }     stored row:         │
//! │                      │                             name = "Kasse 1"    │
//! │                      ▼                             address = "10.0.0.9"│
//! │  ON CONFLICT(agent_id, device_id) DO UPDATE                            │
//! │    status  ──► "ok"          (provided, overwrites)                    │
//! │    name    ──► "Kasse 1"     (absent, KEPT)                            │
//! │    address ──► "10.0.0.9"    (absent, KEPT)                            │
//! │                                                                         │
//! │  A new null/absent/empty value NEVER clears a known field.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use pricenet_core::ident::NormalizedId;
use pricenet_core::liveness;
use pricenet_core::types::{DevicePresence, DeviceReport, LegacyDevice};

use crate::error::RegistryResult;
use crate::keylock::KeyedLocks;

/// Repository for legacy device rows.
#[derive(Debug, Clone)]
pub struct DeviceRepository {
    pool: SqlitePool,
    locks: Arc<KeyedLocks>,
}

impl DeviceRepository {
    /// Creates a new DeviceRepository.
    pub fn new(pool: SqlitePool, locks: Arc<KeyedLocks>) -> Self {
        DeviceRepository { pool, locks }
    }

    /// Upserts a device report under its owning agent.
    ///
    /// Insert-or-replace keyed on (agent_id, device_id); field-level coalesce
    /// keeps stored values when the report omits them. Same-key writes
    /// serialize; different keys do not contend.
    pub async fn upsert(
        &self,
        agent_id: &str,
        report: &DeviceReport,
        now: DateTime<Utc>,
    ) -> RegistryResult<LegacyDevice> {
        let agent_id = NormalizedId::new(agent_id)?;
        let device_id = NormalizedId::new(&report.device_id)?;
        let _guard = self
            .locks
            .acquire(&KeyedLocks::device_key(agent_id.as_str(), device_id.as_str()))
            .await;

        debug!(agent_id = %agent_id, device_id = %device_id, "Upserting device");

        let kind = report.kind.map(|k| k.to_string());

        sqlx::query(
            r#"
            INSERT INTO devices (
                agent_id, device_id, name, kind, status, address,
                store_code, store_name, updated_at
            ) VALUES (
                ?1, ?2, NULLIF(?3, ''), COALESCE(?4, 'legacy'), NULLIF(?5, ''),
                NULLIF(?6, ''), NULLIF(?7, ''), NULLIF(?8, ''), ?9
            )
            ON CONFLICT(agent_id, device_id) DO UPDATE SET
                name       = COALESCE(NULLIF(?3, ''), devices.name),
                kind       = COALESCE(?4, devices.kind),
                status     = COALESCE(NULLIF(?5, ''), devices.status),
                address    = COALESCE(NULLIF(?6, ''), devices.address),
                store_code = COALESCE(NULLIF(?7, ''), devices.store_code),
                store_name = COALESCE(NULLIF(?8, ''), devices.store_name),
                updated_at = ?9
            "#,
        )
        .bind(agent_id.as_str())
        .bind(device_id.as_str())
        .bind(report.name.as_deref().unwrap_or(""))
        .bind(kind)
        .bind(report.status.as_deref().unwrap_or(""))
        .bind(report.address.as_deref().unwrap_or(""))
        .bind(report.store_code.as_deref().unwrap_or(""))
        .bind(report.store_name.as_deref().unwrap_or(""))
        .bind(now)
        .execute(&self.pool)
        .await?;

        let device = self
            .get(agent_id.as_str(), device_id.as_str())
            .await?
            .ok_or_else(|| crate::error::RegistryError::not_found("Device", device_id.as_str()))?;

        Ok(device)
    }

    /// Gets a device by its key pair.
    pub async fn get(
        &self,
        agent_id: &str,
        device_id: &str,
    ) -> RegistryResult<Option<LegacyDevice>> {
        let agent_id = NormalizedId::new(agent_id)?;
        let device_id = NormalizedId::new(device_id)?;

        let device = sqlx::query_as::<_, LegacyDevice>(
            r#"
            SELECT agent_id, device_id, name, kind, status, address,
                   store_code, store_name, last_sync_at, product_count, updated_at
            FROM devices
            WHERE agent_id = ?1 AND device_id = ?2
            "#,
        )
        .bind(agent_id.as_str())
        .bind(device_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    /// Lists an agent's devices, ordered by device id.
    pub async fn list_for_agent(&self, agent_id: &str) -> RegistryResult<Vec<LegacyDevice>> {
        let agent_id = NormalizedId::new(agent_id)?;

        let devices = sqlx::query_as::<_, LegacyDevice>(
            r#"
            SELECT agent_id, device_id, name, kind, status, address,
                   store_code, store_name, last_sync_at, product_count, updated_at
            FROM devices
            WHERE agent_id = ?1
            ORDER BY device_id
            "#,
        )
        .bind(agent_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(devices)
    }

    /// Lists an agent's devices annotated with evaluated presence.
    ///
    /// Applies the liveness evaluator to each row as of `now`; explicit
    /// offline statuses win over freshness, missing timestamps fail safe.
    pub async fn list_with_presence(
        &self,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> RegistryResult<Vec<DevicePresence>> {
        let devices = self.list_for_agent(agent_id).await?;

        Ok(devices
            .into_iter()
            .map(|device| {
                let presence =
                    liveness::evaluate(device.status.as_deref(), device.updated_at, now);
                DevicePresence { device, presence }
            })
            .collect())
    }

    /// Stamps a successful catalog delivery on a device.
    ///
    /// Returns `false` when no such device row exists (a configured terminal
    /// that never registered); the dispatcher records the delivery either way.
    pub async fn mark_synced(
        &self,
        agent_id: &str,
        device_id: &str,
        product_count: i64,
        when: DateTime<Utc>,
    ) -> RegistryResult<bool> {
        let agent_id = NormalizedId::new(agent_id)?;
        let device_id = NormalizedId::new(device_id)?;
        let _guard = self
            .locks
            .acquire(&KeyedLocks::device_key(agent_id.as_str(), device_id.as_str()))
            .await;

        let result = sqlx::query(
            r#"
            UPDATE devices
            SET last_sync_at = ?3, product_count = ?4
            WHERE agent_id = ?1 AND device_id = ?2
            "#,
        )
        .bind(agent_id.as_str())
        .bind(device_id.as_str())
        .bind(when)
        .bind(product_count)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts all device rows.
    pub async fn count(&self) -> RegistryResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Registry;
    use chrono::Duration;
    use pricenet_core::liveness::Presence;
    use pricenet_core::types::DeviceKind;

    fn report(device_id: &str) -> DeviceReport {
        DeviceReport {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_is_insert_or_replace_on_pair() {
        let registry = Registry::in_memory().await.unwrap();
        let devices = registry.devices();
        let now = Utc::now();

        devices.upsert("a1", &report("till-1"), now).await.unwrap();
        devices.upsert("A1 ", &report("TILL-1"), now).await.unwrap();

        // Same normalized pair: still one row.
        assert_eq!(devices.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_never_clears_known_fields() {
        let registry = Registry::in_memory().await.unwrap();
        let devices = registry.devices();
        let now = Utc::now();

        devices
            .upsert(
                "a1",
                &DeviceReport {
                    device_id: "till-1".into(),
                    name: Some("Kasse 1".into()),
                    kind: Some(DeviceKind::Fixed),
                    address: Some("10.0.0.9".into()),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();

        // Later report carries only a status; one field is explicitly empty.
        let device = devices
            .upsert(
                "a1",
                &DeviceReport {
                    device_id: "till-1".into(),
                    status: Some("ok".into()),
                    name: Some("".into()),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();

        assert_eq!(device.name.as_deref(), Some("Kasse 1"));
        assert_eq!(device.kind, DeviceKind::Fixed);
        assert_eq!(device.address.as_deref(), Some("10.0.0.9"));
        assert_eq!(device.status.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_list_with_presence_applies_evaluator() {
        let registry = Registry::in_memory().await.unwrap();
        let devices = registry.devices();
        let now = Utc::now();

        devices
            .upsert(
                "a1",
                &DeviceReport {
                    device_id: "fresh".into(),
                    status: Some("ok".into()),
                    ..Default::default()
                },
                now - Duration::seconds(60),
            )
            .await
            .unwrap();
        devices
            .upsert(
                "a1",
                &DeviceReport {
                    device_id: "stale".into(),
                    status: Some("ok".into()),
                    ..Default::default()
                },
                now - Duration::seconds(400),
            )
            .await
            .unwrap();
        devices
            .upsert(
                "a1",
                &DeviceReport {
                    device_id: "down".into(),
                    status: Some("error".into()),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();

        let listed = devices.list_with_presence("a1", now).await.unwrap();
        let by_id: std::collections::HashMap<_, _> = listed
            .iter()
            .map(|d| (d.device.device_id.clone(), d.presence))
            .collect();

        assert_eq!(by_id["fresh"], Presence::Online);
        assert_eq!(by_id["stale"], Presence::Offline);
        assert_eq!(by_id["down"], Presence::Offline);
    }

    #[tokio::test]
    async fn test_mark_synced() {
        let registry = Registry::in_memory().await.unwrap();
        let devices = registry.devices();
        let now = Utc::now();

        devices.upsert("a1", &report("till-1"), now).await.unwrap();

        assert!(devices.mark_synced("a1", "till-1", 250, now).await.unwrap());
        assert!(!devices.mark_synced("a1", "ghost", 250, now).await.unwrap());

        let device = devices.get("a1", "till-1").await.unwrap().unwrap();
        assert_eq!(device.product_count, Some(250));
        assert!(device.last_sync_at.is_some());
    }
}
