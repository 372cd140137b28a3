//! # Identity Reconciler
//!
//! Batch pass that converges drifting agent identities onto one canonical
//! record per physical agent.
//!
//! ## Merge Strategies
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Reconciliation Pass                                 │
//! │                                                                         │
//! │  1. MERGE BY IDENTIFIER                                                │
//! │     agents: "STORE-1", "store-1", "Store-1 "                           │
//! │         │ group by normalized id                                       │
//! │         ▼                                                               │
//! │     canonical = newest valid updated_at                                │
//! │     (tie / no timestamp → lexicographic smallest raw id)               │
//! │     dependents rewritten to canonical, losers deleted                  │
//! │                                                                         │
//! │  2. MERGE BY NETWORK ADDRESS                                           │
//! │     agents: "pos-old", "pos-new" both at 10.0.0.7                      │
//! │         │ group by non-empty address                                   │
//! │         ▼                                                               │
//! │     same canonical rule; dependents COPIED first                       │
//! │     (insert if absent, else keep newer) so pre-existing rows           │
//! │     under the canonical key never violate the (agent, device)          │
//! │     uniqueness; then losers and their leftovers are deleted            │
//! │                                                                         │
//! │  3. ORPHAN REATTACHMENT                                                │
//! │     device rows whose agent vanished are reassigned to the             │
//! │     canonical agent at their last known address, or reported -         │
//! │     never silently dropped                                             │
//! │                                                                         │
//! │  Each merge group runs in its own short transaction; a malformed       │
//! │  record is logged with its raw data and skipped, the pass continues.   │
//! │  The pass is idempotent and refuses to overlap itself.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use pricenet_core::ident::normalize_id;

use crate::error::{RegistryError, RegistryResult};

// =============================================================================
// Report
// =============================================================================

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
    /// Identifier groups that required a merge.
    pub identifier_groups_merged: usize,

    /// Address groups that required a merge.
    pub address_groups_merged: usize,

    /// Device rows rewritten to a canonical agent.
    pub devices_migrated: usize,

    /// Orphaned devices successfully reattached.
    pub orphans_reattached: usize,

    /// Orphaned devices with no reattachment target: (agent_id, device_id).
    /// Reported, never dropped.
    pub orphans: Vec<(String, String)>,

    /// Merge groups skipped because of malformed data or a per-group failure.
    pub skipped_groups: usize,
}

impl ReconcileReport {
    /// True when the pass found nothing to do.
    pub fn is_noop(&self) -> bool {
        self.identifier_groups_merged == 0
            && self.address_groups_merged == 0
            && self.devices_migrated == 0
            && self.orphans_reattached == 0
    }
}

// =============================================================================
// Raw Rows (lenient reads)
// =============================================================================
// The reconciler reads timestamps as raw TEXT and parses them leniently:
// a garbage timestamp makes a row sort as "oldest", it never aborts the pass.

#[derive(Debug, Clone, sqlx::FromRow)]
struct RawAgentRow {
    id: String,
    store_code: Option<String>,
    store_name: Option<String>,
    address: Option<String>,
    status: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct RawDeviceRow {
    agent_id: String,
    device_id: String,
    address: Option<String>,
}

/// Parses a stored timestamp leniently; `None` for absent or unparseable.
///
/// Accepts RFC3339, the space-separated offset form sqlx writes for
/// `DateTime<Utc>`, and the bare naive form some historical rows carry.
fn parse_ts(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    None
}

// =============================================================================
// Reconciler
// =============================================================================

/// Periodic identity reconciliation over the registry.
#[derive(Debug, Clone)]
pub struct IdentityReconciler {
    pool: SqlitePool,

    /// Non-reentrancy guard: a pass that finds this held skips itself.
    running: Arc<Mutex<()>>,
}

impl IdentityReconciler {
    /// Creates a reconciler over a registry pool.
    pub fn new(pool: SqlitePool) -> Self {
        IdentityReconciler {
            pool,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Runs one reconciliation pass.
    ///
    /// Returns `Ok(None)` when a pass is already in progress (the scheduled
    /// caller skips, it does not queue). Safe to re-run on a schedule: a
    /// second pass over converged data is a no-op.
    pub async fn run(&self) -> RegistryResult<Option<ReconcileReport>> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Reconciliation already in progress, skipping this run");
            return Ok(None);
        };

        info!("Starting identity reconciliation pass");
        let mut report = ReconcileReport::default();

        self.merge_by_identifier(&mut report).await?;
        self.merge_by_address(&mut report).await?;
        self.reattach_orphans(&mut report).await?;

        info!(
            identifier_groups = report.identifier_groups_merged,
            address_groups = report.address_groups_merged,
            devices_migrated = report.devices_migrated,
            reattached = report.orphans_reattached,
            orphaned = report.orphans.len(),
            skipped = report.skipped_groups,
            "Reconciliation pass complete"
        );

        Ok(Some(report))
    }

    // =========================================================================
    // Merge by identifier
    // =========================================================================

    async fn merge_by_identifier(&self, report: &mut ReconcileReport) -> RegistryResult<()> {
        let rows = self.load_agents().await?;

        let mut groups: BTreeMap<String, Vec<RawAgentRow>> = BTreeMap::new();
        for row in rows {
            let canonical = normalize_id(&row.id);
            if canonical.is_empty() {
                warn!(raw = ?row.id, "Skipping agent row with blank identifier");
                report.skipped_groups += 1;
                continue;
            }
            groups.entry(canonical).or_default().push(row);
        }

        for (canonical_id, members) in groups {
            let already_canonical = members.len() == 1 && members[0].id == canonical_id;
            if already_canonical {
                continue;
            }

            match self.merge_group(&canonical_id, &members).await {
                Ok(migrated) => {
                    report.identifier_groups_merged += 1;
                    report.devices_migrated += migrated;
                }
                Err(e) => {
                    warn!(
                        canonical = %canonical_id,
                        raw_members = ?members.iter().map(|m| &m.id).collect::<Vec<_>>(),
                        error = %e,
                        "Skipping identifier merge group"
                    );
                    report.skipped_groups += 1;
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // Merge by network address
    // =========================================================================

    async fn merge_by_address(&self, report: &mut ReconcileReport) -> RegistryResult<()> {
        let rows = self.load_agents().await?;

        let mut groups: BTreeMap<String, Vec<RawAgentRow>> = BTreeMap::new();
        for row in rows {
            let Some(address) = row.address.as_deref().map(str::trim) else {
                continue;
            };
            if address.is_empty() {
                continue;
            }
            groups.entry(address.to_string()).or_default().push(row);
        }

        for (address, members) in groups {
            if members.len() < 2 {
                continue;
            }

            let canonical_id = pick_canonical(&members).id.clone();
            match self.merge_group(&canonical_id, &members).await {
                Ok(migrated) => {
                    report.address_groups_merged += 1;
                    report.devices_migrated += migrated;
                }
                Err(e) => {
                    warn!(
                        address = %address,
                        raw_members = ?members.iter().map(|m| &m.id).collect::<Vec<_>>(),
                        error = %e,
                        "Skipping address merge group"
                    );
                    report.skipped_groups += 1;
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // Group merge (shared by both strategies)
    // =========================================================================

    /// Merges a group of agent rows into one canonical row.
    ///
    /// The canonical record's fields are coalesced newest-first across the
    /// group and re-upserted under `canonical_id`. Dependent device rows move
    /// with insert-if-absent-else-keep-newer semantics on the (agent, device)
    /// pair; store links move with insert-if-absent. Non-canonical agent rows
    /// and their leftovers are deleted. One transaction per group.
    async fn merge_group(
        &self,
        canonical_id: &str,
        members: &[RawAgentRow],
    ) -> RegistryResult<usize> {
        let mut ordered: Vec<&RawAgentRow> = members.iter().collect();
        ordered.sort_by(|a, b| compare_recency(a, b)); // newest first

        // Coalesce canonical field values across members, newest wins.
        let mut merged = (*pick_canonical(members)).clone();
        for member in &ordered {
            merged.store_code = merged.store_code.or_else(|| member.store_code.clone());
            merged.store_name = merged.store_name.or_else(|| member.store_name.clone());
            merged.address = merged.address.or_else(|| member.address.clone());
            merged.status = merged.status.or_else(|| member.status.clone());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RegistryError::TransactionFailed(e.to_string()))?;

        let mut migrated = 0usize;

        // Re-upsert the canonical record under the canonical identifier.
        sqlx::query(
            r#"
            INSERT INTO agents (id, store_code, store_name, address, status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                store_code = excluded.store_code,
                store_name = excluded.store_name,
                address    = excluded.address,
                status     = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(canonical_id)
        .bind(&merged.store_code)
        .bind(&merged.store_name)
        .bind(&merged.address)
        .bind(&merged.status)
        .bind(&merged.updated_at)
        .execute(&mut *tx)
        .await?;

        for member in &ordered {
            if member.id == canonical_id {
                continue;
            }
            migrated += migrate_devices(&mut tx, &member.id, canonical_id).await?;
            migrate_stores(&mut tx, &member.id, canonical_id).await?;

            sqlx::query("DELETE FROM agents WHERE id = ?1")
                .bind(&member.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit()
            .await
            .map_err(|e| RegistryError::TransactionFailed(e.to_string()))?;

        debug!(canonical = %canonical_id, migrated, "Merged agent group");
        Ok(migrated)
    }

    // =========================================================================
    // Orphan reattachment
    // =========================================================================

    async fn reattach_orphans(&self, report: &mut ReconcileReport) -> RegistryResult<()> {
        let orphans = sqlx::query_as::<_, RawDeviceRow>(
            r#"
            SELECT d.agent_id, d.device_id, d.address
            FROM devices d
            LEFT JOIN agents a ON d.agent_id = a.id
            WHERE a.id IS NULL
            ORDER BY d.agent_id, d.device_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for orphan in orphans {
            let target = match orphan.address.as_deref().map(str::trim) {
                Some(address) if !address.is_empty() => {
                    self.canonical_agent_for_address(address).await?
                }
                _ => None,
            };

            match target {
                Some(target_id) => {
                    match self.reassign_device(&orphan, &target_id).await {
                        Ok(()) => {
                            info!(
                                device = %orphan.device_id,
                                from = %orphan.agent_id,
                                to = %target_id,
                                "Reattached orphaned device"
                            );
                            report.orphans_reattached += 1;
                        }
                        Err(e) => {
                            warn!(
                                device = %orphan.device_id,
                                from = %orphan.agent_id,
                                error = %e,
                                "Failed to reattach orphaned device"
                            );
                            report
                                .orphans
                                .push((orphan.agent_id.clone(), orphan.device_id.clone()));
                        }
                    }
                }
                None => {
                    warn!(
                        device = %orphan.device_id,
                        agent = %orphan.agent_id,
                        address = ?orphan.address,
                        "Orphaned device has no reattachment target"
                    );
                    report
                        .orphans
                        .push((orphan.agent_id.clone(), orphan.device_id.clone()));
                }
            }
        }

        Ok(())
    }

    /// Finds the canonical agent for a network address (newest valid
    /// timestamp, ties broken lexicographically on the raw id).
    async fn canonical_agent_for_address(&self, address: &str) -> RegistryResult<Option<String>> {
        let candidates = sqlx::query_as::<_, RawAgentRow>(
            r#"
            SELECT id, store_code, store_name, address, status, updated_at
            FROM agents
            WHERE address = ?1
            "#,
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        if candidates.is_empty() {
            return Ok(None);
        }
        Ok(Some(pick_canonical(&candidates).id.clone()))
    }

    /// Moves one device row under a new agent, keep-newer on conflict.
    async fn reassign_device(&self, device: &RawDeviceRow, target: &str) -> RegistryResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RegistryError::TransactionFailed(e.to_string()))?;

        migrate_one_device(&mut tx, &device.agent_id, &device.device_id, target).await?;

        tx.commit()
            .await
            .map_err(|e| RegistryError::TransactionFailed(e.to_string()))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load_agents(&self) -> RegistryResult<Vec<RawAgentRow>> {
        let rows = sqlx::query_as::<_, RawAgentRow>(
            r#"
            SELECT id, store_code, store_name, address, status, updated_at
            FROM agents
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Canonical-record selection: newest valid timestamp wins; equal, missing,
/// or unparseable timestamps break lexicographically ascending on the raw id.
fn pick_canonical(members: &[RawAgentRow]) -> &RawAgentRow {
    members
        .iter()
        .min_by(|a, b| compare_recency(a, b))
        .expect("merge group is never empty")
}

/// Orders rows "most canonical first": newer timestamp, then smaller raw id.
fn compare_recency(a: &RawAgentRow, b: &RawAgentRow) -> std::cmp::Ordering {
    let ta = parse_ts(a.updated_at.as_deref());
    let tb = parse_ts(b.updated_at.as_deref());
    tb.cmp(&ta).then_with(|| a.id.cmp(&b.id))
}

/// Migrates all device rows from one agent to another inside a transaction.
///
/// Insert-if-absent; on a pre-existing (agent, device) pair the newer
/// `updated_at` wins (missing timestamps always lose). Originals are deleted.
/// Returns the number of rows rewritten.
async fn migrate_devices(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    from: &str,
    to: &str,
) -> RegistryResult<usize> {
    let device_ids: Vec<String> =
        sqlx::query_scalar("SELECT device_id FROM devices WHERE agent_id = ?1")
            .bind(from)
            .fetch_all(&mut **tx)
            .await?;

    for device_id in &device_ids {
        migrate_one_device(tx, from, device_id, to).await?;
    }

    Ok(device_ids.len())
}

/// Migrates a single device row, keep-newer on conflict, deleting the source.
async fn migrate_one_device(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    from: &str,
    device_id: &str,
    to: &str,
) -> RegistryResult<()> {
    let source_ts: Option<String> = sqlx::query_scalar(
        "SELECT updated_at FROM devices WHERE agent_id = ?1 AND device_id = ?2",
    )
    .bind(from)
    .bind(device_id)
    .fetch_one(&mut **tx)
    .await?;

    let existing_ts: Option<Option<String>> = sqlx::query_scalar(
        "SELECT updated_at FROM devices WHERE agent_id = ?1 AND device_id = ?2",
    )
    .bind(to)
    .bind(device_id)
    .fetch_optional(&mut **tx)
    .await?;

    let write = match &existing_ts {
        // Absent under the canonical key: plain insert.
        None => true,
        // Present: the newer row wins.
        Some(existing) => parse_ts(source_ts.as_deref()) > parse_ts(existing.as_deref()),
    };

    if write {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO devices (
                agent_id, device_id, name, kind, status, address,
                store_code, store_name, last_sync_at, product_count, updated_at
            )
            SELECT ?1, device_id, name, kind, status, address,
                   store_code, store_name, last_sync_at, product_count, updated_at
            FROM devices
            WHERE agent_id = ?2 AND device_id = ?3
            "#,
        )
        .bind(to)
        .bind(from)
        .bind(device_id)
        .execute(&mut **tx)
        .await?;
    }

    sqlx::query("DELETE FROM devices WHERE agent_id = ?1 AND device_id = ?2")
        .bind(from)
        .bind(device_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Migrates store links (insert-if-absent), deleting the source rows.
async fn migrate_stores(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    from: &str,
    to: &str,
) -> RegistryResult<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO agent_stores (agent_id, code, name)
        SELECT ?1, code, name FROM agent_stores WHERE agent_id = ?2
        "#,
    )
    .bind(to)
    .bind(from)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM agent_stores WHERE agent_id = ?1")
        .bind(from)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Registry;

    /// Inserts a raw agent row exactly as given - no normalization, no
    /// timestamp validation - the way drifted historical data looks.
    async fn raw_agent(registry: &Registry, id: &str, address: Option<&str>, updated_at: &str) {
        sqlx::query(
            "INSERT INTO agents (id, address, updated_at) VALUES (?1, ?2, NULLIF(?3, ''))",
        )
        .bind(id)
        .bind(address)
        .bind(updated_at)
        .execute(registry.pool())
        .await
        .unwrap();
    }

    async fn raw_device(registry: &Registry, agent_id: &str, device_id: &str, updated_at: &str) {
        sqlx::query(
            r#"
            INSERT INTO devices (agent_id, device_id, kind, updated_at)
            VALUES (?1, ?2, 'legacy', NULLIF(?3, ''))
            "#,
        )
        .bind(agent_id)
        .bind(device_id)
        .bind(updated_at)
        .execute(registry.pool())
        .await
        .unwrap();
    }

    async fn agent_ids(registry: &Registry) -> Vec<String> {
        sqlx::query_scalar("SELECT id FROM agents ORDER BY id")
            .fetch_all(registry.pool())
            .await
            .unwrap()
    }

    #[test]
    fn test_parse_ts_accepts_stored_formats() {
        assert!(parse_ts(Some("2025-06-01T10:00:00Z")).is_some());
        assert!(parse_ts(Some("2025-06-01T10:00:00+02:00")).is_some());
        // sqlx's encoding for DateTime<Utc> on SQLite.
        assert!(parse_ts(Some("2025-06-01 10:00:00.123456+00:00")).is_some());
        assert!(parse_ts(Some("2025-06-01 10:00:00")).is_some());
        assert!(parse_ts(Some("garbage-timestamp")).is_none());
        assert!(parse_ts(Some("")).is_none());
        assert!(parse_ts(None).is_none());
    }

    #[tokio::test]
    async fn test_merge_by_identifier_converges_case_variants() {
        let registry = Registry::in_memory().await.unwrap();
        raw_agent(&registry, "STORE-1", None, "2025-06-01T10:00:00Z").await;
        raw_agent(&registry, "store-1", None, "2025-06-01T12:00:00Z").await;
        raw_device(&registry, "STORE-1", "till-1", "2025-06-01T10:00:00Z").await;
        raw_device(&registry, "store-1", "till-2", "2025-06-01T12:00:00Z").await;

        let reconciler = IdentityReconciler::new(registry.pool().clone());
        let report = reconciler.run().await.unwrap().unwrap();

        assert_eq!(report.identifier_groups_merged, 1);
        assert_eq!(agent_ids(&registry).await, vec!["store-1"]);

        // Both devices now live under the canonical agent.
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM devices WHERE agent_id = 'store-1'")
                .fetch_one(registry.pool())
                .await
                .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_merge_keeps_newer_device_on_pair_collision() {
        let registry = Registry::in_memory().await.unwrap();
        raw_agent(&registry, "STORE-1", None, "2025-06-01T10:00:00Z").await;
        raw_agent(&registry, "store-1", None, "2025-06-01T12:00:00Z").await;

        // Same device id under both raw agents; the canonical one is newer.
        sqlx::query(
            "INSERT INTO devices (agent_id, device_id, kind, name, updated_at)
             VALUES ('STORE-1', 'till-1', 'legacy', 'old-name', '2025-06-01T09:00:00Z')",
        )
        .execute(registry.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO devices (agent_id, device_id, kind, name, updated_at)
             VALUES ('store-1', 'till-1', 'legacy', 'new-name', '2025-06-01T12:00:00Z')",
        )
        .execute(registry.pool())
        .await
        .unwrap();

        let reconciler = IdentityReconciler::new(registry.pool().clone());
        reconciler.run().await.unwrap().unwrap();

        // Uniqueness preserved, newer row kept.
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT agent_id, name FROM devices WHERE device_id = 'till-1'")
                .fetch_all(registry.pool())
                .await
                .unwrap();
        assert_eq!(rows, vec![("store-1".to_string(), "new-name".to_string())]);
    }

    #[tokio::test]
    async fn test_merge_by_address_copies_dependents() {
        let registry = Registry::in_memory().await.unwrap();
        raw_agent(&registry, "pos-old", Some("10.0.0.7"), "2025-06-01T08:00:00Z").await;
        raw_agent(&registry, "pos-new", Some("10.0.0.7"), "2025-06-02T08:00:00Z").await;
        raw_device(&registry, "pos-old", "till-1", "2025-06-01T08:00:00Z").await;
        // Pre-existing row under the canonical key with the same device id.
        raw_device(&registry, "pos-new", "till-1", "2025-06-02T08:00:00Z").await;
        raw_device(&registry, "pos-old", "till-2", "2025-06-01T08:00:00Z").await;

        let reconciler = IdentityReconciler::new(registry.pool().clone());
        let report = reconciler.run().await.unwrap().unwrap();

        assert_eq!(report.address_groups_merged, 1);
        assert_eq!(agent_ids(&registry).await, vec!["pos-new"]);

        let devices: Vec<String> = sqlx::query_scalar(
            "SELECT device_id FROM devices WHERE agent_id = 'pos-new' ORDER BY device_id",
        )
        .fetch_all(registry.pool())
        .await
        .unwrap();
        assert_eq!(devices, vec!["till-1", "till-2"]);
    }

    #[tokio::test]
    async fn test_tie_break_is_lexicographic_on_raw_id() {
        let registry = Registry::in_memory().await.unwrap();
        // Identical timestamps; one unparseable timestamp sorts as oldest.
        raw_agent(&registry, "B-Agent", Some("10.0.0.9"), "2025-06-01T10:00:00Z").await;
        raw_agent(&registry, "a-agent", Some("10.0.0.9"), "2025-06-01T10:00:00Z").await;
        raw_agent(&registry, "0-agent", Some("10.0.0.9"), "garbage-timestamp").await;

        let reconciler = IdentityReconciler::new(registry.pool().clone());
        reconciler.run().await.unwrap().unwrap();

        // The identifier pass first renames "B-Agent" to "b-agent". The
        // address pass then sees "a-agent" and "b-agent" with identical
        // valid timestamps ("0-agent" is unparseable, sorts oldest); the
        // tie breaks lexicographically ascending, so "a-agent" survives.
        assert_eq!(agent_ids(&registry).await, vec!["a-agent"]);
    }

    #[tokio::test]
    async fn test_orphan_reattachment_by_address() {
        let registry = Registry::in_memory().await.unwrap();
        raw_agent(&registry, "alive", Some("10.0.0.7"), "2025-06-01T10:00:00Z").await;

        // Device left behind by a vanished agent, same last-known address.
        sqlx::query(
            "INSERT INTO devices (agent_id, device_id, kind, address, updated_at)
             VALUES ('gone', 'till-9', 'legacy', '10.0.0.7', '2025-06-01T09:00:00Z')",
        )
        .execute(registry.pool())
        .await
        .unwrap();
        // And one with no address: must be reported, not dropped.
        raw_device(&registry, "gone", "till-10", "2025-06-01T09:00:00Z").await;

        let reconciler = IdentityReconciler::new(registry.pool().clone());
        let report = reconciler.run().await.unwrap().unwrap();

        assert_eq!(report.orphans_reattached, 1);
        assert_eq!(report.orphans, vec![("gone".to_string(), "till-10".to_string())]);

        let owner: String =
            sqlx::query_scalar("SELECT agent_id FROM devices WHERE device_id = 'till-9'")
                .fetch_one(registry.pool())
                .await
                .unwrap();
        assert_eq!(owner, "alive");

        // The unreattachable orphan is still present.
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM devices WHERE device_id = 'till-10'")
                .fetch_one(registry.pool())
                .await
                .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_reconciliation_is_idempotent() {
        let registry = Registry::in_memory().await.unwrap();
        raw_agent(&registry, "STORE-1", Some("10.0.0.7"), "2025-06-01T10:00:00Z").await;
        raw_agent(&registry, "store-1", Some("10.0.0.7"), "2025-06-01T12:00:00Z").await;
        raw_agent(&registry, "other", Some("10.0.0.8"), "2025-06-01T12:00:00Z").await;
        raw_device(&registry, "STORE-1", "till-1", "2025-06-01T10:00:00Z").await;

        let reconciler = IdentityReconciler::new(registry.pool().clone());
        let first = reconciler.run().await.unwrap().unwrap();
        assert!(!first.is_noop());

        let after_first = agent_ids(&registry).await;

        // Second pass: same canonical set, nothing merged, nothing lost.
        let second = reconciler.run().await.unwrap().unwrap();
        assert!(second.is_noop(), "second pass must be a no-op: {second:?}");
        assert_eq!(agent_ids(&registry).await, after_first);

        let device_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices")
            .fetch_one(registry.pool())
            .await
            .unwrap();
        assert_eq!(device_count, 1);
    }

    #[tokio::test]
    async fn test_malformed_rows_do_not_abort_pass() {
        let registry = Registry::in_memory().await.unwrap();
        raw_agent(&registry, "   ", None, "2025-06-01T10:00:00Z").await; // blank id
        raw_agent(&registry, "STORE-2", None, "not-a-date").await;
        raw_agent(&registry, "store-2", None, "2025-06-01T10:00:00Z").await;

        let reconciler = IdentityReconciler::new(registry.pool().clone());
        let report = reconciler.run().await.unwrap().unwrap();

        // The blank row is skipped; the valid group still merges.
        assert_eq!(report.skipped_groups, 1);
        assert_eq!(report.identifier_groups_merged, 1);
        let ids = agent_ids(&registry).await;
        assert!(ids.contains(&"store-2".to_string()));
    }
}
