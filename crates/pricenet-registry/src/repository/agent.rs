//! # Agent Repository
//!
//! Database operations for agent presence rows.
//!
//! ## Upsert Semantics
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Agent Status Upsert                                  │
//! │                                                                         │
//! │  heartbeat: { id: "STORE-042 ", status: "ok", address: "10.0.0.7" }    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  normalize id ──► "store-042"                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  lock("agent:store-042")  ← same-key writes serialize                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT .. ON CONFLICT(id) DO UPDATE                                   │
//! │    • present, non-empty fields overwrite                               │
//! │    • absent/empty fields keep the stored value (COALESCE/NULLIF)       │
//! │    • updated_at always advances to the report timestamp                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use pricenet_core::ident::NormalizedId;
use pricenet_core::types::Agent;

use crate::error::{RegistryError, RegistryResult};
use crate::keylock::KeyedLocks;

// =============================================================================
// Status Update Payload
// =============================================================================

/// One agent status report, as received from the ingress surface.
///
/// Every field but the identifier is optional; absent fields never clear a
/// previously known value.
#[derive(Debug, Clone, Default)]
pub struct AgentStatusUpdate {
    /// Raw agent identifier (normalized inside the repository).
    pub agent_id: String,

    /// Display store code.
    pub store_code: Option<String>,

    /// Display store name.
    pub store_name: Option<String>,

    /// Raw status string.
    pub status: Option<String>,

    /// Reported network address.
    pub address: Option<String>,

    /// Report timestamp; defaults to now when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

impl AgentStatusUpdate {
    /// Creates an update carrying only the identifier.
    pub fn new(agent_id: impl Into<String>) -> Self {
        AgentStatusUpdate {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for agent presence rows.
#[derive(Debug, Clone)]
pub struct AgentRepository {
    pool: SqlitePool,
    locks: Arc<KeyedLocks>,
}

impl AgentRepository {
    /// Creates a new AgentRepository.
    pub fn new(pool: SqlitePool, locks: Arc<KeyedLocks>) -> Self {
        AgentRepository { pool, locks }
    }

    /// Upserts an agent from a status report.
    ///
    /// The identifier is normalized first; writes for the same normalized id
    /// serialize on a keyed lock, writes for different ids do not contend.
    pub async fn upsert_status(&self, update: AgentStatusUpdate) -> RegistryResult<Agent> {
        let id = NormalizedId::new(&update.agent_id)?;
        let _guard = self.locks.acquire(&KeyedLocks::agent_key(id.as_str())).await;

        let timestamp = update.timestamp.unwrap_or_else(Utc::now);

        debug!(agent_id = %id, "Upserting agent status");

        sqlx::query(
            r#"
            INSERT INTO agents (id, store_code, store_name, address, status, updated_at)
            VALUES (?1, NULLIF(?2, ''), NULLIF(?3, ''), NULLIF(?4, ''), NULLIF(?5, ''), ?6)
            ON CONFLICT(id) DO UPDATE SET
                store_code = COALESCE(NULLIF(?2, ''), agents.store_code),
                store_name = COALESCE(NULLIF(?3, ''), agents.store_name),
                address    = COALESCE(NULLIF(?4, ''), agents.address),
                status     = COALESCE(NULLIF(?5, ''), agents.status),
                updated_at = ?6
            "#,
        )
        .bind(id.as_str())
        .bind(update.store_code.as_deref().unwrap_or(""))
        .bind(update.store_name.as_deref().unwrap_or(""))
        .bind(update.address.as_deref().unwrap_or(""))
        .bind(update.status.as_deref().unwrap_or(""))
        .bind(timestamp)
        .execute(&self.pool)
        .await?;

        self.get(id.as_str())
            .await?
            .ok_or_else(|| RegistryError::not_found("Agent", id.as_str()))
    }

    /// Gets an agent by its (raw or normalized) identifier.
    pub async fn get(&self, id: &str) -> RegistryResult<Option<Agent>> {
        let id = NormalizedId::new(id)?;

        let agent = sqlx::query_as::<_, Agent>(
            r#"
            SELECT id, store_code, store_name, address, status, updated_at
            FROM agents
            WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(agent)
    }

    /// Lists all agents, ordered by identifier.
    pub async fn list(&self) -> RegistryResult<Vec<Agent>> {
        let agents = sqlx::query_as::<_, Agent>(
            r#"
            SELECT id, store_code, store_name, address, status, updated_at
            FROM agents
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(agents)
    }

    /// Finds the most recently updated agent for a network address.
    ///
    /// Used by orphan reattachment: devices left behind by a merged agent are
    /// reassigned to the canonical agent at their last known address.
    pub async fn find_by_address(&self, address: &str) -> RegistryResult<Option<Agent>> {
        if address.trim().is_empty() {
            return Ok(None);
        }

        let agent = sqlx::query_as::<_, Agent>(
            r#"
            SELECT id, store_code, store_name, address, status, updated_at
            FROM agents
            WHERE address = ?1
            ORDER BY updated_at DESC, id ASC
            LIMIT 1
            "#,
        )
        .bind(address.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(agent)
    }

    /// Deletes an agent by identifier (explicit administrative removal).
    pub async fn delete(&self, id: &str) -> RegistryResult<()> {
        let id = NormalizedId::new(id)?;
        let _guard = self.locks.acquire(&KeyedLocks::agent_key(id.as_str())).await;

        debug!(agent_id = %id, "Deleting agent");

        let result = sqlx::query("DELETE FROM agents WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::not_found("Agent", id.as_str()));
        }

        Ok(())
    }

    /// Counts registered agents.
    pub async fn count(&self) -> RegistryResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agents")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
