//! # Registry Pool Management
//!
//! Connection pool creation and the `Registry` facade consumed by the admin
//! API layer and the distribution pipeline.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Registry Connection Pool                           │
//! │                                                                         │
//! │  RegistryConfig::new(path) ← Configure pool settings                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Registry::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool (WAL)             │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐       │  concurrent readers,      │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...   │  writers serialized       │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘       │  per key (KeyedLocks)     │
//! │  └─────────────────────────────────────────┘                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{debug, info};

use pricenet_core::types::{Agent, DevicePresence, DeviceReport};

use crate::error::{RegistryError, RegistryResult};
use crate::keylock::KeyedLocks;
use crate::migrations;
use crate::repository::agent::{AgentRepository, AgentStatusUpdate};
use crate::repository::device::DeviceRepository;
use crate::repository::store::StoreRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Registry database configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection timeout duration.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl RegistryConfig {
    /// Creates a new configuration with the given database path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RegistryConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory registry configuration (for testing).
    pub fn in_memory() -> Self {
        RegistryConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1, // In-memory requires single connection
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Main registry handle providing repository access and the ingress facade.
///
/// Cheap to clone; all clones share the pool and the keyed lock map.
#[derive(Debug, Clone)]
pub struct Registry {
    /// The SQLite connection pool.
    pool: SqlitePool,

    /// Per-key write serialization, shared by all repositories.
    locks: Arc<KeyedLocks>,
}

impl Registry {
    /// Creates a new registry connection pool.
    ///
    /// Configures SQLite with WAL journal mode and foreign keys, builds the
    /// pool, and runs embedded migrations (unless disabled).
    pub async fn new(config: RegistryConfig) -> RegistryResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing registry connection"
        );

        // sqlite://path?mode=rwc creates the file if it does not exist
        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| RegistryError::ConnectionFailed(e.to_string()))?
            // WAL: readers don't block writers, writers don't block readers
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);

        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| RegistryError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Registry pool created"
        );

        let registry = Registry {
            pool,
            locks: Arc::new(KeyedLocks::new()),
        };

        if config.run_migrations {
            registry.run_migrations().await?;
        }

        Ok(registry)
    }

    /// Creates an in-memory registry (for tests).
    pub async fn in_memory() -> RegistryResult<Self> {
        Self::new(RegistryConfig::in_memory()).await
    }

    /// Runs registry migrations.
    pub async fn run_migrations(&self) -> RegistryResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Returns a reference to the connection pool.
    ///
    /// For advanced queries not covered by repositories; prefer repository
    /// methods when available.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the agent repository.
    pub fn agents(&self) -> AgentRepository {
        AgentRepository::new(self.pool.clone(), self.locks.clone())
    }

    /// Returns the device repository.
    pub fn devices(&self) -> DeviceRepository {
        DeviceRepository::new(self.pool.clone(), self.locks.clone())
    }

    /// Returns the store repository.
    pub fn stores(&self) -> StoreRepository {
        StoreRepository::new(self.pool.clone())
    }

    /// Closes the registry connection pool.
    pub async fn close(&self) {
        info!("Closing registry connection pool");
        self.pool.close().await;
    }

    /// Checks if the registry is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    // =========================================================================
    // Ingress Facade
    // =========================================================================
    // Consumed by the admin API layer (out of core). Each method normalizes
    // identifiers and serializes writes per key inside the repositories.

    /// Ingress: a field agent reports its own status.
    pub async fn report_agent_status(&self, update: AgentStatusUpdate) -> RegistryResult<Agent> {
        self.agents().upsert_status(update).await
    }

    /// Ingress: a field agent reports its device inventory.
    ///
    /// Each device is upserted independently; one malformed entry does not
    /// abort the rest of the batch.
    pub async fn report_device_batch(
        &self,
        agent_id: &str,
        reports: &[DeviceReport],
    ) -> RegistryResult<usize> {
        let devices = self.devices();
        let now = Utc::now();
        let mut accepted = 0;

        for report in reports {
            match devices.upsert(agent_id, report, now).await {
                Ok(_) => accepted += 1,
                Err(e) => {
                    tracing::warn!(
                        agent_id,
                        device_id = %report.device_id,
                        error = %e,
                        "Skipping device report entry"
                    );
                }
            }
        }

        Ok(accepted)
    }

    /// Ingress: lists all registered agents.
    pub async fn list_agents(&self) -> RegistryResult<Vec<Agent>> {
        self.agents().list().await
    }

    /// Ingress: lists an agent's devices with evaluated presence.
    ///
    /// The liveness evaluator is applied to each row as of "now" before the
    /// view leaves the registry.
    pub async fn list_agent_devices(&self, agent_id: &str) -> RegistryResult<Vec<DevicePresence>> {
        self.devices().list_with_presence(agent_id, Utc::now()).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_registry() {
        let registry = Registry::in_memory().await.unwrap();
        assert!(registry.health_check().await);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = RegistryConfig::new("/tmp/test.db")
            .max_connections(10)
            .min_connections(2);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
    }

    #[tokio::test]
    async fn test_report_device_batch_skips_bad_entries() {
        let registry = Registry::in_memory().await.unwrap();

        let reports = vec![
            DeviceReport {
                device_id: "till-1".into(),
                status: Some("ok".into()),
                ..Default::default()
            },
            DeviceReport {
                device_id: "   ".into(), // blank id: rejected, not fatal
                ..Default::default()
            },
            DeviceReport {
                device_id: "till-2".into(),
                ..Default::default()
            },
        ];

        let accepted = registry
            .report_device_batch("Agent-1", &reports)
            .await
            .unwrap();
        assert_eq!(accepted, 2);

        let devices = registry.list_agent_devices("agent-1").await.unwrap();
        assert_eq!(devices.len(), 2);
    }
}
