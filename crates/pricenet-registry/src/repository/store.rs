//! # Store Repository
//!
//! Per-agent store links and networked-device CRUD.
//!
//! Store links are replaced wholesale per agent (`replace_agent_stores`);
//! networked devices are modern API-managed equipment with a plain CRUD
//! lifecycle. Both are join targets for the distribution core, nothing more.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use pricenet_core::ident::NormalizedId;
use pricenet_core::types::{NetworkedDevice, StoreLink};

use crate::error::{RegistryError, RegistryResult};

/// One store entry in a `replace_agent_stores` call.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    /// Store code (display identifier, kept as reported).
    pub code: String,

    /// Display name.
    pub name: Option<String>,
}

/// Repository for store links and networked devices.
#[derive(Debug, Clone)]
pub struct StoreRepository {
    pool: SqlitePool,
}

impl StoreRepository {
    /// Creates a new StoreRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StoreRepository { pool }
    }

    // =========================================================================
    // Agent Store Links
    // =========================================================================

    /// Replaces an agent's store links wholesale.
    ///
    /// Delete + insert in one transaction; entries with blank codes are
    /// dropped silently (they carry no identity).
    pub async fn replace_agent_stores(
        &self,
        agent_id: &str,
        stores: &[StoreEntry],
    ) -> RegistryResult<()> {
        let agent_id = NormalizedId::new(agent_id)?;

        debug!(agent_id = %agent_id, count = stores.len(), "Replacing agent stores");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RegistryError::TransactionFailed(e.to_string()))?;

        sqlx::query("DELETE FROM agent_stores WHERE agent_id = ?1")
            .bind(agent_id.as_str())
            .execute(&mut *tx)
            .await?;

        for store in stores {
            let code = store.code.trim();
            if code.is_empty() {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO agent_stores (agent_id, code, name)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(agent_id, code) DO UPDATE SET name = excluded.name
                "#,
            )
            .bind(agent_id.as_str())
            .bind(code)
            .bind(store.name.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| RegistryError::TransactionFailed(e.to_string()))?;

        Ok(())
    }

    /// Lists an agent's store links, ordered by code.
    pub async fn list_for_agent(&self, agent_id: &str) -> RegistryResult<Vec<StoreLink>> {
        let agent_id = NormalizedId::new(agent_id)?;

        let stores = sqlx::query_as::<_, StoreLink>(
            r#"
            SELECT agent_id, code, name
            FROM agent_stores
            WHERE agent_id = ?1
            ORDER BY code
            "#,
        )
        .bind(agent_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(stores)
    }

    // =========================================================================
    // Networked Devices (CRUD)
    // =========================================================================

    /// Creates a networked device with a generated id.
    pub async fn create_networked(
        &self,
        name: &str,
        kind: Option<&str>,
        address: Option<&str>,
        store_code: Option<&str>,
    ) -> RegistryResult<NetworkedDevice> {
        let device = NetworkedDevice {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            kind: kind.map(str::to_string),
            address: address.map(str::to_string),
            store_code: store_code.map(str::to_string),
            status: None,
            updated_at: Some(Utc::now()),
        };

        sqlx::query(
            r#"
            INSERT INTO networked_devices (id, name, kind, address, store_code, status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&device.id)
        .bind(&device.name)
        .bind(&device.kind)
        .bind(&device.address)
        .bind(&device.store_code)
        .bind(&device.status)
        .bind(device.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(device)
    }

    /// Gets a networked device by id.
    pub async fn get_networked(&self, id: &str) -> RegistryResult<Option<NetworkedDevice>> {
        let device = sqlx::query_as::<_, NetworkedDevice>(
            r#"
            SELECT id, name, kind, address, store_code, status, updated_at
            FROM networked_devices
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    /// Lists all networked devices, ordered by name.
    pub async fn list_networked(&self) -> RegistryResult<Vec<NetworkedDevice>> {
        let devices = sqlx::query_as::<_, NetworkedDevice>(
            r#"
            SELECT id, name, kind, address, store_code, status, updated_at
            FROM networked_devices
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(devices)
    }

    /// Updates a networked device's reported status.
    pub async fn update_networked_status(&self, id: &str, status: &str) -> RegistryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE networked_devices
            SET status = ?2, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::not_found("NetworkedDevice", id));
        }

        Ok(())
    }

    /// Deletes a networked device.
    pub async fn delete_networked(&self, id: &str) -> RegistryResult<()> {
        let result = sqlx::query("DELETE FROM networked_devices WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::not_found("NetworkedDevice", id));
        }

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Registry;

    fn entry(code: &str, name: &str) -> StoreEntry {
        StoreEntry {
            code: code.into(),
            name: Some(name.into()),
        }
    }

    #[tokio::test]
    async fn test_replace_agent_stores_is_wholesale() {
        let registry = Registry::in_memory().await.unwrap();
        let stores = registry.stores();

        stores
            .replace_agent_stores("a1", &[entry("S1", "North"), entry("S2", "South")])
            .await
            .unwrap();
        stores
            .replace_agent_stores("a1", &[entry("S3", "East")])
            .await
            .unwrap();

        let listed = stores.list_for_agent("a1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].code, "S3");
    }

    #[tokio::test]
    async fn test_blank_store_codes_dropped() {
        let registry = Registry::in_memory().await.unwrap();
        let stores = registry.stores();

        stores
            .replace_agent_stores("a1", &[entry("  ", "Blank"), entry("S1", "North")])
            .await
            .unwrap();

        let listed = stores.list_for_agent("a1").await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_networked_device_crud() {
        let registry = Registry::in_memory().await.unwrap();
        let stores = registry.stores();

        let device = stores
            .create_networked("Label Printer", Some("printer"), Some("10.0.0.20"), None)
            .await
            .unwrap();

        stores
            .update_networked_status(&device.id, "online")
            .await
            .unwrap();

        let fetched = stores.get_networked(&device.id).await.unwrap().unwrap();
        assert_eq!(fetched.status.as_deref(), Some("online"));

        stores.delete_networked(&device.id).await.unwrap();
        assert!(stores.get_networked(&device.id).await.unwrap().is_none());
    }
}
