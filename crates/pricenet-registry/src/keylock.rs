//! # Keyed Write Serialization
//!
//! Per-key async locks for registry writes.
//!
//! ## Contention Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Keyed Lock Behavior                                │
//! │                                                                         │
//! │  upsert agent "store-1"     ──► lock("agent:store-1")      ─┐ serial   │
//! │  upsert agent "store-1"     ──► lock("agent:store-1")      ─┘          │
//! │                                                                         │
//! │  upsert device (a1, till-1) ──► lock("device:a1:till-1")   ─┐ parallel │
//! │  upsert device (a2, till-1) ──► lock("device:a2:till-1")   ─┘          │
//! │                                                                         │
//! │  Writes for the SAME key serialize; writes for DIFFERENT keys          │
//! │  never block each other. There is no global write lock.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of per-key async mutexes.
///
/// The outer map guard is a short-lived std mutex; the per-key lock itself is
/// awaited outside of it, so lookups for other keys proceed while a key is
/// held.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    /// Creates an empty lock map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `key`, creating it on first use.
    ///
    /// The returned owned guard keeps the key serialized until dropped.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }

    /// Lock key for an agent-level write.
    pub fn agent_key(agent_id: &str) -> String {
        format!("agent:{agent_id}")
    }

    /// Lock key for a device-level write.
    pub fn device_key(agent_id: &str, device_id: &str) -> String {
        format!("device:{agent_id}:{device_id}")
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(KeyedLocks::new());
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let peak = peak.clone();
            let current = current.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("agent:a1").await;
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = Arc::new(KeyedLocks::new());

        let g1 = locks.acquire("agent:a1").await;
        // A second key must be acquirable while the first is held.
        let g2 = tokio::time::timeout(Duration::from_millis(50), locks.acquire("agent:a2"))
            .await
            .expect("different key should not contend");
        drop(g1);
        drop(g2);
    }

    #[test]
    fn test_key_builders() {
        assert_eq!(KeyedLocks::agent_key("a1"), "agent:a1");
        assert_eq!(KeyedLocks::device_key("a1", "t1"), "device:a1:t1");
    }
}
