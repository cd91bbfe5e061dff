//! In-memory counter store - single-process fallback and test backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use floodgate_core::domain::WindowKey;
use floodgate_core::ports::{CounterStore, StoreError};

struct Entry {
    count: u64,
    expires_at: Instant,
}

/// Process-local counter store.
///
/// Counters live in a mutex-guarded table, so increments are trivially
/// atomic. Counters are not shared across instances: limits enforced
/// through this store are per-process. Used when no store address is
/// configured, and as the test backend.
#[derive(Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &WindowKey) -> Result<Option<u64>, StoreError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| StoreError::Operation("counter table poisoned".to_string()))?;

        match counters.get(key.as_str()) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.count)),
            Some(_) => {
                counters.remove(key.as_str());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn incr_expire(&self, key: &WindowKey, ttl: Duration) -> Result<(), StoreError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| StoreError::Operation("counter table poisoned".to_string()))?;

        let now = Instant::now();
        // Keys embed the calendar minute, so past buckets are never read
        // again; sweep them here or the table grows without bound.
        counters.retain(|_, entry| entry.expires_at > now);

        let entry = counters.entry(key.as_str().to_string()).or_insert(Entry {
            count: 0,
            expires_at: now + ttl,
        });
        entry.count += 1;
        // Expiry is refreshed on every increment, not only the first.
        entry.expires_at = now + ttl;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use floodgate_core::domain::RequestIdentity;
    use std::sync::Arc;

    fn key(scope: &str) -> WindowKey {
        WindowKey::derive(&RequestIdentity::new("192.0.2.7", scope), Utc::now())
    }

    #[tokio::test]
    async fn absent_counter_reads_as_none() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.get(&key("get_orders")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn increments_accumulate() {
        let store = InMemoryCounterStore::new();
        let key = key("get_orders");

        store
            .incr_expire(&key, Duration::from_secs(59))
            .await
            .unwrap();
        store
            .incr_expire(&key, Duration::from_secs(59))
            .await
            .unwrap();

        assert_eq!(store.get(&key).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn concurrent_increments_lose_no_updates() {
        let store = Arc::new(InMemoryCounterStore::new());
        let key = Arc::new(key("get_orders"));

        let tasks = (0..32).map(|_| {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move {
                store.incr_expire(&key, Duration::from_secs(59)).await
            })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(store.get(&key).await.unwrap(), Some(32));
    }

    #[tokio::test]
    async fn counters_expire_after_ttl() {
        let store = InMemoryCounterStore::new();
        let key = key("get_orders");

        store
            .incr_expire(&key, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(1));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_increment() {
        let store = InMemoryCounterStore::new();
        let stale = key("get_orders");

        store
            .incr_expire(&stale, Duration::from_millis(30))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Incrementing any other key sweeps the dead bucket out of the
        // table entirely, not just out of reads.
        let fresh = key("get_invoices");
        store
            .incr_expire(&fresh, Duration::from_secs(59))
            .await
            .unwrap();

        let counters = store.counters.lock().unwrap();
        assert_eq!(counters.len(), 1);
        assert!(counters.contains_key(fresh.as_str()));
    }

    #[tokio::test]
    async fn expiry_is_refreshed_on_every_increment() {
        let store = InMemoryCounterStore::new();
        let key = key("get_orders");
        let ttl = Duration::from_millis(100);

        store.incr_expire(&key, ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        store.incr_expire(&key, ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        // 120ms after the first increment, but only 60ms after the second:
        // still alive because the TTL was reset.
        assert_eq!(store.get(&key).await.unwrap(), Some(2));
    }
}
