//! Redis-backed shared counter store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use tokio::sync::watch;
use tracing::{error, info, warn};

use floodgate_core::domain::WindowKey;
use floodgate_core::ports::{ConnectionState, CounterStore, StoreError};

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis URL (e.g. redis://127.0.0.1:6379)
    pub url: String,
    /// Timeout for each connection attempt
    pub connect_timeout: Duration,
    /// Reconnect attempts before the connector gives up for good
    pub max_reconnects: u32,
    /// Fixed delay between reconnect attempts
    pub reconnect_backoff: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            max_reconnects: 5,
            reconnect_backoff: Duration::from_millis(1000),
        }
    }
}

impl RedisStoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("REDIS_URL").unwrap_or(defaults.url),
            connect_timeout: Duration::from_secs(
                std::env::var("REDIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            max_reconnects: std::env::var("REDIS_MAX_RECONNECTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_reconnects),
            reconnect_backoff: defaults.reconnect_backoff,
        }
    }
}

/// Connection bookkeeping shared with the background reconnect task.
struct Connector {
    client: Option<Client>,
    conn: RwLock<Option<ConnectionManager>>,
    state: watch::Sender<ConnectionState>,
    reconnecting: AtomicBool,
    config: RedisStoreConfig,
}

/// Shared Redis counter store.
///
/// One connection is held for the lifetime of the store and shared by all
/// concurrent checks; `ConnectionManager` clones multiplex onto it. The
/// connector never fails construction: when Redis cannot be reached it
/// enters `Failed` and every operation errors immediately, which the gate
/// turns into fail-open admissions.
pub struct RedisCounterStore {
    connector: Arc<Connector>,
    incr_script: Script,
}

impl RedisCounterStore {
    /// Connect to the store at `config.url`.
    ///
    /// Never returns an error: a failed initial connection is logged and
    /// leaves the store in `Failed`, where operations short-circuit.
    pub async fn connect(config: RedisStoreConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let client = match Client::open(config.url.as_str()) {
            Ok(client) => Some(client),
            Err(e) => {
                error!(url = %config.url, error = %e, "invalid counter store address, rate limiting disabled");
                None
            }
        };

        let conn = match &client {
            Some(client) => match Self::open_connection(client, config.connect_timeout).await {
                Ok(conn) => {
                    info!(url = %config.url, "connected to counter store");
                    Some(conn)
                }
                Err(e) => {
                    error!(url = %config.url, error = %e, "counter store connection failed, rate limiting disabled");
                    None
                }
            },
            None => None,
        };

        // send_replace records the transition even while nobody is
        // subscribed; hosts typically subscribe only after connect returns.
        state.send_replace(if conn.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Failed
        });

        // INCR and EXPIRE must be indivisible so concurrent requests on
        // the same key never lose updates. EXPIRE runs on every increment.
        let incr_script = Script::new(
            r#"
            local count = redis.call('INCR', KEYS[1])
            redis.call('EXPIRE', KEYS[1], ARGV[1])
            return count
            "#,
        );

        Self {
            connector: Arc::new(Connector {
                client,
                conn: RwLock::new(conn),
                state,
                reconnecting: AtomicBool::new(false),
                config,
            }),
            incr_script,
        }
    }

    /// Connect using environment configuration.
    pub async fn from_env() -> Self {
        Self::connect(RedisStoreConfig::from_env()).await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.connector.state.borrow()
    }

    /// Observe connection state transitions, e.g. to log `Retrying` and
    /// `Failed` for operational visibility.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.connector.state.subscribe()
    }

    async fn open_connection(
        client: &Client,
        timeout: Duration,
    ) -> Result<ConnectionManager, StoreError> {
        tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| StoreError::Unavailable("connection attempt timed out".to_string()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Hand out a connection clone, or fail fast when the connector is
    /// retrying or has given up. Checks must never hang on a dead
    /// connection.
    fn connection(&self) -> Result<ConnectionManager, StoreError> {
        match self.state() {
            ConnectionState::Failed => Err(StoreError::Unavailable(
                "reconnect budget exhausted".to_string(),
            )),
            ConnectionState::Retrying => Err(StoreError::Unavailable(
                "reconnect in progress".to_string(),
            )),
            _ => self
                .connector
                .conn
                .read()
                .map_err(|_| StoreError::Operation("connection lock poisoned".to_string()))?
                .clone()
                .ok_or_else(|| StoreError::Unavailable("not connected".to_string())),
        }
    }

    /// Classify an operation failure; transport loss kicks off the bounded
    /// background reconnect loop.
    fn handle_error(&self, e: RedisError) -> StoreError {
        if e.is_connection_dropped() || e.is_io_error() || e.is_timeout() {
            self.spawn_reconnect();
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Operation(e.to_string())
        }
    }

    fn spawn_reconnect(&self) {
        let connector = self.connector.clone();

        // At most one reconnect loop at a time; concurrent operations that
        // also hit transport errors fail fast instead.
        if connector
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if *connector.state.borrow() == ConnectionState::Failed {
            connector.reconnecting.store(false, Ordering::SeqCst);
            return;
        }

        connector.state.send_replace(ConnectionState::Retrying);

        tokio::spawn(async move {
            let Some(client) = connector.client.clone() else {
                connector.state.send_replace(ConnectionState::Failed);
                connector.reconnecting.store(false, Ordering::SeqCst);
                return;
            };

            for attempt in 1..=connector.config.max_reconnects {
                tokio::time::sleep(connector.config.reconnect_backoff).await;
                warn!(
                    attempt,
                    max = connector.config.max_reconnects,
                    "reconnecting to counter store"
                );

                match Self::open_connection(&client, connector.config.connect_timeout).await {
                    Ok(conn) => {
                        if let Ok(mut guard) = connector.conn.write() {
                            *guard = Some(conn);
                        }
                        connector.state.send_replace(ConnectionState::Connected);
                        connector.reconnecting.store(false, Ordering::SeqCst);
                        info!("counter store connection restored");
                        return;
                    }
                    Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
                }
            }

            // Budget exhausted: disconnect explicitly and stop for good.
            if let Ok(mut guard) = connector.conn.write() {
                *guard = None;
            }
            connector.state.send_replace(ConnectionState::Failed);
            connector.reconnecting.store(false, Ordering::SeqCst);
            error!(
                attempts = connector.config.max_reconnects,
                "counter store reconnect budget exhausted, rate limiting disabled"
            );
        });
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &WindowKey) -> Result<Option<u64>, StoreError> {
        let mut conn = self.connection()?;
        match conn.get::<_, Option<u64>>(key.as_str()).await {
            Ok(count) => Ok(count),
            Err(e) => Err(self.handle_error(e)),
        }
    }

    async fn incr_expire(&self, key: &WindowKey, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let result: Result<i64, RedisError> = self
            .incr_script
            .key(key.as_str())
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await;
        match result {
            Ok(_count) => Ok(()),
            Err(e) => Err(self.handle_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use floodgate_core::domain::RequestIdentity;
    use std::time::Instant;

    fn unreachable_config() -> RedisStoreConfig {
        RedisStoreConfig {
            url: "redis://127.0.0.1:1".to_string(),
            connect_timeout: Duration::from_millis(200),
            max_reconnects: 2,
            reconnect_backoff: Duration::from_millis(50),
        }
    }

    fn test_key(scope: &str) -> WindowKey {
        // Unique IP per process so parallel test runs do not collide.
        let ip = format!("10.0.{}.{}", std::process::id() % 256, std::process::id() / 256 % 256);
        WindowKey::derive(&RequestIdentity::new(ip, scope), Utc::now())
    }

    async fn live_store() -> Option<RedisCounterStore> {
        let url = std::env::var("REDIS_URL").ok()?;
        let store = RedisCounterStore::connect(RedisStoreConfig {
            url,
            connect_timeout: Duration::from_secs(1),
            ..RedisStoreConfig::default()
        })
        .await;
        (store.state() == ConnectionState::Connected).then_some(store)
    }

    #[tokio::test]
    async fn unreachable_store_constructs_in_failed_state() {
        let store = RedisCounterStore::connect(unreachable_config()).await;
        assert_eq!(store.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn failed_store_short_circuits_without_hanging() {
        let store = RedisCounterStore::connect(unreachable_config()).await;
        let key = test_key("short_circuit");

        let started = Instant::now();
        assert!(store.get(&key).await.is_err());
        assert!(store
            .incr_expire(&key, Duration::from_secs(59))
            .await
            .is_err());

        // No network round trips once failed.
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn failed_state_is_visible_to_late_subscribers() {
        let store = RedisCounterStore::connect(unreachable_config()).await;

        // Hosts subscribe only after connect returns; the transition must
        // not depend on a receiver existing at send time.
        let states = store.subscribe();
        assert_eq!(*states.borrow(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn invalid_address_constructs_in_failed_state() {
        let store = RedisCounterStore::connect(RedisStoreConfig {
            url: "not a url".to_string(),
            ..unreachable_config()
        })
        .await;
        assert_eq!(store.state(), ConnectionState::Failed);
    }

    /// A store that believes it is connected while its peer is already
    /// gone, so the bounded reconnect loop can be driven without a live
    /// Redis.
    fn store_with_lost_connection(config: RedisStoreConfig) -> RedisCounterStore {
        let client = Client::open(config.url.as_str()).expect("valid url");
        let (state, _) = watch::channel(ConnectionState::Connected);

        RedisCounterStore {
            connector: Arc::new(Connector {
                client: Some(client),
                conn: RwLock::new(None),
                state,
                reconnecting: AtomicBool::new(false),
                config,
            }),
            incr_script: Script::new("return 1"),
        }
    }

    #[tokio::test]
    async fn reconnect_budget_exhaustion_transitions_to_failed() {
        let config = RedisStoreConfig {
            url: "redis://127.0.0.1:1".to_string(),
            connect_timeout: Duration::from_millis(100),
            max_reconnects: 2,
            reconnect_backoff: Duration::from_millis(20),
        };
        let store = store_with_lost_connection(config.clone());
        let mut states = store.subscribe();

        let started = Instant::now();
        store.spawn_reconnect();

        // Retrying is published before the first attempt runs.
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Retrying);

        // The loop burns its whole budget, then reports Failed for good.
        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Failed);
        assert!(
            started.elapsed()
                >= config.reconnect_backoff * config.max_reconnects,
            "every configured attempt should have backed off first"
        );

        // Terminal: operations fail fast and no further loop is spawned.
        assert!(store.get(&test_key("budget")).await.is_err());
        assert_eq!(store.state(), ConnectionState::Failed);
    }

    // The tests below need a live Redis; they pass silently when REDIS_URL
    // is not set.

    #[tokio::test]
    async fn redis_counts_and_expires() {
        let Some(store) = live_store().await else {
            return;
        };
        let key = test_key("counts_and_expires");

        assert_eq!(store.get(&key).await.unwrap(), None);

        store
            .incr_expire(&key, Duration::from_secs(1))
            .await
            .unwrap();
        store
            .incr_expire(&key, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(2));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn redis_concurrent_increments_lose_no_updates() {
        let Some(store) = live_store().await else {
            return;
        };
        let store = std::sync::Arc::new(store);
        let key = std::sync::Arc::new(test_key("concurrent"));

        let tasks = (0..20).map(|_| {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move { store.incr_expire(&key, Duration::from_secs(5)).await })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(store.get(&key).await.unwrap(), Some(20));
    }
}
