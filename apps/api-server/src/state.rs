//! Application state - the gate and its store, built once and shared.

use std::sync::Arc;

use floodgate_core::gate::LimiterGate;
use floodgate_core::ports::CounterStore;
use floodgate_infra::InMemoryCounterStore;

#[cfg(feature = "redis")]
use floodgate_core::ports::ConnectionState;
#[cfg(feature = "redis")]
use floodgate_infra::{RedisCounterStore, RedisStoreConfig};

use crate::config::AppConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<LimiterGate>,
}

impl AppState {
    /// Build the store and the gate. Prefers the shared Redis store when
    /// REDIS_URL is set; otherwise limits hold per-process only.
    pub async fn new(config: &AppConfig) -> Self {
        #[cfg(feature = "redis")]
        let store: Arc<dyn CounterStore> = {
            if config.redis_url.is_some() {
                let store = RedisCounterStore::connect(RedisStoreConfig::from_env()).await;
                spawn_state_logger(&store);
                Arc::new(store)
            } else {
                tracing::warn!("REDIS_URL not set, rate limits are per-process only");
                Arc::new(InMemoryCounterStore::new())
            }
        };

        #[cfg(not(feature = "redis"))]
        let store: Arc<dyn CounterStore> = {
            tracing::info!("built without redis feature, rate limits are per-process only");
            Arc::new(InMemoryCounterStore::new())
        };

        let gate = Arc::new(LimiterGate::new(store, config.gate.clone()));

        tracing::info!(
            limit = gate.config().limit,
            window_secs = gate.config().window_secs,
            "Rate limiter initialized"
        );

        Self { gate }
    }
}

/// Log connector state transitions for operational visibility. Transitions
/// never alter admission decisions.
#[cfg(feature = "redis")]
fn spawn_state_logger(store: &RedisCounterStore) {
    let mut states = store.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            match *states.borrow_and_update() {
                ConnectionState::Retrying => {
                    tracing::warn!("counter store connection lost, retrying");
                }
                ConnectionState::Failed => {
                    tracing::error!("counter store unavailable, requests are admitted unchecked");
                }
                ConnectionState::Connected => tracing::info!("counter store connected"),
                ConnectionState::Connecting => {}
            }
        }
    });
}
