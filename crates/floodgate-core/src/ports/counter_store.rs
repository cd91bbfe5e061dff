//! Shared counter store port.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::WindowKey;

/// Atomic counter store - abstraction over the shared key-value backend.
///
/// Implementations must make `incr_expire` indivisible relative to
/// concurrent increments on the same key; admission correctness under
/// concurrent requests from the same identity depends entirely on that.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the current counter for `key`. A counter with no recorded
    /// increments is absent and reads as `None`.
    async fn get(&self, key: &WindowKey) -> Result<Option<u64>, StoreError>;

    /// Increment the counter for `key` and (re)set its expiry to `ttl` as
    /// one atomic operation. The expiry is refreshed on every call, not
    /// only the first.
    async fn incr_expire(&self, key: &WindowKey, ttl: Duration) -> Result<(), StoreError>;
}

/// Connection lifecycle of a store connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial connection attempt in progress.
    Connecting,
    /// Healthy; operations reach the store.
    Connected,
    /// Transport dropped; a bounded reconnect loop is running.
    Retrying,
    /// Reconnect budget exhausted, or the connection never came up.
    /// Operations short-circuit until the process restarts.
    Failed,
}

/// Store-level errors.
///
/// Never surfaced past the gate: the gate logs them and admits the request
/// without counting it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached: down, mid-reconnect, or failed for
    /// good.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The store was reached but the command itself failed.
    #[error("counter store operation failed: {0}")]
    Operation(String),
}
