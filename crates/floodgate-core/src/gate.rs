//! The limiter gate - per-request admission decisions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use tracing::{debug, warn};

use crate::domain::{RequestIdentity, WindowKey};
use crate::error::GateError;
use crate::ports::CounterStore;

/// Default number of admitted requests per window.
pub const DEFAULT_LIMIT: u32 = 50;
/// Default counter TTL in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 59;

/// Gate configuration. Immutable once the gate is constructed.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Maximum admitted requests per identity per calendar minute.
    pub limit: u32,
    /// Counter TTL in seconds. Zero cannot form a bucket and is rejected
    /// at check time rather than construction time.
    pub window_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

/// Outcome of an admitted request.
#[derive(Debug, Clone)]
pub struct Admission {
    /// Counter value after this request, when the store answered.
    pub count: Option<u64>,
    /// Requests left in the current window, when the store answered.
    pub remaining: Option<u32>,
    /// True when the store could not be reached and the request was
    /// admitted without being counted (fail-open).
    pub degraded: bool,
}

impl Admission {
    fn counted(count: u64, limit: u32) -> Self {
        Self {
            count: Some(count),
            remaining: Some(limit.saturating_sub(count as u32)),
            degraded: false,
        }
    }

    fn fail_open() -> Self {
        Self {
            count: None,
            remaining: None,
            degraded: true,
        }
    }
}

/// The limiter gate: decides, per request, whether the wrapped handler may
/// run.
///
/// Holds no per-request state. One gate is shared by all concurrent
/// invocations; the long-lived store connection behind it is the only
/// shared resource, and each check is self-contained.
pub struct LimiterGate {
    store: Arc<dyn CounterStore>,
    config: GateConfig,
}

impl LimiterGate {
    pub fn new(store: Arc<dyn CounterStore>, config: GateConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Run the admission check for one request.
    ///
    /// `Ok` means the handler may run; `Err` means the request is rejected
    /// before the handler is invoked. Counting happens before invocation,
    /// so a handler cancelled upstream has already been charged.
    ///
    /// Store failures are logged and absorbed: the request is admitted as
    /// degraded rather than failing (fail-open). Only [`GateError`]
    /// variants cross this boundary.
    pub async fn check(&self, identity: &RequestIdentity) -> Result<Admission, GateError> {
        if !identity.has_source() {
            return Err(GateError::MissingIdentity);
        }
        if self.config.window_secs == 0 {
            return Err(GateError::InvalidWindow(self.config.window_secs));
        }

        // Derived exactly once: the read and the increment below must hit
        // the same bucket even if the minute ticks over between them.
        let now = Utc::now();
        let key = WindowKey::derive(identity, now);

        let count = match self.store.get(&key).await {
            Ok(count) => count.unwrap_or(0),
            Err(e) => {
                warn!(key = %key, error = %e, "counter read failed, admitting without counting");
                return Ok(Admission::fail_open());
            }
        };

        if count >= u64::from(self.config.limit) {
            debug!(key = %key, count, limit = self.config.limit, "rate limit exceeded");
            return Err(GateError::LimitExceeded {
                key,
                limit: self.config.limit,
                retry_after: Duration::from_secs(60 - u64::from(now.second())),
            });
        }

        let ttl = Duration::from_secs(self.config.window_secs);
        if let Err(e) = self.store.incr_expire(&key, ttl).await {
            warn!(key = %key, error = %e, "counter increment failed, admitting without counting");
            return Ok(Admission::fail_open());
        }

        Ok(Admission::counted(count + 1, self.config.limit))
    }
}
