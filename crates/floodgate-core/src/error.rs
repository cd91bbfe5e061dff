//! Gate-level error taxonomy.

use std::time::Duration;

use thiserror::Error;

use crate::domain::WindowKey;

/// Errors surfaced to the caller of a rate-limited handler.
///
/// Store-level failures never appear here: the gate logs them and admits
/// the request instead (fail-open), so the limiter cannot take the
/// protected handler down with it.
#[derive(Debug, Error)]
pub enum GateError {
    /// The request context carries no recognizable source address.
    #[error("request carries no source address to rate limit on")]
    MissingIdentity,

    /// The configured window cannot form a valid counter bucket.
    #[error("rate limit window of {0}s is invalid; the window must be at least one second")]
    InvalidWindow(u64),

    /// The identity used up its budget for the current window. The only
    /// intentional rejection; the handler never runs.
    #[error("rate limit exceeded for {key}: {limit} requests per window")]
    LimitExceeded {
        key: WindowKey,
        limit: u32,
        /// Time until the current calendar-minute bucket rolls over.
        retry_after: Duration,
    },
}
