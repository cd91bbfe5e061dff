//! Window key derivation - calendar-minute counter buckets.

use std::fmt;

use chrono::{DateTime, Utc};

use super::RequestIdentity;

/// Prefix shared by all counter keys in the store.
const KEY_PREFIX: &str = "ratelimit";

/// Deterministic store key for one (scope, source IP, calendar minute)
/// bucket.
///
/// The bucket boundary is the wall-clock UTC minute, not a sliding window:
/// the same identity within the same calendar minute always derives the
/// same key, and the next minute derives a fresh one. A burst straddling
/// the boundary can therefore see up to twice the limit; that imprecision
/// is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey(String);

impl WindowKey {
    /// Derive the key for `identity` at instant `now`.
    ///
    /// Callers derive the key exactly once per admission check so the read
    /// and the increment always target the same bucket, even when the
    /// minute ticks over between them.
    pub fn derive(identity: &RequestIdentity, now: DateTime<Utc>) -> Self {
        Self(format!(
            "{KEY_PREFIX}:{}:{}:{}",
            identity.scope,
            identity.source_ip,
            now.format("%Y%m%d%H%M")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
