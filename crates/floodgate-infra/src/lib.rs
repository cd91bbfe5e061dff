//! # Floodgate Infrastructure
//!
//! Concrete counter stores behind the `floodgate-core` port.
//!
//! ## Feature Flags
//!
//! - `redis` (default) - shared Redis-backed counter store
//! - without it, only the single-process in-memory store is built

pub mod counter;

pub use counter::InMemoryCounterStore;

#[cfg(feature = "redis")]
pub use counter::{RedisCounterStore, RedisStoreConfig};
