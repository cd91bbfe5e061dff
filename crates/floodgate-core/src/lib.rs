//! # Floodgate Core
//!
//! The domain layer of the Floodgate rate limiter.
//! Identity and window key derivation, the counter store port, and the
//! admission gate - with zero infrastructure dependencies.

pub mod domain;
pub mod error;
pub mod gate;
pub mod ports;

pub use error::GateError;
pub use gate::{Admission, GateConfig, LimiterGate};
