//! Request identity - who a rate limit counter is keyed on.

/// The identity a counter is partitioned by: the client's source IP plus
/// the handler scope it is calling.
///
/// Derived once per incoming request from transport metadata; never
/// persisted beyond window key construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    /// Client source IP as reported by the transport.
    pub source_ip: String,
    /// Handler label partitioning limits per endpoint.
    pub scope: String,
}

impl RequestIdentity {
    pub fn new(source_ip: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            source_ip: source_ip.into(),
            scope: scope.into(),
        }
    }

    /// Whether the transport reported a recognizable source address.
    /// Requests without one cannot be limited and are rejected by the gate.
    pub fn has_source(&self) -> bool {
        !self.source_ip.is_empty()
    }
}
