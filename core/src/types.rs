//! Unified error type for the exchange core.
//!
//! One taxonomy covers every subsystem so that the orchestrator can apply
//! its recovery policy uniformly: `CapacityExceeded`, `Config` and `Auth`
//! surface to the caller immediately, a `Protocol` failure aborts the whole
//! retrieval, and an `Integrity` failure is isolated to the one record it
//! concerns.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Inconsistent configuration or key material detected at init.
    #[error("configuration error: {0}")]
    Config(String),

    /// An input set is larger than the protocol allows. Raised before any
    /// network I/O is performed.
    #[error("capacity exceeded: {actual} items, limit {limit}")]
    CapacityExceeded { actual: usize, limit: usize },

    /// A protocol session failed: handshake mismatch, malformed frame,
    /// failed consistency check, or TLS setting disagreement. The session
    /// is aborted and partial state discarded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// AEAD tag mismatch or associated-data mismatch on one ciphertext.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Credential or token rejection. Not retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Out of memory, no free port, or a similar exhausted resource.
    #[error("resource error: {0}")]
    Resource(String),
}

impl From<io::Error> for ExchangeError {
    fn from(e: io::Error) -> Self {
        ExchangeError::Network(e.to_string())
    }
}

impl From<bincode::Error> for ExchangeError {
    fn from(e: bincode::Error) -> Self {
        ExchangeError::Protocol(format!("wire encoding: {e}"))
    }
}

impl ExchangeError {
    /// True for the error kinds the orchestrator surfaces to the caller
    /// without touching the network.
    pub fn is_pre_flight(&self) -> bool {
        matches!(
            self,
            ExchangeError::Config(_)
                | ExchangeError::CapacityExceeded { .. }
                | ExchangeError::Auth(_)
        )
    }
}
