// src/error.rs
// Error taxonomy for the pipeline. Each variant family maps to a different
// recovery policy: collection errors wait for the next scheduled cycle,
// transient agent errors are retried with backoff, permanent agent errors go
// straight to fallback, validation errors skip the item, persistence errors
// fail the current commit only.

use std::time::Duration;

use thiserror::Error;

/// Adapter-level failure (network or parse). Not retried within the same
/// cycle; the next scheduled collection picks the source up again.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("network error: {0}")]
    Network(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Failure of a single AI backend call.
#[derive(Debug, Clone, Error)]
pub enum AgentCallError {
    /// Timeout, rate limit, 5xx-class. Retried by the backoff controller.
    #[error("transient agent error: {0}")]
    Transient(String),
    /// Per-attempt timeout elapsed. Treated as transient.
    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),
    /// Bad credential, malformed request. Skips retries and opens the circuit.
    #[error("permanent agent error: {0}")]
    Permanent(String),
}

impl AgentCallError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, AgentCallError::Permanent(_))
    }
}

/// Malformed adapter output. Skipped and counted, never persisted or retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("raw item has no external id")]
    MissingExternalId,
    #[error("raw item has no title or body text")]
    EmptyContent,
}

/// Durable-store failure. Fatal to the current commit for one item only; the
/// cycle continues and the item stays eligible for the next cycle.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("transaction failed: {0}")]
    Transaction(String),
}
