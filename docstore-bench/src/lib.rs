//! Load-and-benchmark engine for document-oriented data stores.
//!
//! The crate generates referentially-linked Product/Order datasets, loads them
//! through a pool of independent workers, declares the index set the query
//! shapes need, and then times a catalog of query pipelines and write-durability
//! probes. The data store itself is reached only through the [`store`] traits;
//! [`adapters::memory`] provides an in-process implementation.

pub mod adapters;
pub mod config;
pub mod datagen;
pub mod durability;
pub mod indexes;
pub mod loader;
pub mod metrics;
pub mod model;
pub mod query;
pub mod report;
pub mod runner;
pub mod store;
pub mod workloads;

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use config::BenchConfig;
pub use datagen::DataGen;
pub use durability::{Acknowledgment, DurabilityLevel};
pub use loader::{BulkLoader, LoadReport};
pub use metrics::{LatencyRecorder, TimingSummary};
pub use model::{Document, Order, Product, RecordId};
pub use runner::{QueryRunner, ScenarioResult};
pub use store::{Cursor, Session, StoreConnector};

// ────────────────────────────────────────────────────────────────────────────────
// Error type
// ────────────────────────────────────────────────────────────────────────────────

pub type BenchResult<T> = std::result::Result<T, BenchError>;

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// No store reachable at the configured endpoint. Fatal to a run.
    #[error("connection error: {0}")]
    Connection(String),

    /// Order generation was asked to reference an empty Product pool.
    #[error("insufficient reference data: {0}")]
    InsufficientReferenceData(String),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("query error: {0}")]
    Query(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BenchError {
    fn from(e: serde_json::Error) -> Self {
        BenchError::Serialization(e.to_string())
    }
}

/// Why a write was not confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteErrorKind {
    /// The durability requirement was not met within its timeout.
    Timeout,
    /// The store refused the operation (validation, unsatisfiable concern, ...).
    Rejected,
    /// The session lost its connection to the store.
    Connectivity,
}

impl fmt::Display for WriteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteErrorKind::Timeout => write!(f, "timeout"),
            WriteErrorKind::Rejected => write!(f, "rejected"),
            WriteErrorKind::Connectivity => write!(f, "connectivity"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{kind} write error: {message}")]
pub struct WriteError {
    pub kind: WriteErrorKind,
    pub message: String,
}

impl WriteError {
    pub fn new(kind: WriteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(WriteErrorKind::Timeout, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(WriteErrorKind::Rejected, message)
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(WriteErrorKind::Connectivity, message)
    }
}

impl BenchError {
    /// The write-failure kind, if this error is a write failure.
    pub fn write_kind(&self) -> Option<WriteErrorKind> {
        match self {
            BenchError::Write(w) => Some(w.kind),
            _ => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Cancellation
// ────────────────────────────────────────────────────────────────────────────────

/// Shared flag for abandoning a run between batches or scenarios.
///
/// Work that already completed is kept; nothing is rolled back.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Run metadata
// ────────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub cpus: usize,
    pub timestamp: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpus: num_cpus::get(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_error_display_names_kind() {
        let err = BenchError::from(WriteError::timeout("waiting for replication"));
        assert_eq!(err.write_kind(), Some(WriteErrorKind::Timeout));
        assert_eq!(err.to_string(), "timeout write error: waiting for replication");
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
