//! Data-store capability interface.
//!
//! The engine never talks to a store directly: it receives a
//! [`StoreConnector`] and opens one [`Session`] per worker or runner. Every
//! call blocks until the store answers.

use crate::durability::DurabilityLevel;
use crate::indexes::IndexSpec;
use crate::model::{Document, RecordId};
use crate::query::{Filter, FindOptions, Stage};
use crate::BenchResult;

/// Opens sessions against an endpoint. Shared read-only across workers.
pub trait StoreConnector: Send + Sync {
    /// Fails with [`BenchError::Connection`](crate::BenchError::Connection)
    /// when the endpoint is unreachable.
    fn connect(&self, endpoint: &str) -> BenchResult<Box<dyn Session>>;
}

/// One exclusive connection to the store.
pub trait Session: Send {
    fn name(&self) -> &str;

    fn ping(&mut self) -> BenchResult<()>;

    // ── writes ──

    /// Bulk insert; returns the number of documents the store accepted.
    fn insert_many(
        &mut self,
        collection: &str,
        docs: Vec<Document>,
        durability: &DurabilityLevel,
    ) -> BenchResult<u64>;

    fn insert_one(
        &mut self,
        collection: &str,
        doc: Document,
        durability: &DurabilityLevel,
    ) -> BenchResult<RecordId>;

    fn delete_one(&mut self, collection: &str, filter: &Filter) -> BenchResult<u64>;

    fn delete_many(&mut self, collection: &str, filter: &Filter) -> BenchResult<u64>;

    // ── reads ──

    fn find(&mut self, collection: &str, options: &FindOptions) -> BenchResult<Cursor>;

    fn aggregate(&mut self, collection: &str, stages: &[Stage]) -> BenchResult<Cursor>;

    // ── schema ──

    /// Idempotent; returns how many of `specs` are in effect after the call.
    fn create_indexes(&mut self, collection: &str, specs: &[IndexSpec]) -> BenchResult<u64>;
}

/// Finite, single-pass result sequence.
///
/// A cursor is consumed by value, so it cannot be restarted.
pub struct Cursor {
    docs: Box<dyn Iterator<Item = BenchResult<Document>> + Send>,
}

impl Cursor {
    pub fn new<I>(docs: I) -> Self
    where
        I: Iterator<Item = BenchResult<Document>> + Send + 'static,
    {
        Self {
            docs: Box::new(docs),
        }
    }

    pub fn from_documents(docs: Vec<Document>) -> Self {
        Self::new(docs.into_iter().map(Ok))
    }

    /// Pull every document, stopping at the first error.
    pub fn materialize(self) -> BenchResult<Vec<Document>> {
        self.collect()
    }

    /// Consume the cursor, counting documents without keeping them.
    pub fn drain_count(self) -> BenchResult<u64> {
        let mut n = 0;
        for doc in self {
            doc?;
            n += 1;
        }
        Ok(n)
    }
}

impl Iterator for Cursor {
    type Item = BenchResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        self.docs.next()
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor").finish_non_exhaustive()
    }
}
