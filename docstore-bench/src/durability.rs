//! Write-durability probes.
//!
//! Each probe writes a single record or a batch under one durability level,
//! times the write, and then removes whatever it wrote. Probe documents carry a
//! unique marker in [`PROBE_FIELD`]; cleanup deletes by that marker, so it works
//! even when the store applied the write but reported a timeout.

use crate::datagen::DataGen;
use crate::metrics::as_secs;
use crate::model::{Document, RecordId, ORDERS, PRODUCTS};
use crate::query::Filter;
use crate::store::Session;
use crate::{BenchError, CancelToken, WriteErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Marker field identifying documents written by a probe.
pub const PROBE_FIELD: &str = "_probe";

static PROBE_SEQ: AtomicU64 = AtomicU64::new(0);

// ────────────────────────────────────────────────────────────────────────────────
// Durability levels
// ────────────────────────────────────────────────────────────────────────────────

/// How many members must confirm a write before it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "AckRepr", into = "AckRepr")]
pub enum Acknowledgment {
    /// Fire and forget (`w = 0`).
    Unacknowledged,
    Nodes(u32),
    Majority,
}

impl Acknowledgment {
    /// Confirmations needed on a set of `replicas` data-bearing members.
    pub fn required(&self, replicas: u32) -> u32 {
        match self {
            Acknowledgment::Unacknowledged => 0,
            Acknowledgment::Nodes(n) => *n,
            Acknowledgment::Majority => replicas / 2 + 1,
        }
    }
}

impl fmt::Display for Acknowledgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Acknowledgment::Unacknowledged => write!(f, "0"),
            Acknowledgment::Nodes(n) => write!(f, "{}", n),
            Acknowledgment::Majority => write!(f, "majority"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum AckRepr {
    Count(u32),
    Tag(String),
}

impl TryFrom<AckRepr> for Acknowledgment {
    type Error = String;

    fn try_from(repr: AckRepr) -> Result<Self, Self::Error> {
        match repr {
            AckRepr::Count(0) => Ok(Acknowledgment::Unacknowledged),
            AckRepr::Count(n) => Ok(Acknowledgment::Nodes(n)),
            AckRepr::Tag(tag) if tag.eq_ignore_ascii_case("majority") => {
                Ok(Acknowledgment::Majority)
            }
            AckRepr::Tag(tag) => match tag.parse::<u32>() {
                Ok(n) => AckRepr::Count(n).try_into(),
                Err(_) => Err(format!("unknown acknowledgment '{}'", tag)),
            },
        }
    }
}

impl From<Acknowledgment> for AckRepr {
    fn from(ack: Acknowledgment) -> Self {
        match ack {
            Acknowledgment::Unacknowledged => AckRepr::Count(0),
            Acknowledgment::Nodes(n) => AckRepr::Count(n),
            Acknowledgment::Majority => AckRepr::Tag("majority".into()),
        }
    }
}

/// Acknowledgment count plus an optional acknowledgment timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DurabilityLevel {
    pub w: Acknowledgment,
    #[serde(
        rename = "wtimeout_ms",
        default,
        with = "optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

impl DurabilityLevel {
    pub fn new(w: Acknowledgment, timeout: Option<Duration>) -> Self {
        Self { w, timeout }
    }

    pub fn nodes(n: u32, timeout_ms: u64) -> Self {
        Self::new(Acknowledgment::Nodes(n), Some(Duration::from_millis(timeout_ms)))
    }

    pub fn majority(timeout_ms: u64) -> Self {
        Self::new(Acknowledgment::Majority, Some(Duration::from_millis(timeout_ms)))
    }

    pub fn unacknowledged() -> Self {
        Self::new(Acknowledgment::Unacknowledged, None)
    }
}

/// Primary acknowledgment, no timeout.
impl Default for DurabilityLevel {
    fn default() -> Self {
        Self::new(Acknowledgment::Nodes(1), None)
    }
}

impl fmt::Display for DurabilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timeout {
            Some(t) => write!(f, "w: {}, wtimeout: {}ms", self.w, t.as_millis()),
            None => write!(f, "w: {}, wtimeout: none", self.w),
        }
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Single measurement
// ────────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum WritePayload {
    Single(Document),
    Batch(Vec<Document>),
}

impl WritePayload {
    pub fn len(&self) -> usize {
        match self {
            WritePayload::Single(_) => 1,
            WritePayload::Batch(docs) => docs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mode(&self) -> WriteMode {
        match self {
            WritePayload::Single(_) => WriteMode::Single,
            WritePayload::Batch(_) => WriteMode::Batch,
        }
    }

    fn tagged(self, token: &str) -> Self {
        let tag = |mut doc: Document| {
            doc.insert(PROBE_FIELD.into(), token.into());
            doc
        };
        match self {
            WritePayload::Single(doc) => WritePayload::Single(tag(doc)),
            WritePayload::Batch(docs) => WritePayload::Batch(docs.into_iter().map(tag).collect()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Single,
    Batch,
}

#[derive(Debug, Clone, Serialize)]
pub struct DurabilityOutcome {
    pub collection: String,
    pub mode: WriteMode,
    pub level: DurabilityLevel,
    pub batch_size: usize,
    pub success: bool,
    pub error_kind: Option<WriteErrorKind>,
    pub error: Option<String>,
    #[serde(serialize_with = "as_secs")]
    pub latency: Duration,
}

/// Temporary probe records, removed when the guard drops.
struct ProbeGuard<'s> {
    session: &'s mut dyn Session,
    collection: String,
    marker: Filter,
}

impl<'s> ProbeGuard<'s> {
    fn acquire(session: &'s mut dyn Session, collection: &str, token: &str) -> Self {
        Self {
            session,
            collection: collection.to_string(),
            marker: Filter::eq(PROBE_FIELD, token),
        }
    }

    fn session(&mut self) -> &mut dyn Session {
        &mut *self.session
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        match self.session.delete_many(&self.collection, &self.marker) {
            Ok(removed) => debug!(collection = %self.collection, removed, "probe records removed"),
            Err(e) => warn!(collection = %self.collection, error = %e, "probe cleanup failed"),
        }
    }
}

fn next_probe_token() -> String {
    format!(
        "probe-{}-{}-{}",
        std::process::id(),
        chrono::Utc::now().timestamp_micros(),
        PROBE_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// Write `payload` under `level`, time the write, then remove it.
///
/// Only the write is timed. Cleanup runs on every exit path and its failure
/// is logged, never reported as a write failure.
pub fn measure_write(
    session: &mut dyn Session,
    collection: &str,
    payload: WritePayload,
    level: &DurabilityLevel,
) -> DurabilityOutcome {
    let mode = payload.mode();
    let batch_size = payload.len();
    let token = next_probe_token();
    let payload = payload.tagged(&token);

    let mut guard = ProbeGuard::acquire(session, collection, &token);
    let start = Instant::now();
    let result = match payload {
        WritePayload::Single(doc) => guard.session().insert_one(collection, doc, level).map(|_| 1),
        WritePayload::Batch(docs) => guard.session().insert_many(collection, docs, level),
    };
    let latency = start.elapsed();
    drop(guard);

    let (success, error_kind, error) = match result {
        Ok(_) => (true, None, None),
        Err(e) => (false, Some(classify(&e)), Some(e.to_string())),
    };
    DurabilityOutcome {
        collection: collection.to_string(),
        mode,
        level: *level,
        batch_size,
        success,
        error_kind,
        error,
        latency,
    }
}

fn classify(err: &BenchError) -> WriteErrorKind {
    match err {
        BenchError::Write(w) => w.kind,
        BenchError::Connection(_) | BenchError::Io(_) => WriteErrorKind::Connectivity,
        _ => WriteErrorKind::Rejected,
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Benchmark
// ────────────────────────────────────────────────────────────────────────────────

/// Single-record probes for every level, then batch probes for every
/// batch size × level.
#[derive(Debug, Clone)]
pub struct DurabilityBenchmark {
    pub levels: Vec<DurabilityLevel>,
    pub batch_sizes: Vec<usize>,
    pub seed: u64,
}

impl DurabilityBenchmark {
    pub fn new(levels: Vec<DurabilityLevel>, batch_sizes: Vec<usize>) -> Self {
        Self {
            levels,
            batch_sizes,
            seed: 42,
        }
    }

    pub fn run(&self, session: &mut dyn Session, cancel: &CancelToken) -> Vec<DurabilityOutcome> {
        let mut gen = DataGen::new(self.seed);
        let mut outcomes = Vec::new();
        let placeholder = RecordId::new("probe-product");

        for level in &self.levels {
            if cancel.is_cancelled() {
                return outcomes;
            }
            let doc = gen.product().to_document();
            let outcome = measure_write(session, PRODUCTS, WritePayload::Single(doc), level);
            log_outcome(&outcome);
            outcomes.push(outcome);
        }

        for &size in &self.batch_sizes {
            let docs: Vec<Document> = gen
                .probe_orders(size, &placeholder)
                .iter()
                .map(|o| o.to_document())
                .collect();
            for level in &self.levels {
                if cancel.is_cancelled() {
                    return outcomes;
                }
                let outcome =
                    measure_write(session, ORDERS, WritePayload::Batch(docs.clone()), level);
                log_outcome(&outcome);
                outcomes.push(outcome);
            }
        }
        outcomes
    }
}

fn log_outcome(outcome: &DurabilityOutcome) {
    match outcome.error_kind {
        None => info!(
            level = %outcome.level,
            batch = outcome.batch_size,
            latency_ms = outcome.latency.as_secs_f64() * 1e3,
            "durable write confirmed"
        ),
        Some(kind) => warn!(
            level = %outcome.level,
            batch = outcome.batch_size,
            %kind,
            "durable write failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryStore, MemoryStoreConfig};
    use crate::query::FindOptions;
    use crate::store::StoreConnector;

    fn replica_set(lag_ms: u64) -> MemoryStore {
        MemoryStore::new(MemoryStoreConfig {
            replica_count: 3,
            replication_lag: Duration::from_millis(lag_ms),
            ..MemoryStoreConfig::default()
        })
    }

    fn count(session: &mut dyn Session, collection: &str) -> u64 {
        session
            .find(collection, &FindOptions::default())
            .unwrap()
            .drain_count()
            .unwrap()
    }

    #[test]
    fn test_level_parses_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            levels: Vec<DurabilityLevel>,
        }
        let w: Wrapper = toml::from_str(
            r#"
            levels = [
                { w = 1, wtimeout_ms = 5000 },
                { w = "majority", wtimeout_ms = 250 },
                { w = 0 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(w.levels[0], DurabilityLevel::nodes(1, 5000));
        assert_eq!(w.levels[1], DurabilityLevel::majority(250));
        assert_eq!(w.levels[2], DurabilityLevel::unacknowledged());
        assert_eq!(w.levels[1].to_string(), "w: majority, wtimeout: 250ms");
    }

    #[test]
    fn test_successful_write_leaves_no_residue() {
        let store = replica_set(1);
        let mut session = store.connect("memory://test").unwrap();
        let doc = DataGen::new(1).product().to_document();
        let outcome = measure_write(
            session.as_mut(),
            PRODUCTS,
            WritePayload::Single(doc),
            &DurabilityLevel::majority(1_000),
        );
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.error_kind, None);
        assert_eq!(count(session.as_mut(), PRODUCTS), 0);
    }

    #[test]
    fn test_unmet_timeout_is_classified_as_timeout() {
        let store = replica_set(100);
        let mut session = store.connect("memory://test").unwrap();
        let doc = DataGen::new(2).product().to_document();
        let level = DurabilityLevel::nodes(3, 10);
        let outcome = measure_write(session.as_mut(), PRODUCTS, WritePayload::Single(doc), &level);
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(WriteErrorKind::Timeout));
        assert!(outcome.latency >= Duration::from_millis(10));
        // The write was applied before the timeout; the guard still removed it.
        assert_eq!(count(session.as_mut(), PRODUCTS), 0);
    }

    #[test]
    fn test_unsatisfiable_concern_is_rejected_not_timeout() {
        let store = replica_set(1);
        let mut session = store.connect("memory://test").unwrap();
        let docs = DataGen::new(3)
            .probe_orders(5, &RecordId::new("x"))
            .iter()
            .map(|o| o.to_document())
            .collect();
        let outcome = measure_write(
            session.as_mut(),
            ORDERS,
            WritePayload::Batch(docs),
            &DurabilityLevel::nodes(5, 1_000),
        );
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(WriteErrorKind::Rejected));
        assert_eq!(outcome.batch_size, 5);
    }

    #[test]
    fn test_cleanup_failure_is_not_a_write_failure() {
        let store = replica_set(0);
        store.fail_deletes(true);
        let mut session = store.connect("memory://test").unwrap();
        let doc = DataGen::new(4).product().to_document();
        let outcome = measure_write(
            session.as_mut(),
            PRODUCTS,
            WritePayload::Single(doc),
            &DurabilityLevel::default(),
        );
        assert!(outcome.success);
        assert_eq!(outcome.error, None);
        assert_eq!(count(session.as_mut(), PRODUCTS), 1);
    }

    #[test]
    fn test_benchmark_covers_every_level_and_batch_size() {
        let store = replica_set(0);
        let mut session = store.connect("memory://test").unwrap();
        let bench = DurabilityBenchmark::new(
            vec![DurabilityLevel::nodes(1, 500), DurabilityLevel::majority(500)],
            vec![10, 20],
        );
        let outcomes = bench.run(session.as_mut(), &CancelToken::new());
        assert_eq!(outcomes.len(), 2 + 2 * 2);
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(outcomes[2].mode, WriteMode::Batch);
        assert_eq!(count(session.as_mut(), ORDERS), 0);
    }
}
