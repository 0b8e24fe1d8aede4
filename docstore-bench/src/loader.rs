//! Parallel bulk loader.
//!
//! A load is split into fixed-size batches that a pool of named worker
//! threads pulls from a shared channel. Each worker owns its own session and
//! generates its batch locally from a per-batch seed, so workers share
//! nothing mutable. A failing batch is recorded and the rest of the load goes
//! on; only an unreachable store at start-up is fatal.

use crate::datagen::DataGen;
use crate::metrics::{as_secs, TimingSummary};
use crate::model::{Document, Order, Product, RecordId, ID_FIELD, ORDERS, PRODUCTS};
use crate::query::FindOptions;
use crate::store::{Session, StoreConnector};
use crate::{BenchError, BenchResult, CancelToken, DurabilityLevel, WriteError};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub total_records: usize,
    pub batch_size: usize,
    pub worker_count: usize,
    pub seed: u64,
    pub endpoint: String,
    pub durability: DurabilityLevel,
}

impl LoaderConfig {
    pub fn new(endpoint: impl Into<String>, total_records: usize, batch_size: usize) -> Self {
        Self {
            total_records,
            batch_size,
            worker_count: num_cpus::get(),
            seed: 42,
            endpoint: endpoint.into(),
            durability: DurabilityLevel::default(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Batch planning
// ────────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchAssignment {
    pub index: usize,
    pub offset: usize,
    pub size: usize,
}

/// Split `total` records into `ceil(total / batch_size)` batches; only the
/// last batch may be short.
pub fn plan_batches(total: usize, batch_size: usize) -> BenchResult<Vec<BatchAssignment>> {
    if batch_size == 0 {
        return Err(BenchError::Config("batch size must be positive".into()));
    }
    Ok((0..total)
        .step_by(batch_size)
        .enumerate()
        .map(|(index, offset)| BatchAssignment {
            index,
            offset,
            size: batch_size.min(total - offset),
        })
        .collect())
}

fn batch_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

// ────────────────────────────────────────────────────────────────────────────────
// Outcomes and progress
// ────────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum BatchStatus {
    Inserted(u64),
    Failed(WriteError),
    /// Not attempted because the load was cancelled.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub batch: BatchAssignment,
    pub worker: usize,
    pub status: BatchStatus,
    pub latency: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub batch: BatchAssignment,
    pub error: WriteError,
}

/// Cumulative counts after each completed batch. Every field only grows.
#[derive(Debug, Clone, Default)]
pub struct LoadProgress {
    pub collection: String,
    pub batches_done: usize,
    pub batches_total: usize,
    pub records_inserted: u64,
    pub records_total: usize,
    pub failed_batches: usize,
}

pub trait ProgressSink {
    fn on_batch(&mut self, progress: &LoadProgress);

    fn on_finish(&mut self, _report: &LoadReport) {}
}

/// Sink that ignores progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_batch(&mut self, _progress: &LoadProgress) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub collection: String,
    pub requested: usize,
    pub total_inserted: u64,
    pub batches: usize,
    pub skipped_batches: usize,
    pub failures: Vec<BatchFailure>,
    pub cancelled: bool,
    #[serde(serialize_with = "as_secs")]
    pub elapsed: Duration,
    pub batch_latency: TimingSummary,
}

impl LoadReport {
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_inserted as f64 / secs
        } else {
            0.0
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failures.is_empty() && self.total_inserted == self.requested as u64
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Loader
// ────────────────────────────────────────────────────────────────────────────────

pub struct BulkLoader {
    connector: Arc<dyn StoreConnector>,
    config: LoaderConfig,
    cancel: CancelToken,
    clock: DateTime<Utc>,
}

impl BulkLoader {
    pub fn new(connector: Arc<dyn StoreConnector>, config: LoaderConfig) -> Self {
        Self {
            connector,
            config,
            cancel: CancelToken::new(),
            clock: Utc::now(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn load_products(&self, progress: &mut dyn ProgressSink) -> BenchResult<LoadReport> {
        let (seed, now) = (self.config.seed, self.clock);
        self.run(PRODUCTS, progress, |batch| {
            let mut gen = DataGen::with_clock(batch_seed(seed, batch.index), now);
            Ok(gen
                .generate_products(batch.size)
                .iter()
                .map(Product::to_document)
                .collect())
        })
    }

    /// Orders reference products drawn only from `pool`.
    pub fn load_orders(
        &self,
        pool: &[RecordId],
        progress: &mut dyn ProgressSink,
    ) -> BenchResult<LoadReport> {
        if pool.is_empty() {
            return Err(BenchError::InsufficientReferenceData(
                "no product identifiers available for order generation".into(),
            ));
        }
        let (seed, now) = (self.config.seed.wrapping_add(1), self.clock);
        self.run(ORDERS, progress, |batch| {
            let mut gen = DataGen::with_clock(batch_seed(seed, batch.index), now);
            Ok(gen
                .generate_orders(batch.size, pool)?
                .iter()
                .map(Order::to_document)
                .collect())
        })
    }

    fn run<F>(
        &self,
        collection: &str,
        progress: &mut dyn ProgressSink,
        make: F,
    ) -> BenchResult<LoadReport>
    where
        F: Fn(&BatchAssignment) -> BenchResult<Vec<Document>> + Sync,
    {
        let plan = plan_batches(self.config.total_records, self.config.batch_size)?;

        let mut preflight = self.connector.connect(&self.config.endpoint)?;
        preflight.ping()?;
        drop(preflight);

        let workers = self.config.worker_count.clamp(1, plan.len().max(1));
        info!(
            collection,
            records = self.config.total_records,
            batches = plan.len(),
            workers,
            "bulk load starting"
        );

        let (task_tx, task_rx) = unbounded::<BatchAssignment>();
        for batch in &plan {
            let _ = task_tx.send(*batch);
        }
        drop(task_tx);
        let (result_tx, result_rx) = unbounded::<BatchOutcome>();

        let mut state = LoadProgress {
            collection: collection.to_string(),
            batches_total: plan.len(),
            records_total: self.config.total_records,
            ..LoadProgress::default()
        };
        let mut outcomes = Vec::with_capacity(plan.len());
        let start = Instant::now();

        thread::scope(|scope| -> BenchResult<()> {
            for worker in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let make = &make;
                thread::Builder::new()
                    .name(format!("docbench-loader-{}", worker))
                    .spawn_scoped(scope, move || {
                        self.worker_loop(worker, collection, task_rx, result_tx, make)
                    })?;
            }
            drop(result_tx);

            for outcome in result_rx.iter() {
                state.batches_done += 1;
                match &outcome.status {
                    BatchStatus::Inserted(n) => state.records_inserted += n,
                    BatchStatus::Failed(_) => state.failed_batches += 1,
                    BatchStatus::Skipped => {}
                }
                progress.on_batch(&state);
                outcomes.push(outcome);
            }
            Ok(())
        })?;

        let report = self.summarize(collection, outcomes, start.elapsed());
        info!(
            collection,
            inserted = report.total_inserted,
            failed_batches = report.failures.len(),
            cancelled = report.cancelled,
            secs = report.elapsed.as_secs_f64(),
            "bulk load finished"
        );
        progress.on_finish(&report);
        Ok(report)
    }

    fn worker_loop<F>(
        &self,
        worker: usize,
        collection: &str,
        tasks: Receiver<BatchAssignment>,
        results: Sender<BatchOutcome>,
        make: &F,
    ) where
        F: Fn(&BatchAssignment) -> BenchResult<Vec<Document>> + Sync,
    {
        let mut session: Option<Box<dyn Session>> = None;
        for batch in tasks.iter() {
            let start = Instant::now();
            let status = if self.cancel.is_cancelled() {
                BatchStatus::Skipped
            } else {
                match self.insert_batch(&mut session, collection, &batch, make) {
                    Ok(n) => {
                        debug!(worker, batch = batch.index, inserted = n, "batch inserted");
                        BatchStatus::Inserted(n)
                    }
                    Err(e) => {
                        warn!(worker, batch = batch.index, error = %e, "batch failed");
                        BatchStatus::Failed(e)
                    }
                }
            };
            let outcome = BatchOutcome {
                batch,
                worker,
                status,
                latency: start.elapsed(),
            };
            if results.send(outcome).is_err() {
                break;
            }
        }
    }

    /// Insert one batch. The session is reopened lazily after it was lost
    /// to a panic or a failed connect.
    fn insert_batch<F>(
        &self,
        session: &mut Option<Box<dyn Session>>,
        collection: &str,
        batch: &BatchAssignment,
        make: &F,
    ) -> Result<u64, WriteError>
    where
        F: Fn(&BatchAssignment) -> BenchResult<Vec<Document>> + Sync,
    {
        let docs = make(batch).map_err(into_write_error)?;
        let mut active = match session.take() {
            Some(s) => s,
            None => self
                .connector
                .connect(&self.config.endpoint)
                .map_err(into_write_error)?,
        };
        let durability = self.config.durability;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            active.insert_many(collection, docs, &durability)
        }));
        match result {
            Ok(inserted) => {
                *session = Some(active);
                inserted.map_err(into_write_error)
            }
            Err(_) => Err(WriteError::connectivity(
                "session panicked during insert; reconnecting",
            )),
        }
    }

    fn summarize(&self, collection: &str, outcomes: Vec<BatchOutcome>, elapsed: Duration) -> LoadReport {
        let mut total_inserted = 0;
        let mut skipped_batches = 0;
        let mut failures = Vec::new();
        let mut latencies = Vec::new();
        for outcome in outcomes {
            match outcome.status {
                BatchStatus::Inserted(n) => {
                    total_inserted += n;
                    latencies.push(outcome.latency);
                }
                BatchStatus::Failed(error) => {
                    latencies.push(outcome.latency);
                    failures.push(BatchFailure {
                        batch: outcome.batch,
                        error,
                    });
                }
                BatchStatus::Skipped => skipped_batches += 1,
            }
        }
        failures.sort_by_key(|f| f.batch.index);
        LoadReport {
            collection: collection.to_string(),
            requested: self.config.total_records,
            total_inserted,
            batches: latencies.len() + skipped_batches,
            skipped_batches,
            failures,
            cancelled: self.cancel.is_cancelled(),
            elapsed,
            batch_latency: TimingSummary::from_samples(&latencies),
        }
    }
}

fn into_write_error(e: BenchError) -> WriteError {
    match e {
        BenchError::Write(w) => w,
        BenchError::Connection(msg) => WriteError::connectivity(msg),
        BenchError::Io(io) => WriteError::connectivity(io.to_string()),
        other => WriteError::rejected(other.to_string()),
    }
}

/// Identifiers of every stored Product, the reference pool for order loading.
pub fn fetch_product_ids(session: &mut dyn Session) -> BenchResult<Vec<RecordId>> {
    let ids: Vec<RecordId> = session
        .find(PRODUCTS, &FindOptions::default().project([ID_FIELD]))?
        .filter_map(|doc| doc.map(|d| RecordId::of(&d)).transpose())
        .collect::<BenchResult<_>>()?;
    info!(count = ids.len(), "product id pool fetched");
    Ok(ids)
}
