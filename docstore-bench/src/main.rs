//! Document store load-and-benchmark driver.
//!
//! Usage:
//!   docstore-bench                                  # load, query and durability phases
//!   docstore-bench --config bench.toml --export out # settings from file, export CSV + JSON
//!   docstore-bench --products 10000 --load --queries # small load, then queries
//!   docstore-bench --durability --debug             # durability matrix with debug logs

use clap::Parser;
use colored::Colorize;
use docstore_bench::adapters::connector_for;
use docstore_bench::indexes::{ensure_indexes, standard_index_set};
use docstore_bench::loader::{fetch_product_ids, LoadProgress, ProgressSink};
use docstore_bench::report::{self, RunReport};
use docstore_bench::workloads::standard_catalog;
use docstore_bench::{
    BenchConfig, BenchResult, BulkLoader, CancelToken, LoadReport, QueryRunner,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "docstore-bench", about = "Document store load and query benchmark")]
struct Cli {
    /// Config file (.toml, .yaml or .yml). Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store endpoint, e.g. memory://local.
    #[arg(long)]
    endpoint: Option<String>,

    /// Products to generate and load.
    #[arg(long)]
    products: Option<usize>,

    /// Orders to generate and load.
    #[arg(long)]
    orders: Option<usize>,

    /// Records per product insert batch.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Loader worker threads.
    #[arg(long)]
    workers: Option<usize>,

    /// Repetitions of every query scenario.
    #[arg(long)]
    iterations: Option<u32>,

    /// Run the load phase.
    #[arg(long)]
    load: bool,

    /// Run the index and query phases.
    #[arg(long)]
    queries: bool,

    /// Run the write durability phase.
    #[arg(long)]
    durability: bool,

    /// Export directory for CSV + JSON results.
    #[arg(long)]
    export: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(long)]
    debug: bool,
}

impl Cli {
    /// No phase flags means every phase.
    fn phases(&self) -> Phases {
        let all = !self.load && !self.queries && !self.durability;
        Phases {
            load: all || self.load,
            queries: all || self.queries,
            durability: all || self.durability,
        }
    }

    fn bench_config(&self) -> BenchResult<BenchConfig> {
        let mut cfg = match &self.config {
            Some(path) => BenchConfig::load(path)?,
            None => BenchConfig::default(),
        };
        if let Some(endpoint) = &self.endpoint {
            cfg.endpoint = endpoint.clone();
        }
        if let Some(n) = self.products {
            cfg.total_records = n;
        }
        if let Some(n) = self.orders {
            cfg.order_records = n;
        }
        if let Some(n) = self.batch_size {
            cfg.batch_size = n;
        }
        if let Some(n) = self.workers {
            cfg.worker_count = Some(n);
        }
        if let Some(n) = self.iterations {
            cfg.iterations = n;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Copy)]
struct Phases {
    load: bool,
    queries: bool,
    durability: bool,
}

/// Progress bar per collection load.
struct BarProgress {
    bar: Option<ProgressBar>,
}

impl BarProgress {
    fn new() -> Self {
        Self { bar: None }
    }
}

impl ProgressSink for BarProgress {
    fn on_batch(&mut self, progress: &LoadProgress) {
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(progress.records_total as u64);
            bar.set_style(
                ProgressStyle::with_template(
                    "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
            );
            bar
        });
        bar.set_position(progress.records_inserted);
        if progress.failed_batches > 0 {
            bar.set_message(format!(
                "{} ({} failed batches)",
                progress.collection, progress.failed_batches
            ));
        } else {
            bar.set_message(progress.collection.clone());
        }
    }

    fn on_finish(&mut self, report: &LoadReport) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!(
                "{}: {} inserted",
                report.collection, report.total_inserted
            ));
        }
    }
}

fn main() -> BenchResult<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = cli.bench_config()?;

    println!(
        "  Endpoint: {}  Products: {}  Orders: {}  Workers: {}  Iterations: {}",
        cfg.endpoint,
        cfg.total_records,
        cfg.order_records,
        cfg.worker_count(),
        cfg.iterations
    );

    let cancel = CancelToken::new();
    cancel_on_interrupt(cancel.clone())?;

    let report = run(&cfg, cli.phases(), &cancel)?;

    // ── Report ──
    report::print_report(&report);

    // ── Export ──
    if let Some(dir) = &cli.export {
        export(&report, dir)?;
    }

    Ok(())
}

/// First Ctrl-C cancels the run and lets in-flight work drain; a second one exits.
fn cancel_on_interrupt(cancel: CancelToken) -> BenchResult<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    thread::Builder::new()
        .name("docbench-signal".into())
        .spawn(move || {
            runtime.block_on(async {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if cancel.is_cancelled() {
                        error!("second interrupt, exiting");
                        std::process::exit(130);
                    }
                    warn!("interrupt received, finishing in-flight work");
                    cancel.cancel();
                }
            });
        })?;
    Ok(())
}

/// Preflight, then each selected phase in order. A cancelled run stops
/// between phases and keeps what it measured.
fn run(cfg: &BenchConfig, phases: Phases, cancel: &CancelToken) -> BenchResult<RunReport> {
    let connector = connector_for(&cfg.endpoint, cfg.memory_store())?;
    let mut session = connector.connect(&cfg.endpoint)?;
    session.ping()?;
    info!(endpoint = %cfg.endpoint, store = session.name(), "store reachable");

    let mut report = RunReport::new(cfg.clone());

    // ── Load ──
    if phases.load {
        println!("\n{}", "▶ Bulk load".bold().green());
        let products = BulkLoader::new(connector.clone(), cfg.product_loader())
            .with_cancel(cancel.clone())
            .load_products(&mut BarProgress::new())?;
        report.loads.push(products);
        if cancel.is_cancelled() {
            return Ok(report);
        }

        let pool = fetch_product_ids(session.as_mut())?;
        info!(products = pool.len(), "reference pool fetched");

        let orders = BulkLoader::new(connector.clone(), cfg.order_loader())
            .with_cancel(cancel.clone())
            .load_orders(&pool, &mut BarProgress::new())
            .map_err(|e| {
                error!(error = %e, "order load aborted");
                e
            })?;
        report.loads.push(orders);
    }

    // ── Indexes + queries ──
    if phases.queries && !cancel.is_cancelled() {
        println!("\n{}", "▶ Indexes".bold().green());
        let indexes = ensure_indexes(session.as_mut(), &standard_index_set());
        if !indexes.is_clean() {
            warn!(failures = indexes.failures.len(), "some indexes could not be created");
        }

        println!("\n{}", "▶ Query scenarios".bold().green());
        let mut runner = QueryRunner::new(connector.connect(&cfg.endpoint)?, cfg.iterations);
        report.scenarios = runner.run_matrix(
            &standard_catalog(),
            &cfg.query_matrix(),
            Some(&indexes),
            cancel,
        );
        report.indexes = Some(indexes);
    }

    // ── Durability ──
    if phases.durability && !cancel.is_cancelled() {
        println!("\n{}", "▶ Write durability".bold().green());
        report.durability = cfg.durability_benchmark().run(session.as_mut(), cancel);
    }

    Ok(report)
}

fn export(report: &RunReport, dir: &Path) -> BenchResult<()> {
    std::fs::create_dir_all(dir)?;
    report::export_csv(report, &dir.join("query_results.csv"))?;
    report::export_json(report, &dir.join("benchmark_results.json"))?;
    Ok(())
}
