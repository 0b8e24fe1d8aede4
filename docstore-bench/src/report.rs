//! Result tables, CSV and JSON export.

use crate::config::BenchConfig;
use crate::durability::{DurabilityOutcome, WriteMode};
use crate::indexes::{describe, IndexReport};
use crate::loader::LoadReport;
use crate::runner::{summarize_by_page_size, ScenarioOutcome, ScenarioResult};
use crate::{BenchResult, SystemInfo, WriteErrorKind};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Everything one run produced. Partial runs are still reportable.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub system_info: SystemInfo,
    pub config: BenchConfig,
    pub loads: Vec<LoadReport>,
    pub indexes: Option<IndexReport>,
    pub scenarios: Vec<ScenarioResult>,
    pub durability: Vec<DurabilityOutcome>,
}

impl RunReport {
    pub fn new(config: BenchConfig) -> Self {
        Self {
            system_info: SystemInfo::collect(),
            config,
            loads: Vec::new(),
            indexes: None,
            scenarios: Vec::new(),
            durability: Vec::new(),
        }
    }

    pub fn failed_scenarios(&self) -> usize {
        self.scenarios.iter().filter(|s| !s.succeeded()).count()
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Terminal output
// ────────────────────────────────────────────────────────────────────────────────

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);
    table
}

fn heading(title: &str) {
    println!("\n{}", format!("━━━ {} ━━━", title).bold().cyan());
}

fn failed_cell() -> Cell {
    Cell::new("FAILED").fg(Color::Red)
}

pub fn print_report(report: &RunReport) {
    println!(
        "\n{}",
        "╔══════════════════════════════════════════════════════════════╗"
            .bold()
            .blue()
    );
    println!(
        "{}",
        "║              Document Store Benchmark Report                 ║"
            .bold()
            .blue()
    );
    println!(
        "{}",
        "╚══════════════════════════════════════════════════════════════╝"
            .bold()
            .blue()
    );
    println!(
        "  OS: {}  Arch: {}  CPUs: {}  Time: {}  Endpoint: {}",
        report.system_info.os,
        report.system_info.arch,
        report.system_info.cpus,
        report.system_info.timestamp,
        report.config.endpoint
    );

    print_loads(&report.loads);
    if let Some(indexes) = &report.indexes {
        print_indexes(indexes);
    }
    print_scenarios(&report.scenarios);
    print_pagination_summary(&report.scenarios);
    print_durability(&report.durability);

    let failed = report.failed_scenarios();
    if failed > 0 {
        println!(
            "\n  {}",
            format!("{} of {} query scenarios failed", failed, report.scenarios.len())
                .red()
                .bold()
        );
    }
}

pub fn print_loads(loads: &[LoadReport]) {
    if loads.is_empty() {
        return;
    }
    heading("Bulk load");
    let mut table = new_table();
    table.set_header(vec![
        "Collection",
        "Requested",
        "Inserted",
        "Batches",
        "Failed",
        "Skipped",
        "Elapsed (s)",
        "Throughput",
    ]);
    for load in loads {
        let inserted = Cell::new(format_count(load.total_inserted));
        let inserted = if load.is_complete() {
            inserted.fg(Color::Green)
        } else {
            inserted.fg(Color::Yellow)
        };
        table.add_row(vec![
            Cell::new(&load.collection),
            Cell::new(format_count(load.requested as u64)),
            inserted,
            Cell::new(load.batches),
            Cell::new(load.failures.len()),
            Cell::new(load.skipped_batches),
            Cell::new(format_secs(load.elapsed)),
            Cell::new(format!("{}/s", format_throughput(load.throughput()))),
        ]);
    }
    println!("{table}");

    for load in loads {
        for failure in &load.failures {
            println!(
                "  {} batch {} ({} records): {}",
                load.collection.dimmed(),
                failure.batch.index,
                failure.batch.size,
                failure.error.to_string().red()
            );
        }
        if load.cancelled {
            println!("  {} {}", load.collection.dimmed(), "cancelled".yellow());
        }
    }
}

pub fn print_indexes(report: &IndexReport) {
    heading("Indexes");
    println!("  {} indexes in effect", report.applied_count);
    for set in &report.applied {
        for spec in &set.specs {
            println!(
                "  {} {} {}",
                "✓".green(),
                set.collection.bold(),
                format!("{{ {} }}", describe(spec)).dimmed()
            );
        }
    }
    for failure in &report.failures {
        println!(
            "  {} {} {}",
            "✗".red(),
            failure.collection.bold(),
            failure.error.red()
        );
    }
}

pub fn print_scenarios(results: &[ScenarioResult]) {
    let mut order: Vec<&str> = Vec::new();
    for r in results {
        if !order.contains(&r.pipeline.as_str()) {
            order.push(&r.pipeline);
        }
    }

    for pipeline in order {
        heading(pipeline);
        let mut table = new_table();
        table.set_header(vec![
            "Page Size",
            "Skip",
            "Window",
            "Indexed",
            "Records",
            "Mean (s)",
            "Min (s)",
            "Max (s)",
            "p99 (s)",
        ]);
        for r in results.iter().filter(|r| r.pipeline == pipeline) {
            let indexed = match r.indexed {
                Some(true) => Cell::new("yes").fg(Color::Green),
                Some(false) => Cell::new("no").fg(Color::Yellow),
                None => Cell::new("-"),
            };
            let mut row = vec![
                Cell::new(r.params.page_size),
                Cell::new(r.params.skip),
                Cell::new(format!("{}d", r.params.date_window_days)),
                indexed,
            ];
            match &r.outcome {
                ScenarioOutcome::Succeeded {
                    timings,
                    result_count,
                } => row.extend([
                    Cell::new(result_count),
                    Cell::new(format_secs(timings.mean)),
                    Cell::new(format_secs(timings.min)),
                    Cell::new(format_secs(timings.max)),
                    Cell::new(format_secs(timings.p99)),
                ]),
                ScenarioOutcome::Failed { error, .. } => {
                    row.push(failed_cell());
                    row.push(Cell::new(error).fg(Color::Red));
                }
            }
            table.add_row(row);
        }
        println!("{table}");
    }
}

/// Per page size, timings across every skip offset.
pub fn print_pagination_summary(results: &[ScenarioResult]) {
    let summary = summarize_by_page_size(results, "pagination");
    if summary.is_empty() {
        return;
    }
    heading("Pagination summary");
    let mut table = new_table();
    table.set_header(vec!["Page Size", "Runs", "Avg (s)", "Min (s)", "Max (s)"]);
    for row in summary {
        table.add_row(vec![
            Cell::new(row.page_size),
            Cell::new(row.timings.samples),
            Cell::new(format_secs(row.timings.mean)),
            Cell::new(format_secs(row.timings.min)),
            Cell::new(format_secs(row.timings.max)),
        ]);
    }
    println!("{table}");
}

pub fn print_durability(outcomes: &[DurabilityOutcome]) {
    if outcomes.is_empty() {
        return;
    }
    heading("Write durability");
    let mut table = new_table();
    table.set_header(vec!["Collection", "Mode", "Batch", "Level", "Result", "Latency (s)"]);
    for o in outcomes {
        let result = match o.error_kind {
            None => Cell::new("ok").fg(Color::Green),
            Some(WriteErrorKind::Timeout) => Cell::new("timeout").fg(Color::Yellow),
            Some(kind) => Cell::new(format!("FAILED ({})", kind)).fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(&o.collection),
            Cell::new(match o.mode {
                WriteMode::Single => "single",
                WriteMode::Batch => "batch",
            }),
            Cell::new(o.batch_size),
            Cell::new(o.level),
            result,
            Cell::new(format_secs(o.latency)),
        ]);
    }
    println!("{table}");

    for o in outcomes.iter().filter(|o| !o.success) {
        if let Some(error) = &o.error {
            println!("  {} {}", o.level.to_string().dimmed(), error.red());
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// CSV export
// ────────────────────────────────────────────────────────────────────────────────

/// One row per query scenario.
pub fn export_csv(report: &RunReport, path: &Path) -> BenchResult<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "pipeline",
        "collection",
        "page_size",
        "skip",
        "date_window_days",
        "indexed",
        "status",
        "result_count",
        "iterations",
        "mean_secs",
        "min_secs",
        "max_secs",
        "p99_secs",
        "error",
    ])?;

    for r in &report.scenarios {
        let indexed = r.indexed.map(|i| i.to_string()).unwrap_or_default();
        let mut row = vec![
            r.pipeline.clone(),
            r.collection.clone(),
            r.params.page_size.to_string(),
            r.params.skip.to_string(),
            r.params.date_window_days.to_string(),
            indexed,
        ];
        match &r.outcome {
            ScenarioOutcome::Succeeded {
                timings,
                result_count,
            } => row.extend([
                "succeeded".to_string(),
                result_count.to_string(),
                timings.samples.to_string(),
                format!("{:.6}", timings.mean.as_secs_f64()),
                format!("{:.6}", timings.min.as_secs_f64()),
                format!("{:.6}", timings.max.as_secs_f64()),
                format!("{:.6}", timings.p99.as_secs_f64()),
                String::new(),
            ]),
            ScenarioOutcome::Failed {
                error,
                completed_iterations,
            } => row.extend([
                "failed".to_string(),
                String::new(),
                completed_iterations.to_string(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                error.clone(),
            ]),
        }
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    println!("  CSV exported to {}", path.display());
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────────
// JSON export
// ────────────────────────────────────────────────────────────────────────────────

pub fn export_json(report: &RunReport, path: &Path) -> BenchResult<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    println!("  JSON exported to {}", path.display());
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────────
// Formatting helpers
// ────────────────────────────────────────────────────────────────────────────────

fn format_secs(d: Duration) -> String {
    format!("{:.4}", d.as_secs_f64())
}

fn format_throughput(t: f64) -> String {
    if t >= 1_000_000.0 {
        format!("{:.2}M", t / 1_000_000.0)
    } else if t >= 1_000.0 {
        format!("{:.1}K", t / 1_000.0)
    } else {
        format!("{:.0}", t)
    }
}

fn format_count(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TimingSummary;
    use crate::workloads::QueryParams;

    fn scenario(pipeline: &str, skip: u64, outcome: ScenarioOutcome) -> ScenarioResult {
        ScenarioResult {
            pipeline: pipeline.to_string(),
            collection: "products".to_string(),
            params: QueryParams::page(10).with_skip(skip),
            indexed: Some(false),
            outcome,
        }
    }

    fn sample_report() -> RunReport {
        let mut report = RunReport::new(BenchConfig::default());
        report.scenarios = vec![
            scenario(
                "pagination",
                0,
                ScenarioOutcome::Succeeded {
                    timings: TimingSummary::from_samples(&[Duration::from_millis(4)]),
                    result_count: 10,
                },
            ),
            scenario(
                "pagination",
                100,
                ScenarioOutcome::Failed {
                    error: "query error: cursor killed".to_string(),
                    completed_iterations: 0,
                },
            ),
        ];
        report
    }

    #[test]
    fn test_csv_marks_failed_scenarios() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenarios.csv");
        export_csv(&sample_report(), &path).unwrap();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let headers = rdr.headers().unwrap().clone();
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        let status = headers.iter().position(|h| h == "status").unwrap();
        let error = headers.iter().position(|h| h == "error").unwrap();
        assert_eq!(&rows[0][status], "succeeded");
        assert_eq!(&rows[0][headers.iter().position(|h| h == "mean_secs").unwrap()], "0.004000");
        assert_eq!(&rows[1][status], "failed");
        assert_eq!(&rows[1][error], "query error: cursor killed");
    }

    #[test]
    fn test_json_export_contains_every_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        export_json(&sample_report(), &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        for key in ["system_info", "config", "loads", "indexes", "scenarios", "durability"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["scenarios"][1]["outcome"]["status"], "failed");
        assert_eq!(value["scenarios"][0]["outcome"]["timings"]["mean"], 0.004);
    }

    #[test]
    fn test_failed_scenario_count() {
        assert_eq!(sample_report().failed_scenarios(), 1);
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_count(1_500), "1.5K");
        assert_eq!(format_throughput(2_500_000.0), "2.50M");
        assert_eq!(format_secs(Duration::from_micros(12_345)), "0.0123");
    }
}
