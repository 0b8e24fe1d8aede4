//! Query benchmark runner.
//!
//! Scenarios run one at a time on a single session so each measurement is
//! uncontended. The timer covers the query-issuing call plus full
//! materialization of its cursor. A failing scenario is recorded and the
//! matrix moves on.

use crate::indexes::IndexReport;
use crate::metrics::{LatencyRecorder, TimingSummary};
use crate::model::Document;
use crate::store::Session;
use crate::workloads::{
    Pipeline, QueryMatrix, QueryParams, QueryPlan, ResultCount, COUNT_FIELD, FACET_COUNT,
};
use crate::{BenchResult, CancelToken};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Succeeded {
        timings: TimingSummary,
        result_count: u64,
    },
    Failed {
        error: String,
        completed_iterations: u32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub pipeline: String,
    pub collection: String,
    pub params: QueryParams,
    /// Whether the pipeline's access field is backed by an applied index;
    /// `None` when index state is unknown.
    pub indexed: Option<bool>,
    pub outcome: ScenarioOutcome,
}

impl ScenarioResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, ScenarioOutcome::Succeeded { .. })
    }

    pub fn timings(&self) -> Option<&TimingSummary> {
        match &self.outcome {
            ScenarioOutcome::Succeeded { timings, .. } => Some(timings),
            ScenarioOutcome::Failed { .. } => None,
        }
    }

    pub fn result_count(&self) -> Option<u64> {
        match &self.outcome {
            ScenarioOutcome::Succeeded { result_count, .. } => Some(*result_count),
            ScenarioOutcome::Failed { .. } => None,
        }
    }
}

pub struct QueryRunner {
    session: Box<dyn Session>,
    iterations: u32,
    now: DateTime<Utc>,
}

impl QueryRunner {
    pub fn new(session: Box<dyn Session>, iterations: u32) -> Self {
        Self {
            session,
            iterations: iterations.max(1),
            now: Utc::now(),
        }
    }

    /// Anchor date-window filters at `now` instead of the construction time.
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Run one (pipeline, parameters) point `iterations` times.
    pub fn run(&mut self, pipeline: &Pipeline, params: &QueryParams) -> ScenarioResult {
        let plan = pipeline.plan(params, self.now);
        let mut rec = LatencyRecorder::new();
        let mut result_count = 0;

        for done in 0..self.iterations {
            let t = rec.start();
            match execute(self.session.as_mut(), &plan) {
                Ok((_, n)) => {
                    rec.record(t);
                    result_count = n;
                }
                Err(e) => {
                    warn!(pipeline = %pipeline.name(), %params, error = %e, "scenario failed");
                    return self.result(
                        pipeline,
                        params,
                        ScenarioOutcome::Failed {
                            error: e.to_string(),
                            completed_iterations: done,
                        },
                    );
                }
            }
        }

        let timings = rec.summary();
        debug!(
            pipeline = %pipeline.name(),
            %params,
            mean_ms = timings.mean.as_secs_f64() * 1e3,
            result_count,
            "scenario measured"
        );
        self.result(
            pipeline,
            params,
            ScenarioOutcome::Succeeded {
                timings,
                result_count,
            },
        )
    }

    /// Documents one execution returns, untimed.
    pub fn fetch(&mut self, pipeline: &Pipeline, params: &QueryParams) -> BenchResult<Vec<Document>> {
        let plan = pipeline.plan(params, self.now);
        execute(self.session.as_mut(), &plan).map(|(docs, _)| docs)
    }

    /// Every pipeline across its parameter matrix, stopping between
    /// scenarios when cancelled.
    pub fn run_matrix(
        &mut self,
        catalog: &[Pipeline],
        matrix: &QueryMatrix,
        indexes: Option<&IndexReport>,
        cancel: &CancelToken,
    ) -> Vec<ScenarioResult> {
        let mut results = Vec::new();
        for pipeline in catalog {
            let indexed = indexes.map(|report| {
                pipeline
                    .access_field()
                    .map_or(false, |f| report.is_indexed(pipeline.collection(), f))
            });
            for params in matrix.params_for(pipeline) {
                if cancel.is_cancelled() {
                    info!(completed = results.len(), "query matrix cancelled");
                    return results;
                }
                let mut result = self.run(pipeline, &params);
                result.indexed = indexed;
                results.push(result);
            }
            info!(pipeline = %pipeline.name(), "pipeline complete");
        }
        results
    }

    fn result(&self, pipeline: &Pipeline, params: &QueryParams, outcome: ScenarioOutcome) -> ScenarioResult {
        ScenarioResult {
            pipeline: pipeline.name(),
            collection: pipeline.collection().to_string(),
            params: *params,
            indexed: None,
            outcome,
        }
    }
}

fn execute(session: &mut dyn Session, plan: &QueryPlan) -> BenchResult<(Vec<Document>, u64)> {
    match plan {
        QueryPlan::Find {
            collection,
            options,
        } => {
            let docs = session.find(collection, options)?.materialize()?;
            let n = docs.len() as u64;
            Ok((docs, n))
        }
        QueryPlan::Aggregate {
            collection,
            stages,
            count,
        } => {
            let docs = session.aggregate(collection, stages)?.materialize()?;
            let n = match count {
                ResultCount::Documents => docs.len() as u64,
                ResultCount::Facet => facet_total(&docs),
            };
            Ok((docs, n))
        }
    }
}

fn facet_total(docs: &[Document]) -> u64 {
    docs.first()
        .and_then(|d| d.get(FACET_COUNT))
        .and_then(Value::as_array)
        .and_then(|counts| counts.first())
        .and_then(|c| c.get(COUNT_FIELD))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

// ────────────────────────────────────────────────────────────────────────────────
// Pagination analysis
// ────────────────────────────────────────────────────────────────────────────────

/// Mean latency per skip offset for one pipeline and page size, by ascending skip.
pub fn pagination_trend(results: &[ScenarioResult], pipeline: &str, page_size: u64) -> Vec<(u64, Duration)> {
    let mut trend: Vec<(u64, Duration)> = results
        .iter()
        .filter(|r| r.pipeline == pipeline && r.params.page_size == page_size)
        .filter_map(|r| r.timings().map(|t| (r.params.skip, t.mean)))
        .collect();
    trend.sort_by_key(|(skip, _)| *skip);
    trend
}

#[derive(Debug, Clone, Serialize)]
pub struct PageSizeSummary {
    pub page_size: u64,
    pub timings: TimingSummary,
}

/// Per page size, timings across every skip offset and iteration.
pub fn summarize_by_page_size(results: &[ScenarioResult], pipeline: &str) -> Vec<PageSizeSummary> {
    let mut by_page: BTreeMap<u64, Vec<TimingSummary>> = BTreeMap::new();
    for r in results.iter().filter(|r| r.pipeline == pipeline) {
        if let Some(t) = r.timings() {
            by_page.entry(r.params.page_size).or_default().push(*t);
        }
    }
    by_page
        .into_iter()
        .map(|(page_size, parts)| PageSizeSummary {
            page_size,
            timings: TimingSummary::combine(&parts),
        })
        .collect()
}
