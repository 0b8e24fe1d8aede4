//! Run configuration.
//!
//! Every field has a default, so a config file only lists what it changes.
//! Files are parsed by extension: `.toml` or `.yaml` / `.yml`.

use crate::adapters::MemoryStoreConfig;
use crate::durability::{DurabilityBenchmark, DurabilityLevel};
use crate::loader::LoaderConfig;
use crate::workloads::QueryMatrix;
use crate::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Store endpoint handed to every component that opens a session.
    pub endpoint: String,
    /// Products to load.
    pub total_records: usize,
    pub batch_size: usize,
    pub order_records: usize,
    pub order_batch_size: usize,
    /// Loader workers; unset means one per available processing unit.
    pub worker_count: Option<usize>,
    pub page_sizes: Vec<u64>,
    pub skip_offsets: Vec<u64>,
    pub date_windows_days: Vec<u32>,
    /// Repetitions of every query scenario.
    pub iterations: u32,
    pub durability_levels: Vec<DurabilityLevel>,
    pub durability_batch_sizes: Vec<usize>,
    pub seed: u64,
    /// Behaviour of `memory://` endpoints.
    pub memory: MemorySettings,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            endpoint: "memory://local".to_string(),
            total_records: 1_000_000,
            batch_size: 5_000,
            order_records: 500_000,
            order_batch_size: 1_000,
            worker_count: None,
            page_sizes: vec![10, 50, 100, 500, 1_000],
            skip_offsets: vec![0, 10_000, 50_000, 100_000],
            date_windows_days: vec![30],
            iterations: 5,
            durability_levels: vec![
                DurabilityLevel::nodes(1, 5_000),
                DurabilityLevel::nodes(2, 5_000),
                DurabilityLevel::majority(5_000),
            ],
            durability_batch_sizes: vec![100, 500, 1_000],
            seed: 42,
            memory: MemorySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub replica_count: u32,
    pub replication_lag_ms: u64,
    pub scan_cost_ns: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            replica_count: 3,
            replication_lag_ms: 0,
            scan_cost_ns: 0,
        }
    }
}

impl BenchConfig {
    /// Load from a `.toml`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> BenchResult<Self> {
        let content = fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("toml") => Self::from_toml_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Err(BenchError::Config(format!(
                "unsupported config format: {}",
                path.display()
            ))),
        }
    }

    pub fn from_toml_str(content: &str) -> BenchResult<Self> {
        toml::from_str(content).map_err(|e| BenchError::Config(format!("invalid TOML config: {}", e)))
    }

    pub fn from_yaml_str(content: &str) -> BenchResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| BenchError::Config(format!("invalid YAML config: {}", e)))
    }

    pub fn validate(&self) -> BenchResult<()> {
        let fail = |msg: &str| Err(BenchError::Config(msg.to_string()));
        if self.endpoint.trim().is_empty() {
            return fail("endpoint must not be empty");
        }
        if self.batch_size == 0 || self.order_batch_size == 0 {
            return fail("batch sizes must be positive");
        }
        if self.worker_count == Some(0) {
            return fail("worker_count must be positive");
        }
        if self.iterations == 0 {
            return fail("iterations must be positive");
        }
        if self.page_sizes.is_empty() || self.page_sizes.contains(&0) {
            return fail("page_sizes must be a non-empty list of positive sizes");
        }
        if self.skip_offsets.is_empty() {
            return fail("skip_offsets must not be empty");
        }
        if self.date_windows_days.is_empty() {
            return fail("date_windows_days must not be empty");
        }
        if self.durability_batch_sizes.contains(&0) {
            return fail("durability_batch_sizes must be positive");
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(num_cpus::get)
    }

    pub fn product_loader(&self) -> LoaderConfig {
        LoaderConfig {
            total_records: self.total_records,
            batch_size: self.batch_size,
            worker_count: self.worker_count(),
            seed: self.seed,
            endpoint: self.endpoint.clone(),
            durability: DurabilityLevel::default(),
        }
    }

    pub fn order_loader(&self) -> LoaderConfig {
        LoaderConfig {
            total_records: self.order_records,
            batch_size: self.order_batch_size,
            ..self.product_loader()
        }
    }

    pub fn query_matrix(&self) -> QueryMatrix {
        QueryMatrix {
            page_sizes: self.page_sizes.clone(),
            skip_offsets: self.skip_offsets.clone(),
            date_windows_days: self.date_windows_days.clone(),
        }
    }

    pub fn durability_benchmark(&self) -> DurabilityBenchmark {
        DurabilityBenchmark {
            levels: self.durability_levels.clone(),
            batch_sizes: self.durability_batch_sizes.clone(),
            seed: self.seed,
        }
    }

    pub fn memory_store(&self) -> MemoryStoreConfig {
        MemoryStoreConfig {
            replica_count: self.memory.replica_count,
            replication_lag: Duration::from_millis(self.memory.replication_lag_ms),
            scan_cost_per_document: Duration::from_nanos(self.memory.scan_cost_ns),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durability::Acknowledgment;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = BenchConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.page_sizes, vec![10, 50, 100, 500, 1_000]);
        assert_eq!(cfg.durability_levels[2].w, Acknowledgment::Majority);
        assert!(cfg.worker_count() >= 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = BenchConfig::from_toml_str(
            r#"
            total_records = 10000
            batch_size = 1000
            worker_count = 4
            durability_levels = [{ w = 0 }, { w = "majority", wtimeout_ms = 100 }]

            [memory]
            replication_lag_ms = 25
            "#,
        )
        .unwrap();
        assert_eq!(cfg.total_records, 10_000);
        assert_eq!(cfg.worker_count(), 4);
        assert_eq!(cfg.order_records, 500_000);
        assert_eq!(cfg.durability_levels[0], DurabilityLevel::unacknowledged());
        assert_eq!(cfg.memory.replica_count, 3);
        assert_eq!(cfg.memory_store().replication_lag, Duration::from_millis(25));

        let orders = cfg.order_loader();
        assert_eq!(orders.total_records, 500_000);
        assert_eq!(orders.worker_count, 4);
    }

    #[test]
    fn test_load_dispatches_on_extension() {
        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(yaml, "endpoint: memory://yaml\npage_sizes: [5, 15]\niterations: 2").unwrap();
        let cfg = BenchConfig::load(yaml.path()).unwrap();
        assert_eq!(cfg.endpoint, "memory://yaml");
        assert_eq!(cfg.query_matrix().page_sizes, vec![5, 15]);

        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(json, "{{}}").unwrap();
        assert!(matches!(BenchConfig::load(json.path()), Err(BenchError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_degenerate_values() {
        let bad = [
            BenchConfig {
                batch_size: 0,
                ..BenchConfig::default()
            },
            BenchConfig {
                page_sizes: vec![],
                ..BenchConfig::default()
            },
            BenchConfig {
                page_sizes: vec![10, 0],
                ..BenchConfig::default()
            },
            BenchConfig {
                worker_count: Some(0),
                ..BenchConfig::default()
            },
            BenchConfig {
                iterations: 0,
                ..BenchConfig::default()
            },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(BenchError::Config(_))));
        }
    }
}
