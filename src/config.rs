//! Run configuration.
//!
//! Every constant the benchmark depends on (table shapes, directories, trial
//! counts, aggregation policy) lives here and is handed to each component
//! explicitly. Values come from an optional YAML file and can be overridden
//! from the command line.

use crate::errors::{BenchError, BenchResult};
use crate::harness::{AggregationMode, FailurePolicy};
use crate::report::Metric;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest column count that still gets single-letter column names.
pub const MAX_COLUMNS: usize = 26;
/// Largest alphabet the letter mapping covers.
pub const MAX_ALPHABET: usize = 26;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BenchConfig {
    pub data: DataConfig,
    pub pipeline: PipelineConfig,
    pub harness: HarnessConfig,
    pub plot: PlotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    pub dir: PathBuf,
    pub tables: usize,
    pub rows: usize,
    pub columns: usize,
    pub alphabet: usize,
    pub lookup_columns: usize,
    pub seed: Option<u64>,
    pub manifest: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            tables: 100,
            rows: 100_000,
            columns: 20,
            alphabet: 26,
            lookup_columns: 3,
            seed: None,
            manifest: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("data")
        .join("s01_synthetic_data")
}

/// Column selection and join keys of the processing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Columns read from every data table; the first one is the grouping and
    /// join column.
    pub columns: Vec<String>,
    pub lookup_key: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            columns: vec!["A".to_string(), "I".to_string(), "P".to_string()],
            lookup_key: "key".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn group_column(&self) -> &str {
        self.columns.first().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    pub project_root: PathBuf,
    pub repeat: usize,
    pub time_bin: PathBuf,
    pub python: String,
    pub cargo: String,
    pub markers: Vec<MarkerRule>,
    pub filter: Option<String>,
    pub include_builtin: bool,
    pub warmup: bool,
    pub aggregation: AggregationMode,
    pub on_failure: FailurePolicy,
    pub results_path: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            repeat: 50,
            time_bin: PathBuf::from("/usr/bin/time"),
            python: "python".to_string(),
            cargo: "cargo".to_string(),
            markers: vec![
                MarkerRule {
                    file_name: "process_data.py".to_string(),
                    launcher: LauncherKind::Interpreter,
                },
                MarkerRule {
                    file_name: "Cargo.toml".to_string(),
                    launcher: LauncherKind::Cargo,
                },
            ],
            filter: None,
            include_builtin: true,
            warmup: true,
            aggregation: AggregationMode::default(),
            on_failure: FailurePolicy::default(),
            results_path: PathBuf::from("results").join("min_times_df.csv"),
        }
    }
}

/// A file whose presence marks its directory as a runnable variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarkerRule {
    pub file_name: String,
    pub launcher: LauncherKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    /// Run the marker file through the configured interpreter.
    Interpreter,
    /// Run the marker manifest through `cargo run --release --frozen`.
    Cargo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlotConfig {
    /// Results table to plot; defaults to the harness output.
    pub results_path: Option<PathBuf>,
    pub output_dirs: Vec<PathBuf>,
    pub metric: Metric,
    pub width: u32,
    pub height: u32,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            results_path: None,
            output_dirs: vec![PathBuf::from("results"), PathBuf::from("notebook").join("img")],
            metric: Metric::default(),
            width: 640,
            height: 480,
        }
    }
}

impl BenchConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> BenchResult<Self> {
        serde_yaml::from_str(text).map_err(|e| BenchError::ConfigError(e, None))
    }

    pub fn plot_results_path(&self) -> &Path {
        self.plot
            .results_path
            .as_deref()
            .unwrap_or(self.harness.results_path.as_path())
    }

    pub fn validate(&self) -> BenchResult<()> {
        let data = &self.data;
        if data.columns < 4 || data.columns % 2 != 0 || data.columns > MAX_COLUMNS {
            return Err(BenchError::InvalidConfig(format!(
                "data.columns must be an even number between 4 and {}, got {}",
                MAX_COLUMNS, data.columns
            )));
        }
        if data.alphabet == 0 || data.alphabet > MAX_ALPHABET {
            return Err(BenchError::InvalidConfig(format!(
                "data.alphabet must be between 1 and {}, got {}",
                MAX_ALPHABET, data.alphabet
            )));
        }
        for (name, value) in [
            ("data.rows", data.rows),
            ("data.tables", data.tables),
            ("data.lookup_columns", data.lookup_columns),
            ("harness.repeat", self.harness.repeat),
        ] {
            if value == 0 {
                return Err(BenchError::InvalidConfig(format!(
                    "{} must be at least 1",
                    name
                )));
            }
        }
        if self.pipeline.columns.len() < 2 {
            return Err(BenchError::InvalidConfig(
                "pipeline.columns needs the grouping column and at least one value column"
                    .to_string(),
            ));
        }
        if let Some(pattern) = &self.harness.filter {
            regex::Regex::new(pattern).map_err(|e| {
                BenchError::InvalidConfig(format!("harness.filter is not a valid regex: {}", e))
            })?;
        }
        Ok(())
    }
}
