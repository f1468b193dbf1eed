use crate::config::PipelineConfig;
use crate::engine::{EagerStrategy, ExecutionMode, ExecutionStrategy, LazyStrategy};
use crate::errors::{BenchError, BenchResult};
use crate::io::{DataLayout, FileFormat};
use crate::observability::Metrics;
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMean {
    pub column: String,
    pub mean: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PipelineOutcome {
    pub mode: ExecutionMode,
    pub format: FileFormat,
    pub tables: usize,
    pub groups: usize,
    pub means: Vec<ColumnMean>,
    #[serde(skip)]
    pub group_means: DataFrame,
    pub metrics: Metrics,
}

impl PipelineOutcome {
    pub fn mean_of(&self, column: &str) -> Option<f64> {
        self.means
            .iter()
            .find(|m| m.column == column)
            .and_then(|m| m.mean)
    }
}

/// Mean across groups of every group-mean column.
pub fn mean_of_means(group_means: &DataFrame, by: &str) -> BenchResult<Vec<ColumnMean>> {
    let summary = group_means
        .clone()
        .lazy()
        .select([all().exclude([by]).mean()])
        .collect()?;

    summary
        .get_columns()
        .iter()
        .map(|column| -> BenchResult<ColumnMean> {
            let values = column.cast(&DataType::Float64)?;
            Ok(ColumnMean {
                column: column.name().to_string(),
                mean: values.f64()?.get(0),
            })
        })
        .collect()
}

/// Run the load, concatenate, join, drop-key, group-mean and mean-of-means
/// steps over every table of `format` in `layout`.
pub fn run_pipeline<S: ExecutionStrategy>(
    strategy: &S,
    layout: &DataLayout,
    format: FileFormat,
    config: &PipelineConfig,
) -> BenchResult<PipelineOutcome> {
    let group_column = config.group_column();
    let mut metrics = Metrics::new();

    let lookup_path = layout.lookup_path(format);
    debug!("Loading lookup table {:?}", lookup_path);
    let lookup = metrics.time_step("load_lookup", || strategy.load(&lookup_path, format))?;

    let table_paths = layout.list_tables(format)?;
    info!(
        "Processing {} {} tables ({} mode)",
        table_paths.len(),
        format,
        strategy.mode()
    );
    let tables = metrics.time_step("load_tables", || {
        table_paths
            .iter()
            .map(|path| {
                strategy
                    .load_columns(path, format, &config.columns)
                    .map_err(|e| {
                        tracing::error!("Failed to load {:?}: {}", path, e);
                        e
                    })
            })
            .collect::<BenchResult<Vec<_>>>()
    })?;

    let combined = metrics.time_step("concat", || strategy.concat(tables))?;
    let joined = metrics.time_step("left_join", || {
        strategy.left_join(combined, lookup, group_column, &config.lookup_key)
    })?;
    let joined = metrics.time_step("drop_key", || {
        strategy.drop_column(joined, &config.lookup_key)
    })?;
    let grouped = metrics.time_step("group_mean", || strategy.group_mean(joined, group_column))?;
    let group_means = metrics.time_step("materialize", || strategy.materialize(grouped))?;
    let means = metrics.time_step("mean_of_means", || mean_of_means(&group_means, group_column))?;

    debug!(
        "Pipeline finished in {:.3}s",
        metrics.total_duration().as_secs_f64()
    );

    Ok(PipelineOutcome {
        mode: strategy.mode(),
        format,
        tables: table_paths.len(),
        groups: group_means.height(),
        means,
        group_means,
        metrics,
    })
}

/// Run one built-in variant, picking the strategy for `mode`.
pub fn run_variant(
    layout: &DataLayout,
    mode: ExecutionMode,
    format: FileFormat,
    config: &PipelineConfig,
) -> BenchResult<PipelineOutcome> {
    if !layout.dir().is_dir() {
        return Err(BenchError::NoTables {
            dir: layout.dir().to_path_buf(),
            format: format.to_string(),
        });
    }
    match mode {
        ExecutionMode::Eager => run_pipeline(&EagerStrategy, layout, format, config),
        ExecutionMode::Lazy => run_pipeline(&LazyStrategy, layout, format, config),
    }
}

/// Console rendering of the final means, one column per line.
pub fn format_means(outcome: &PipelineOutcome) -> String {
    let mut out = String::from("means\n");
    for ColumnMean { column, mean } in &outcome.means {
        match mean {
            Some(value) => out.push_str(&format!("{:<8} {}\n", column, value)),
            None => out.push_str(&format!("{:<8} null\n", column)),
        }
    }
    out
}
