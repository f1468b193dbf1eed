use miette::{Diagnostic, SourceSpan};
use std::path::PathBuf;
use thiserror::Error;

use crate::timing::TimeReportError;

#[derive(Error, Diagnostic, Debug)]
pub enum BenchError {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code("DFBENCH-001"),
        help("Please check your dfbench.yaml syntax and structure.")
    )]
    ConfigError(#[source] serde_yaml::Error, #[label("here")] Option<SourceSpan>),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code("DFBENCH-002"),
        help("Adjust the value in the config file or on the command line.")
    )]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code("DFBENCH-003"), help("Check file paths and permissions."))]
    IoError(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    #[diagnostic(
        code("DFBENCH-004"),
        help("An error occurred within the data processing engine.")
    )]
    PolarsError(#[from] polars::error::PolarsError),

    #[error("No {format} tables found in {dir:?}")]
    #[diagnostic(
        code("DFBENCH-005"),
        help("Run `dfbench generate` first or point --data-dir at the generated data.")
    )]
    NoTables { dir: PathBuf, format: String },

    #[error("Variant {variant} failed on trial {trial}: {detail}")]
    #[diagnostic(
        code("DFBENCH-006"),
        help("Run the variant by hand to see its full output.")
    )]
    ProcessFailed {
        variant: String,
        trial: usize,
        detail: String,
    },

    #[error("Warm-up build of {variant} failed: {detail}")]
    #[diagnostic(
        code("DFBENCH-007"),
        help("The variant must build offline (`cargo build --release --frozen`).")
    )]
    WarmupFailed { variant: String, detail: String },

    #[error("Could not read timing report of {variant} on trial {trial}: {source}")]
    #[diagnostic(
        code("DFBENCH-008"),
        help("The timing utility must be GNU time printing its default report format.")
    )]
    TimingParse {
        variant: String,
        trial: usize,
        #[source]
        source: TimeReportError,
    },

    #[error("Invalid variant identifier: {0}")]
    #[diagnostic(
        code("DFBENCH-009"),
        help("Variant directories are named like s02_rust_polars_lazy_csv.")
    )]
    InvalidVariant(String),

    #[error("Plotting failed: {0}")]
    #[diagnostic(code("DFBENCH-010"), help("Check the results file."))]
    Plot(String),

    #[error(transparent)]
    #[diagnostic(code("DFBENCH-000"))]
    Unknown(#[from] anyhow::Error),
}

pub type BenchResult<T> = Result<T, BenchError>;
