use clap::{Parser, Subcommand, ValueEnum};
use dfbench::config::BenchConfig;
use dfbench::engine::ExecutionMode;
use dfbench::errors::BenchError;
use dfbench::harness::{AggregationMode, FailurePolicy};
use dfbench::io::{DataLayout, FileFormat};
use dfbench::report::Metric;
use dfbench::timing::GnuTimeBackend;
use dfbench::{generate, harness, report, runner};
use miette::{IntoDiagnostic, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Clone, ValueEnum, Debug)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "dfbench")]
#[command(version = "0.1.0")]
#[command(about = "Benchmark dataframe processing variants", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Directory holding the synthetic tables
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Increase logging verbosity (Info -> Debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Silence all logs
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format (text or json)
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the synthetic data tables and the lookup table
    Generate {
        #[arg(long)]
        tables: Option<usize>,

        #[arg(long)]
        rows: Option<usize>,

        /// Seed for reproducible data
        #[arg(long)]
        seed: Option<u64>,

        /// Also write a manifest with file hashes
        #[arg(long)]
        manifest: bool,
    },
    /// Run one polars processing variant and print the means
    Process {
        #[arg(long, value_enum)]
        mode: ExecutionMode,

        #[arg(long, value_enum)]
        format: FileFormat,

        /// Print the outcome as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Time every variant program and write the results table
    Time {
        /// Directory searched for variant programs
        #[arg(long, value_name = "DIR")]
        project_root: Option<PathBuf>,

        /// Trials per variant
        #[arg(long)]
        repeat: Option<usize>,

        #[arg(long, value_enum)]
        aggregation: Option<AggregationMode>,

        #[arg(long, value_enum)]
        on_failure: Option<FailurePolicy>,

        /// Only time variants whose identifier matches this regex
        #[arg(long, value_name = "REGEX")]
        filter: Option<String>,

        /// Skip this binary's own polars variants
        #[arg(long)]
        no_builtin: bool,

        /// Results CSV to write
        #[arg(long, value_name = "FILE")]
        results: Option<PathBuf>,
    },
    /// Draw one bar chart per variant axis from a results table
    Plot {
        /// Results CSV to read
        #[arg(long, value_name = "FILE")]
        results: Option<PathBuf>,

        /// Output directory (repeatable)
        #[arg(long = "output-dir", value_name = "DIR")]
        output_dirs: Vec<PathBuf>,

        #[arg(long, value_enum)]
        metric: Option<Metric>,
    },
}

fn load_config(cli: &Cli) -> Result<BenchConfig> {
    let mut config = match &cli.config {
        Some(path) => BenchConfig::from_path(path)?,
        None => BenchConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data.dir = dir.clone();
    }
    Ok(config)
}

/// Command line that makes a child process run a built-in variant against
/// the same data and configuration as this process.
fn builtin_command(cli: &Cli, config: &BenchConfig) -> Result<Vec<OsString>> {
    let exe = std::env::current_exe().into_diagnostic()?;
    let mut command = vec![exe.into_os_string(), "--quiet".into()];
    if let Some(path) = &cli.config {
        command.push("--config".into());
        command.push(path.clone().into_os_string());
    }
    command.push("--data-dir".into());
    command.push(config.data.dir.clone().into_os_string());
    Ok(command)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        Level::ERROR
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // DFBENCH_LOG > CLI args
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var("DFBENCH_LOG")
        .from_env_lossy();

    let run_id = Uuid::new_v4();

    // Logs go to stderr; stdout carries the variant output.
    match cli.log_format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .json()
                .with_span_list(false)
                .with_current_span(false)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    let _span = tracing::info_span!("root", run_id = %run_id).entered();

    let mut config = load_config(&cli)?;

    match &cli.command {
        Commands::Generate {
            tables,
            rows,
            seed,
            manifest,
        } => {
            if let Some(tables) = tables {
                config.data.tables = *tables;
            }
            if let Some(rows) = rows {
                config.data.rows = *rows;
            }
            if seed.is_some() {
                config.data.seed = *seed;
            }
            config.data.manifest |= *manifest;
            config.validate()?;

            let summary = generate::generate_dataset(&config.data, &config.pipeline.lookup_key)?;
            info!("Wrote {} files to {:?}", summary.files.len(), summary.dir);
        }
        Commands::Process { mode, format, json } => {
            config.validate()?;
            let layout = DataLayout::new(&config.data.dir);
            let outcome = runner::run_variant(&layout, *mode, *format, &config.pipeline)?;
            if *json {
                let text = serde_json::to_string_pretty(&outcome)
                    .map_err(|e| BenchError::Unknown(e.into()))?;
                println!("{}", text);
            } else {
                print!("{}", runner::format_means(&outcome));
            }
        }
        Commands::Time {
            project_root,
            repeat,
            aggregation,
            on_failure,
            filter,
            no_builtin,
            results,
        } => {
            let h = &mut config.harness;
            if let Some(root) = project_root {
                h.project_root = root.clone();
            }
            if let Some(repeat) = repeat {
                h.repeat = *repeat;
            }
            if let Some(aggregation) = aggregation {
                h.aggregation = *aggregation;
            }
            if let Some(on_failure) = on_failure {
                h.on_failure = *on_failure;
            }
            if filter.is_some() {
                h.filter = filter.clone();
            }
            if *no_builtin {
                h.include_builtin = false;
            }
            if let Some(results) = results {
                h.results_path = results.clone();
            }
            config.validate()?;

            let backend = GnuTimeBackend::new(&config.harness.time_bin);
            let command = builtin_command(&cli, &config)?;
            harness::run_benchmark(&config.harness, backend, command, run_id)?;
        }
        Commands::Plot {
            results,
            output_dirs,
            metric,
        } => {
            if results.is_some() {
                config.plot.results_path = results.clone();
            }
            if !output_dirs.is_empty() {
                config.plot.output_dirs = output_dirs.clone();
            }
            if let Some(metric) = metric {
                config.plot.metric = *metric;
            }

            let rows = report::load_results(config.plot_results_path(), config.plot.metric)?;
            let written = report::plot_results(
                &rows,
                &config.plot.output_dirs,
                (config.plot.width, config.plot.height),
            )?;
            info!("Wrote {} charts", written.len());
        }
    }

    Ok(())
}
