//! Benchmark harness: run every variant program `repeat` times under a
//! [`TimingBackend`], reduce the trials to one row per variant and write the
//! results table.

use crate::config::HarnessConfig;
use crate::discover::{self, Launchers, VariantProgram};
use crate::errors::{BenchError, BenchResult};
use crate::io;
use crate::observability::RunManifest;
use crate::timing::{TimingBackend, TimingSample, TrialError};
use chrono::Utc;
use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use polars::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const VARIANT_COLUMN: &str = "variant_id";
pub const USER_COLUMN: &str = "user_time";
pub const SYSTEM_COLUMN: &str = "system_time";
pub const ELAPSED_COLUMN: &str = "elapsed_time";
pub const USER_SYSTEM_COLUMN: &str = "user_plus_system_time";

const TIME_COLUMNS: [&str; 4] = [USER_COLUMN, SYSTEM_COLUMN, ELAPSED_COLUMN, USER_SYSTEM_COLUMN];

/// How trials of one variant are reduced to a single row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Minimum of every timing column taken independently. The resulting row
    /// can combine values from different trials.
    #[default]
    PerColumnMin,
    /// The complete row of the trial with the smallest user+system time.
    FastestTrial,
}

/// What happens when a trial fails or its timing report is unreadable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the whole run with the failing variant and trial in the error.
    #[default]
    Abort,
    /// Record the variant with empty timings and move on to the next one.
    MarkMissing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialRecord {
    pub variant_id: String,
    pub trial: usize,
    /// `None` when the variant was marked missing.
    pub sample: Option<TimingSample>,
}

fn trial_failure(variant: &str, trial: usize, err: TrialError) -> BenchError {
    match err {
        TrialError::Report(source) => BenchError::TimingParse {
            variant: variant.to_string(),
            trial,
            source,
        },
        other => BenchError::ProcessFailed {
            variant: variant.to_string(),
            trial,
            detail: other.to_string(),
        },
    }
}

pub struct Harness<B: TimingBackend> {
    backend: B,
    launchers: Launchers,
    repeat: usize,
    on_failure: FailurePolicy,
    warmup: bool,
}

impl<B: TimingBackend> Harness<B> {
    pub fn new(backend: B, launchers: Launchers, config: &HarnessConfig) -> Self {
        Self {
            backend,
            launchers,
            repeat: config.repeat,
            on_failure: config.on_failure,
            warmup: config.warmup,
        }
    }

    fn warm_up(&self, program: &VariantProgram) -> BenchResult<()> {
        if let Some(cmd) = self.launchers.warmup(program) {
            info!("Warming up {}: {}", program.id, cmd.display());
            cmd.run_untimed().map_err(|e| BenchError::WarmupFailed {
                variant: program.id.clone(),
                detail: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Run all trials, one process at a time.
    pub fn run_trials(&self, programs: &[VariantProgram]) -> BenchResult<Vec<TrialRecord>> {
        let pb = ProgressBar::new((programs.len() * self.repeat) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
                .map_err(|e| BenchError::Unknown(e.into()))?
                .progress_chars("#>-"),
        );

        let mut records = Vec::with_capacity(programs.len() * self.repeat);
        'programs: for program in programs {
            pb.set_message(program.id.clone());

            if self.warmup {
                if let Err(e) = self.warm_up(program) {
                    match self.on_failure {
                        FailurePolicy::Abort => return Err(e),
                        FailurePolicy::MarkMissing => {
                            warn!("{}; marking {} as missing", e, program.id);
                            records.push(missing_record(program, 0));
                            pb.inc(self.repeat as u64);
                            continue 'programs;
                        }
                    }
                }
            }

            let command = self.launchers.command(program)?;
            for trial in 1..=self.repeat {
                match self.backend.time(&command) {
                    Ok(output) => {
                        debug!(
                            variant = %program.id,
                            trial,
                            user = output.sample.user,
                            system = output.sample.system,
                            elapsed = output.sample.elapsed,
                            "trial done"
                        );
                        debug!("{} stdout:\n{}", program.id, output.stdout);
                        records.push(TrialRecord {
                            variant_id: program.id.clone(),
                            trial,
                            sample: Some(output.sample),
                        });
                        pb.inc(1);
                    }
                    Err(err) => {
                        let err = trial_failure(&program.id, trial, err);
                        match self.on_failure {
                            FailurePolicy::Abort => {
                                pb.abandon();
                                return Err(err);
                            }
                            FailurePolicy::MarkMissing => {
                                warn!("{}; marking {} as missing", err, program.id);
                                records.retain(|r| r.variant_id != program.id);
                                records.push(missing_record(program, trial));
                                pb.inc((self.repeat - trial + 1) as u64);
                                continue 'programs;
                            }
                        }
                    }
                }
            }
        }
        pb.finish_with_message("all variants timed");
        Ok(records)
    }
}

fn missing_record(program: &VariantProgram, trial: usize) -> TrialRecord {
    TrialRecord {
        variant_id: program.id.clone(),
        trial,
        sample: None,
    }
}

/// One row per trial: `variant_id` plus the four timing columns.
pub fn trials_frame(records: &[TrialRecord]) -> BenchResult<DataFrame> {
    let ids: Vec<&str> = records.iter().map(|r| r.variant_id.as_str()).collect();
    let pick = |f: fn(&TimingSample) -> f64| -> Vec<Option<f64>> {
        records.iter().map(|r| r.sample.as_ref().map(f)).collect()
    };

    Ok(df! {
        VARIANT_COLUMN => ids,
        USER_COLUMN => pick(|s| s.user),
        SYSTEM_COLUMN => pick(|s| s.system),
        ELAPSED_COLUMN => pick(|s| s.elapsed),
        USER_SYSTEM_COLUMN => pick(TimingSample::user_plus_system),
    }?)
}

/// Reduce the trial table to one row per variant, sorted by variant.
pub fn aggregate(trials: DataFrame, mode: AggregationMode) -> BenchResult<DataFrame> {
    let lf = trials.lazy();
    let reduced = match mode {
        AggregationMode::PerColumnMin => lf
            .group_by([col(VARIANT_COLUMN)])
            .agg(TIME_COLUMNS.map(|c| col(c).min())),
        AggregationMode::FastestTrial => lf
            .sort(
                [USER_SYSTEM_COLUMN],
                SortMultipleOptions::default()
                    .with_nulls_last(true)
                    .with_maintain_order(true),
            )
            .group_by_stable([col(VARIANT_COLUMN)])
            .agg(TIME_COLUMNS.map(|c| col(c).first())),
    };
    Ok(reduced
        .sort([VARIANT_COLUMN], Default::default())
        .collect()?)
}

pub fn write_results<P: AsRef<Path>>(results: &mut DataFrame, path: P) -> BenchResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    io::write_csv(results, path)
}

/// Discover variants, time them, aggregate and write the results table and
/// its run manifest. Returns the aggregated table.
pub fn run_benchmark<B: TimingBackend>(
    config: &HarnessConfig,
    backend: B,
    builtin_command: Vec<std::ffi::OsString>,
    run_id: Uuid,
) -> BenchResult<DataFrame> {
    let started_at = Utc::now();
    let filter = config
        .filter
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| BenchError::InvalidConfig(format!("harness.filter: {}", e)))?;

    let mut programs =
        discover::discover_programs(&config.project_root, &config.markers, filter.as_ref())?;
    if config.include_builtin {
        programs.extend(discover::builtin_programs(filter.as_ref()));
    }
    if programs.is_empty() {
        return Err(BenchError::InvalidConfig(format!(
            "no variant programs found under {:?}",
            config.project_root
        )));
    }
    info!(
        "Timing {} variants x {} trials",
        programs.len(),
        config.repeat
    );

    let harness = Harness::new(
        backend,
        Launchers::from_config(config, builtin_command),
        config,
    );
    let records = harness.run_trials(&programs)?;
    let mut results = aggregate(trials_frame(&records)?, config.aggregation)?;
    info!("Results:\n{}", results);

    write_results(&mut results, &config.results_path)?;
    info!("Results written to {:?}", config.results_path);

    let mut missing: Vec<String> = records
        .iter()
        .filter(|r| r.sample.is_none())
        .map(|r| r.variant_id.clone())
        .collect();
    missing.dedup();
    let manifest = RunManifest {
        run_id,
        started_at,
        finished_at: Some(Utc::now()),
        repeat: config.repeat,
        aggregation: format!("{:?}", config.aggregation),
        on_failure: format!("{:?}", config.on_failure),
        variants: programs.iter().map(|p| p.id.clone()).collect(),
        missing,
        results_path: config.results_path.display().to_string(),
    };
    manifest.write(config.results_path.with_file_name("run_manifest.json"))?;

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discover::Launcher;
    use crate::timing::{CommandSpec, TrialOutput};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    fn record(id: &str, trial: usize, user: f64, system: f64, elapsed: f64) -> TrialRecord {
        TrialRecord {
            variant_id: id.to_string(),
            trial,
            sample: Some(TimingSample {
                user,
                system,
                elapsed,
            }),
        }
    }

    fn row(df: &DataFrame, idx: usize) -> (String, Option<f64>, Option<f64>, Option<f64>, Option<f64>) {
        let f = |name: &str| df.column(name).unwrap().f64().unwrap().get(idx);
        (
            df.column(VARIANT_COLUMN)
                .unwrap()
                .str()
                .unwrap()
                .get(idx)
                .unwrap()
                .to_string(),
            f(USER_COLUMN),
            f(SYSTEM_COLUMN),
            f(ELAPSED_COLUMN),
            f(USER_SYSTEM_COLUMN),
        )
    }

    #[test]
    fn test_per_column_min_mixes_trials() {
        let records = vec![record("A", 1, 1.0, 0.5, 2.0), record("A", 2, 0.9, 0.6, 1.8)];
        let out = aggregate(trials_frame(&records).unwrap(), AggregationMode::PerColumnMin).unwrap();

        assert_eq!(out.height(), 1);
        let (id, user, system, elapsed, _) = row(&out, 0);
        assert_eq!(id, "A");
        assert_eq!(user, Some(0.9));
        assert_eq!(system, Some(0.5));
        assert_eq!(elapsed, Some(1.8));
    }

    #[test]
    fn test_fastest_trial_keeps_whole_row() {
        let records = vec![
            record("A", 1, 1.0, 0.5, 2.0),
            record("A", 2, 0.5, 0.6, 2.5),
            record("A", 3, 2.0, 0.1, 1.0),
        ];
        let out = aggregate(trials_frame(&records).unwrap(), AggregationMode::FastestTrial).unwrap();

        let (_, user, system, elapsed, _) = row(&out, 0);
        assert_eq!(user, Some(0.5));
        assert_eq!(system, Some(0.6));
        assert_eq!(elapsed, Some(2.5));
    }

    #[test]
    fn test_one_sorted_row_per_variant() {
        let records = vec![
            record("s02_rust_polars_lazy_csv", 1, 1.0, 0.1, 1.2),
            record("s02_python_pandas_csv", 1, 3.0, 0.2, 3.3),
            record("s02_rust_polars_lazy_csv", 2, 1.1, 0.1, 1.3),
            record("s02_python_pandas_csv", 2, 2.9, 0.3, 3.4),
        ];
        for mode in [AggregationMode::PerColumnMin, AggregationMode::FastestTrial] {
            let out = aggregate(trials_frame(&records).unwrap(), mode).unwrap();
            assert_eq!(out.height(), 2);
            assert_eq!(
                out.get_column_names(),
                vec![
                    VARIANT_COLUMN,
                    USER_COLUMN,
                    SYSTEM_COLUMN,
                    ELAPSED_COLUMN,
                    USER_SYSTEM_COLUMN
                ]
            );
            assert_eq!(row(&out, 0).0, "s02_python_pandas_csv");
            assert_eq!(row(&out, 1).0, "s02_rust_polars_lazy_csv");
        }
    }

    /// Replays canned results; `None` fails the trial with a non-zero exit,
    /// `Some(Err(..))` with an unreadable report.
    struct ScriptedBackend {
        script: RefCell<VecDeque<Result<TimingSample, TrialError>>>,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<TimingSample, TrialError>>) -> Self {
            Self {
                script: RefCell::new(script.into()),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl TimingBackend for ScriptedBackend {
        fn time(&self, command: &CommandSpec) -> Result<TrialOutput, TrialError> {
            self.calls.borrow_mut().push(command.display());
            let next = self
                .script
                .borrow_mut()
                .pop_front()
                .expect("backend called more often than scripted");
            next.map(|sample| TrialOutput {
                sample,
                stdout: String::new(),
            })
        }
    }

    fn sample(user: f64) -> Result<TimingSample, TrialError> {
        Ok(TimingSample {
            user,
            system: 0.1,
            elapsed: user + 0.2,
        })
    }

    fn exit_failure() -> Result<TimingSample, TrialError> {
        Err(TrialError::Exit {
            status: "exit status: 1".to_string(),
            stderr_tail: "boom".to_string(),
        })
    }

    fn programs() -> Vec<VariantProgram> {
        ["s02_python_pandas_csv", "s02_python_pandas_parquet"]
            .iter()
            .map(|id| VariantProgram {
                id: id.to_string(),
                launcher: Launcher::Interpreter(PathBuf::from(format!("/p/{}/process_data.py", id))),
            })
            .collect()
    }

    fn harness(backend: ScriptedBackend, on_failure: FailurePolicy) -> Harness<ScriptedBackend> {
        let config = HarnessConfig {
            repeat: 2,
            on_failure,
            warmup: false,
            ..Default::default()
        };
        Harness::new(backend, Launchers::from_config(&config, Vec::new()), &config)
    }

    #[test]
    fn test_all_trials_recorded() {
        let backend = ScriptedBackend::new(vec![sample(1.0), sample(0.8), sample(2.0), sample(2.5)]);
        let h = harness(backend, FailurePolicy::Abort);
        let records = h.run_trials(&programs()).unwrap();

        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.sample.is_some()));
        assert_eq!(
            h.backend.calls.borrow()[0],
            "python /p/s02_python_pandas_csv/process_data.py"
        );
    }

    #[test]
    fn test_abort_policy_names_variant_and_trial() {
        let backend = ScriptedBackend::new(vec![sample(1.0), sample(0.8), sample(2.0), exit_failure()]);
        let err = harness(backend, FailurePolicy::Abort)
            .run_trials(&programs())
            .unwrap_err();

        match err {
            BenchError::ProcessFailed { variant, trial, .. } => {
                assert_eq!(variant, "s02_python_pandas_parquet");
                assert_eq!(trial, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_failure_is_distinct_from_process_failure() {
        let backend = ScriptedBackend::new(vec![Err(TrialError::Report(
            crate::timing::TimeReportError::MissingLine,
        ))]);
        let err = harness(backend, FailurePolicy::Abort)
            .run_trials(&programs())
            .unwrap_err();

        assert!(matches!(err, BenchError::TimingParse { trial: 1, .. }));
    }

    #[test]
    fn test_mark_missing_policy_keeps_going() {
        let backend = ScriptedBackend::new(vec![sample(1.0), exit_failure(), sample(2.0), sample(2.5)]);
        let h = harness(backend, FailurePolicy::MarkMissing);
        let records = h.run_trials(&programs()).unwrap();

        let failed: Vec<_> = records
            .iter()
            .filter(|r| r.variant_id == "s02_python_pandas_csv")
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].sample.is_none());

        let out = aggregate(trials_frame(&records).unwrap(), AggregationMode::PerColumnMin).unwrap();
        assert_eq!(out.height(), 2);
        let (id, user, ..) = row(&out, 0);
        assert_eq!(id, "s02_python_pandas_csv");
        assert_eq!(user, None);
        let (id, user, ..) = row(&out, 1);
        assert_eq!(id, "s02_python_pandas_parquet");
        assert_eq!(user, Some(2.0));
    }

    fn warmup_harness(backend: ScriptedBackend, on_failure: FailurePolicy) -> Harness<ScriptedBackend> {
        let config = HarnessConfig {
            repeat: 2,
            on_failure,
            warmup: true,
            cargo: "false".to_string(),
            ..Default::default()
        };
        Harness::new(backend, Launchers::from_config(&config, Vec::new()), &config)
    }

    fn cargo_then_python() -> Vec<VariantProgram> {
        vec![
            VariantProgram {
                id: "s02_rust_polars_eager_csv".to_string(),
                launcher: Launcher::Cargo(PathBuf::from("/p/s02_rust_polars_eager_csv/Cargo.toml")),
            },
            VariantProgram {
                id: "s02_python_pandas_csv".to_string(),
                launcher: Launcher::Interpreter(PathBuf::from("/p/s02_python_pandas_csv/process_data.py")),
            },
        ]
    }

    #[test]
    fn test_warmup_failure_aborts() {
        let h = warmup_harness(ScriptedBackend::new(Vec::new()), FailurePolicy::Abort);
        let err = h.run_trials(&cargo_then_python()).unwrap_err();

        match err {
            BenchError::WarmupFailed { variant, .. } => {
                assert_eq!(variant, "s02_rust_polars_eager_csv");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(h.backend.calls.borrow().is_empty());
    }

    #[test]
    fn test_warmup_failure_marked_missing() {
        let backend = ScriptedBackend::new(vec![sample(1.0), sample(0.9)]);
        let h = warmup_harness(backend, FailurePolicy::MarkMissing);
        let records = h.run_trials(&cargo_then_python()).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].variant_id, "s02_rust_polars_eager_csv");
        assert!(records[0].sample.is_none());
        assert!(records[1..]
            .iter()
            .all(|r| r.variant_id == "s02_python_pandas_csv" && r.sample.is_some()));
        assert_eq!(h.backend.calls.borrow().len(), 2);
    }

    #[test]
    fn test_write_results_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("min_times_df.csv");
        let mut df = aggregate(
            trials_frame(&[record("A", 1, 1.0, 0.5, 2.0)]).unwrap(),
            AggregationMode::PerColumnMin,
        )
        .unwrap();
        write_results(&mut df, &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(
            "variant_id,user_time,system_time,elapsed_time,user_plus_system_time\n"
        ));

        let back = io::read_csv(&path).unwrap().collect().unwrap();
        let (id, user, system, elapsed, user_system) = row(&back, 0);
        assert_eq!(id, "A");
        assert_eq!(user, Some(1.0));
        assert_eq!(system, Some(0.5));
        assert_eq!(elapsed, Some(2.0));
        assert_eq!(user_system, Some(1.5));
    }
}
