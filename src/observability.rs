use crate::errors::{BenchError, BenchResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::Path;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// In-process wall time of each pipeline step. These are diagnostics only;
/// the benchmark numbers come from the external timing utility.
#[derive(Debug, Serialize)]
pub struct Metrics {
    #[serde(skip)]
    start_time: Instant,
    pub step_durations_ms: Vec<(String, f64)>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            step_durations_ms: Vec::new(),
        }
    }

    pub fn record_step(&mut self, step_name: &str, duration: Duration) {
        self.step_durations_ms
            .push((step_name.to_string(), duration.as_secs_f64() * 1e3));
    }

    /// Run `f`, recording its duration under `step_name`.
    pub fn time_step<T>(&mut self, step_name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        let elapsed = start.elapsed();
        tracing::debug!(step = step_name, elapsed_ms = elapsed.as_secs_f64() * 1e3, "step done");
        self.record_step(step_name, elapsed);
        out
    }

    pub fn total_duration(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct InputFileStats {
    pub path: String,
    pub hash: String, // SHA256 hex
    pub size_bytes: u64,
}

impl InputFileStats {
    pub fn from_path<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        let path = path.as_ref();
        Ok(Self {
            path: path.display().to_string(),
            hash: compute_file_hash(path)?,
            size_bytes: std::fs::metadata(path)?.len(),
        })
    }
}

/// Lineage of a generated dataset.
#[derive(Debug, Serialize)]
pub struct DataManifest {
    pub created_at: DateTime<Utc>,
    pub seed: Option<u64>,
    pub files: Vec<InputFileStats>,
}

impl DataManifest {
    pub fn new(seed: Option<u64>, files: Vec<InputFileStats>) -> Self {
        Self {
            created_at: Utc::now(),
            seed,
            files,
        }
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> BenchResult<()> {
        write_json(self, path)
    }
}

/// Record of one harness run, written next to the results table.
#[derive(Debug, Serialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub repeat: usize,
    pub aggregation: String,
    pub on_failure: String,
    pub variants: Vec<String>,
    pub missing: Vec<String>,
    pub results_path: String,
}

impl RunManifest {
    pub fn write<P: AsRef<Path>>(&self, path: P) -> BenchResult<()> {
        write_json(self, path)
    }
}

fn write_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> BenchResult<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value).map_err(|e| BenchError::Unknown(e.into()))
}

pub fn compute_file_hash<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192]; // 8KB buffer

    loop {
        let count = file.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
