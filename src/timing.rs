//! Timing of external programs.
//!
//! [`TimingBackend`] is the seam between the harness and whatever measures a
//! process. [`GnuTimeBackend`] wraps the command in GNU `time` and reads its
//! default report from the child's stderr, e.g.
//!
//! ```text
//! 1.23user 0.45system 0:02.10elapsed 99%CPU (0avgtext+0avgdata 51200maxresident)k
//! ```

use serde::Serialize;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Output};
use thiserror::Error;
use tracing::trace;

const USER_LABEL: &str = "user";
const SYSTEM_LABEL: &str = "system";
const ELAPSED_LABEL: &str = "elapsed";

/// Lines of stderr kept when a child fails.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimingSample {
    pub user: f64,
    pub system: f64,
    pub elapsed: f64,
}

impl TimingSample {
    pub fn user_plus_system(&self) -> f64 {
        self.user + self.system
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimeReportError {
    #[error("no line holds the user/system/elapsed report")]
    MissingLine,

    #[error("no {label} value in report line {line:?}")]
    MissingToken { label: &'static str, line: String },

    #[error("{label} value {token:?} is not a number")]
    InvalidNumber { label: &'static str, token: String },
}

fn parse_seconds(label: &'static str, token: &str) -> Result<f64, TimeReportError> {
    token
        .trim()
        .parse::<f64>()
        .map_err(|_| TimeReportError::InvalidNumber {
            label,
            token: token.to_string(),
        })
}

/// `[[hours:]minutes:]seconds` to seconds.
fn parse_clock(token: &str) -> Result<f64, TimeReportError> {
    let parts: Vec<&str> = token.split(':').collect();
    if parts.len() > 3 {
        return Err(TimeReportError::InvalidNumber {
            label: ELAPSED_LABEL,
            token: token.to_string(),
        });
    }
    parts.iter().try_fold(0.0, |acc, part| -> Result<f64, TimeReportError> {
        Ok(acc * 60.0 + parse_seconds(ELAPSED_LABEL, part)?)
    })
}

/// Parse the GNU `time` report out of a process's stderr.
pub fn parse_time_report(stderr: &str) -> Result<TimingSample, TimeReportError> {
    let line = stderr
        .lines()
        .find(|l| l.contains(USER_LABEL) && l.contains(SYSTEM_LABEL) && l.contains(ELAPSED_LABEL))
        .ok_or(TimeReportError::MissingLine)?;

    let missing = |label| TimeReportError::MissingToken {
        label,
        line: line.to_string(),
    };

    let (user_text, rest) = line.split_once(USER_LABEL).ok_or_else(|| missing(USER_LABEL))?;
    let user = parse_seconds(USER_LABEL, user_text)?;

    // "<user>user <system>system ...": the system value is the second
    // space-delimited token before the system label.
    let before_system = line
        .split_once(SYSTEM_LABEL)
        .map(|(head, _)| head)
        .ok_or_else(|| missing(SYSTEM_LABEL))?;
    let system_token = before_system
        .split(' ')
        .nth(1)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| missing(SYSTEM_LABEL))?;
    let system = parse_seconds(SYSTEM_LABEL, system_token)?;

    let before_elapsed = rest
        .split_once(ELAPSED_LABEL)
        .map(|(head, _)| head)
        .ok_or_else(|| missing(ELAPSED_LABEL))?;
    let elapsed_token = before_elapsed
        .rsplit(' ')
        .next()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| missing(ELAPSED_LABEL))?;
    let elapsed = parse_clock(elapsed_token)?;

    Ok(TimingSample {
        user,
        system,
        elapsed,
    })
}

/// A program invocation, without any timing wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new<S: Into<OsString>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion without timing, failing on a non-zero exit.
    pub fn run_untimed(&self) -> Result<Output, TrialError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| TrialError::Spawn(e.to_string()))?;
        if !output.status.success() {
            return Err(TrialError::Exit {
                status: output.status.to_string(),
                stderr_tail: stderr_tail(&output.stderr),
            });
        }
        Ok(output)
    }
}

#[derive(Debug, Clone)]
pub struct TrialOutput {
    pub sample: TimingSample,
    pub stdout: String,
}

/// Why a single timed run produced no sample.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrialError {
    #[error("could not start process: {0}")]
    Spawn(String),

    #[error("process exited with {status}; stderr:\n{stderr_tail}")]
    Exit { status: String, stderr_tail: String },

    #[error(transparent)]
    Report(#[from] TimeReportError),
}

/// Run an external program once and report how long it took.
pub trait TimingBackend {
    fn time(&self, command: &CommandSpec) -> Result<TrialOutput, TrialError>;
}

/// Wraps every command in GNU `time`.
#[derive(Debug, Clone)]
pub struct GnuTimeBackend {
    time_bin: PathBuf,
}

impl GnuTimeBackend {
    pub fn new<P: Into<PathBuf>>(time_bin: P) -> Self {
        Self {
            time_bin: time_bin.into(),
        }
    }
}

impl Default for GnuTimeBackend {
    fn default() -> Self {
        Self::new("/usr/bin/time")
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

impl TimingBackend for GnuTimeBackend {
    fn time(&self, command: &CommandSpec) -> Result<TrialOutput, TrialError> {
        trace!("{} {}", self.time_bin.display(), command.display());
        let output = Command::new(&self.time_bin)
            .arg(&command.program)
            .args(&command.args)
            .output()
            .map_err(|e| TrialError::Spawn(format!("{}: {}", self.time_bin.display(), e)))?;

        if !output.status.success() {
            return Err(TrialError::Exit {
                status: output.status.to_string(),
                stderr_tail: stderr_tail(&output.stderr),
            });
        }

        let sample = parse_time_report(&String::from_utf8_lossy(&output.stderr))?;
        Ok(TrialOutput {
            sample,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}
