//! Discovery of runnable variant programs.

use crate::config::{HarnessConfig, LauncherKind, MarkerRule};
use crate::engine::ExecutionMode;
use crate::errors::{BenchError, BenchResult};
use crate::io::FileFormat;
use crate::timing::CommandSpec;
use crate::variant::VariantId;
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Clone, PartialEq)]
pub enum Launcher {
    /// `<interpreter> <script>`
    Interpreter(PathBuf),
    /// `cargo run --release --frozen --manifest-path <manifest>`
    Cargo(PathBuf),
    /// This crate's own binary running one of its polars variants.
    Builtin {
        mode: ExecutionMode,
        format: FileFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantProgram {
    pub id: String,
    pub launcher: Launcher,
}

impl VariantProgram {
    pub fn builtin(mode: ExecutionMode, format: FileFormat) -> Self {
        Self {
            id: VariantId::builtin(mode, format).to_string(),
            launcher: Launcher::Builtin { mode, format },
        }
    }
}

/// How to start variant programs.
#[derive(Debug, Clone)]
pub struct Launchers {
    pub python: OsString,
    pub cargo: OsString,
    /// Executable and leading arguments for built-in variants.
    pub builtin: Vec<OsString>,
}

impl Launchers {
    pub fn from_config(config: &HarnessConfig, builtin: Vec<OsString>) -> Self {
        Self {
            python: config.python.clone().into(),
            cargo: config.cargo.clone().into(),
            builtin,
        }
    }

    /// Command whose run time is measured.
    pub fn command(&self, program: &VariantProgram) -> BenchResult<CommandSpec> {
        let spec = match &program.launcher {
            Launcher::Interpreter(script) => CommandSpec::new(&self.python).arg(script),
            Launcher::Cargo(manifest) => CommandSpec::new(&self.cargo)
                .arg("run")
                .arg("--release")
                .arg("--frozen")
                .arg("--manifest-path")
                .arg(manifest),
            Launcher::Builtin { mode, format } => {
                let (exe, leading) = self.builtin.split_first().ok_or_else(|| {
                    BenchError::InvalidConfig("no executable for built-in variants".to_string())
                })?;
                let mut spec = CommandSpec::new(exe);
                for arg in leading {
                    spec = spec.arg(arg);
                }
                spec.arg("process")
                    .arg("--mode")
                    .arg(mode.as_str())
                    .arg("--format")
                    .arg(format.extension())
            }
        };
        Ok(spec)
    }

    /// Untimed preparation run, so compilation stays out of the timings.
    pub fn warmup(&self, program: &VariantProgram) -> Option<CommandSpec> {
        match &program.launcher {
            Launcher::Cargo(manifest) => Some(
                CommandSpec::new(&self.cargo)
                    .arg("build")
                    .arg("--release")
                    .arg("--frozen")
                    .arg("--manifest-path")
                    .arg(manifest),
            ),
            _ => None,
        }
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name == "target" || name.starts_with('.'))
}

/// Walk `root` for directories holding one of the `markers`. The directory
/// name is the variant identifier. Marker files directly in `root` are
/// ignored since they describe the project itself.
pub fn discover_programs(
    root: &Path,
    markers: &[MarkerRule],
    filter: Option<&Regex>,
) -> BenchResult<Vec<VariantProgram>> {
    let mut programs = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
    {
        let entry = entry.map_err(|e| BenchError::Unknown(e.into()))?;
        if !entry.file_type().is_file() || entry.depth() < 2 {
            continue;
        }
        let Some(rule) = markers
            .iter()
            .find(|rule| entry.file_name().to_str() == Some(rule.file_name.as_str()))
        else {
            continue;
        };
        let Some(id) = entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
        else {
            continue;
        };
        if filter.is_some_and(|re| !re.is_match(id)) {
            debug!("Skipping {} (filtered)", id);
            continue;
        }

        let path = entry.path().to_path_buf();
        let launcher = match rule.launcher {
            LauncherKind::Interpreter => Launcher::Interpreter(path),
            LauncherKind::Cargo => Launcher::Cargo(path),
        };
        debug!("Found variant {} ({:?})", id, launcher);
        programs.push(VariantProgram {
            id: id.to_string(),
            launcher,
        });
    }

    programs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(programs)
}

/// The four built-in polars variants, optionally filtered.
pub fn builtin_programs(filter: Option<&Regex>) -> Vec<VariantProgram> {
    ExecutionMode::ALL
        .into_iter()
        .flat_map(|mode| {
            FileFormat::ALL
                .into_iter()
                .map(move |format| VariantProgram::builtin(mode, format))
        })
        .filter(|p| filter.map_or(true, |re| re.is_match(&p.id)))
        .collect()
}
