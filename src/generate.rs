//! Synthetic dataset generation.
//!
//! Produces `tables` independent random tables plus one lookup table and
//! writes each of them as CSV and as Parquet.

use crate::config::DataConfig;
use crate::errors::{BenchError, BenchResult};
use crate::io::{self, DataLayout, FileFormat};
use crate::observability::{DataManifest, InputFileStats};
use indicatif::{ProgressBar, ProgressStyle};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// Lookup values are drawn from `LOOKUP_MIN..LOOKUP_MAX`, i.e. [-5, -2].
const LOOKUP_MIN: i64 = -5;
const LOOKUP_MAX: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableShape {
    pub rows: usize,
    pub columns: usize,
    pub alphabet: usize,
}

impl From<&DataConfig> for TableShape {
    fn from(config: &DataConfig) -> Self {
        Self {
            rows: config.rows,
            columns: config.columns,
            alphabet: config.alphabet,
        }
    }
}

/// 1 -> 'a', 2 -> 'b', ...
fn lowercase_letter(code: usize) -> String {
    char::from(b'a' + (code - 1) as u8).to_string()
}

/// 0 -> "A", 1 -> "B", ...
fn column_name(position: usize) -> PlSmallStr {
    PlSmallStr::from(char::from(b'A' + position as u8).to_string())
}

/// Build one data table: the first half of the columns are integer codes in
/// `[1, alphabet]`, the second half uniform floats in `[0, 1)`. The first
/// quarter is remapped from codes to lowercase letters.
pub fn synthetic_table<R: Rng>(rng: &mut R, shape: &TableShape) -> BenchResult<DataFrame> {
    let half = shape.columns / 2;
    let quarter = half / 2;
    let alphabet = shape.alphabet as i64;

    let mut columns = Vec::with_capacity(shape.columns);
    for position in 0..shape.columns {
        let name = column_name(position);
        let column = if position < quarter {
            let values: Vec<String> = (0..shape.rows)
                .map(|_| lowercase_letter(rng.gen_range(1..=shape.alphabet)))
                .collect();
            Column::new(name, values)
        } else if position < half {
            let values: Vec<i64> = (0..shape.rows)
                .map(|_| rng.gen_range(1..=alphabet))
                .collect();
            Column::new(name, values)
        } else {
            let values: Vec<f64> = (0..shape.rows).map(|_| rng.gen::<f64>()).collect();
            Column::new(name, values)
        };
        columns.push(column);
    }

    Ok(DataFrame::new(columns)?)
}

/// Build the lookup table: a `key_column` holding every letter of the
/// alphabet in order, followed by `value_columns` small negative integer
/// columns named `0`, `1`, ...
pub fn lookup_table<R: Rng>(
    rng: &mut R,
    alphabet: usize,
    value_columns: usize,
    key_column: &str,
) -> BenchResult<DataFrame> {
    let keys: Vec<String> = (1..=alphabet).map(lowercase_letter).collect();

    let mut columns = Vec::with_capacity(value_columns + 1);
    columns.push(Column::new(key_column.into(), keys));
    for i in 0..value_columns {
        let values: Vec<i64> = (0..alphabet)
            .map(|_| rng.gen_range(LOOKUP_MIN..LOOKUP_MAX))
            .collect();
        columns.push(Column::new(PlSmallStr::from(i.to_string()), values));
    }

    Ok(DataFrame::new(columns)?)
}

#[derive(Debug)]
pub struct DatasetSummary {
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub manifest: Option<PathBuf>,
}

fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn write_both(
    df: &mut DataFrame,
    path_for: impl Fn(FileFormat) -> PathBuf,
    written: &mut Vec<PathBuf>,
) -> BenchResult<()> {
    for format in FileFormat::ALL {
        let path = path_for(format);
        debug!("Writing {:?}", path);
        io::write_table(df, &path, format)?;
        written.push(path);
    }
    Ok(())
}

/// Generate the full dataset described by `config` into `config.dir`.
pub fn generate_dataset(config: &DataConfig, lookup_key: &str) -> BenchResult<DatasetSummary> {
    let shape = TableShape::from(config);
    fs::create_dir_all(&config.dir)?;
    let layout = DataLayout::new(&config.dir);
    let mut rng = rng_from_seed(config.seed);

    info!(
        "Generating {} tables of {} x {} into {:?}",
        config.tables, shape.rows, shape.columns, config.dir
    );

    let pb = ProgressBar::new(config.tables as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
            .map_err(|e| BenchError::Unknown(e.into()))?
            .progress_chars("#>-"),
    );
    pb.set_message("tables");

    let mut written = Vec::with_capacity(2 * (config.tables + 1));
    for index in 0..config.tables {
        let mut df = synthetic_table(&mut rng, &shape)?;
        write_both(&mut df, |format| layout.table_path(index, format), &mut written)?;
        pb.inc(1);
    }
    pb.finish_with_message("tables written");

    let mut lookup = lookup_table(&mut rng, config.alphabet, config.lookup_columns, lookup_key)?;
    write_both(&mut lookup, |format| layout.lookup_path(format), &mut written)?;

    let manifest = if config.manifest {
        let files = written
            .iter()
            .map(InputFileStats::from_path)
            .collect::<BenchResult<Vec<_>>>()?;
        let manifest = DataManifest::new(config.seed, files);
        let path = layout.manifest_path();
        manifest.write(&path)?;
        info!("Dataset manifest written to {:?}", path);
        Some(path)
    } else {
        None
    };

    info!("Wrote {} files", written.len());
    Ok(DatasetSummary {
        dir: config.dir.clone(),
        files: written,
        manifest,
    })
}
