use crate::errors::{BenchError, BenchResult};
use clap::ValueEnum;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

const TABLE_PREFIX: &str = "table_";
const LOOKUP_STEM: &str = "key_table";

/// On-disk encoding of a generated table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Csv,
    Parquet,
}

impl FileFormat {
    pub const ALL: [FileFormat; 2] = [FileFormat::Csv, FileFormat::Parquet];

    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Parquet => "parquet",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Directory layout of the synthetic dataset: `table_<i>.<ext>` data tables
/// plus one `key_table.<ext>` lookup table.
#[derive(Debug, Clone)]
pub struct DataLayout {
    dir: PathBuf,
}

impl DataLayout {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn table_path(&self, index: usize, format: FileFormat) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", TABLE_PREFIX, index, format.extension()))
    }

    pub fn lookup_path(&self, format: FileFormat) -> PathBuf {
        self.dir
            .join(format!("{}.{}", LOOKUP_STEM, format.extension()))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join("manifest.json")
    }

    /// Data tables of one format, ordered by their numeric index rather than
    /// by directory enumeration order.
    pub fn list_tables(&self, format: FileFormat) -> BenchResult<Vec<PathBuf>> {
        let mut indexed = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some(index) = table_index(&path, format) {
                indexed.push((index, path));
            }
        }

        if indexed.is_empty() {
            return Err(BenchError::NoTables {
                dir: self.dir.clone(),
                format: format.to_string(),
            });
        }

        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().map(|(_, path)| path).collect())
    }
}

fn table_index(path: &Path, format: FileFormat) -> Option<usize> {
    if path.extension()?.to_str()? != format.extension() {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(TABLE_PREFIX)?
        .parse()
        .ok()
}

pub fn read_csv<P: AsRef<Path>>(path: P) -> BenchResult<LazyFrame> {
    LazyCsvReader::new(path)
        .with_has_header(true)
        .finish()
        .map_err(BenchError::PolarsError)
}

pub fn read_parquet<P: AsRef<Path>>(path: P) -> BenchResult<LazyFrame> {
    LazyFrame::scan_parquet(path, Default::default()).map_err(BenchError::PolarsError)
}

pub fn scan_table<P: AsRef<Path>>(path: P, format: FileFormat) -> BenchResult<LazyFrame> {
    match format {
        FileFormat::Csv => read_csv(path),
        FileFormat::Parquet => read_parquet(path),
    }
}

/// Eagerly read a table, optionally restricted to `columns` (in that order).
pub fn load_table<P: AsRef<Path>>(
    path: P,
    format: FileFormat,
    columns: Option<&[String]>,
) -> BenchResult<DataFrame> {
    let path = path.as_ref();
    let df = match format {
        FileFormat::Csv => {
            let projection: Option<Arc<[PlSmallStr]>> =
                columns.map(|cols| cols.iter().map(|c| PlSmallStr::from(c.as_str())).collect());
            CsvReadOptions::default()
                .with_has_header(true)
                .with_columns(projection)
                .try_into_reader_with_file_path(Some(path.to_path_buf()))?
                .finish()?
        }
        FileFormat::Parquet => {
            let file = File::open(path)?;
            ParquetReader::new(file)
                .with_columns(columns.map(|cols| cols.to_vec()))
                .finish()?
        }
    };

    match columns {
        Some(cols) => Ok(df.select(cols.iter().map(String::as_str))?),
        None => Ok(df),
    }
}

pub fn write_csv<P: AsRef<Path>>(df: &mut DataFrame, path: P) -> BenchResult<()> {
    let mut file = File::create(path).map_err(BenchError::IoError)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .map_err(BenchError::PolarsError)
}

pub fn write_parquet<P: AsRef<Path>>(df: &mut DataFrame, path: P) -> BenchResult<()> {
    let file = File::create(path).map_err(BenchError::IoError)?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(BenchError::PolarsError)?;
    Ok(())
}

pub fn write_table<P: AsRef<Path>>(
    df: &mut DataFrame,
    path: P,
    format: FileFormat,
) -> BenchResult<()> {
    match format {
        FileFormat::Csv => write_csv(df, path),
        FileFormat::Parquet => write_parquet(df, path),
    }
}
