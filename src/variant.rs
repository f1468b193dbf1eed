//! Structured variant identifiers.
//!
//! A variant identifier such as `s02_rust_polars_lazy_parquet` encodes four
//! axes: language, dataframe library, execution mode and file format.
//! Libraries without an execution-mode axis produce three-token identifiers
//! (`s02_python_pandas_csv`); for those the last token is the file format and
//! the execution mode is unset.

use crate::engine::ExecutionMode;
use crate::errors::{BenchError, BenchResult};
use crate::io::FileFormat;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantId {
    raw: String,
    pub language: String,
    pub library: String,
    pub execution: Option<String>,
    pub filetype: String,
}

/// Stage prefixes look like `s02`.
fn is_stage_token(token: &str) -> bool {
    token.len() > 1
        && token.starts_with('s')
        && token[1..].chars().all(|c| c.is_ascii_digit())
}

impl VariantId {
    pub fn parse(raw: &str) -> BenchResult<Self> {
        let mut tokens: Vec<&str> = raw.split('_').collect();
        if tokens.first().is_some_and(|t| is_stage_token(t)) {
            tokens.remove(0);
        }
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(BenchError::InvalidVariant(raw.to_string()));
        }

        let (language, library, execution, filetype) = match tokens.as_slice() {
            [language, library, execution, filetype] => {
                (language, library, Some(execution.to_string()), filetype)
            }
            [language, library, filetype] => (language, library, None, filetype),
            _ => return Err(BenchError::InvalidVariant(raw.to_string())),
        };

        Ok(Self {
            raw: raw.to_string(),
            language: language.to_string(),
            library: library.to_string(),
            execution,
            filetype: filetype.to_string(),
        })
    }

    /// Identifier of one of this crate's own polars variants.
    pub fn builtin(mode: ExecutionMode, format: FileFormat) -> Self {
        Self {
            raw: format!("rust_polars_{}_{}", mode, format),
            language: "rust".to_string(),
            library: "polars".to_string(),
            execution: Some(mode.to_string()),
            filetype: format.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Human readable label, e.g. `Rust, Polars, Lazy, CSV`.
    pub fn label(&self) -> String {
        let mut parts = vec![title_case(&self.language), title_case(&self.library)];
        if let Some(execution) = &self.execution {
            parts.push(title_case(execution));
        }
        parts.push(title_case(&self.filetype));
        parts.join(", ").replace("Csv", "CSV")
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for VariantId {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
