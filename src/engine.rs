//! Eager and lazy execution of the processing pipeline.
//!
//! Both strategies expose the same step operations through
//! [`ExecutionStrategy`]. The eager one materializes a `DataFrame` after every
//! step; the lazy one only extends a `LazyFrame` query plan, which runs when
//! [`ExecutionStrategy::materialize`] is called.

use crate::errors::{BenchError, BenchResult};
use crate::io::{self, FileFormat};
use clap::ValueEnum;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Eager,
    Lazy,
}

impl ExecutionMode {
    pub const ALL: [ExecutionMode; 2] = [ExecutionMode::Eager, ExecutionMode::Lazy];

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Eager => "eager",
            ExecutionMode::Lazy => "lazy",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ExecutionStrategy {
    type Frame;

    fn mode(&self) -> ExecutionMode;

    /// Load every column of a table.
    fn load(&self, path: &Path, format: FileFormat) -> BenchResult<Self::Frame>;

    /// Load only `columns` of a table.
    fn load_columns(
        &self,
        path: &Path,
        format: FileFormat,
        columns: &[String],
    ) -> BenchResult<Self::Frame>;

    /// Stack frames row-wise, keeping their order.
    fn concat(&self, frames: Vec<Self::Frame>) -> BenchResult<Self::Frame>;

    fn left_join(
        &self,
        left: Self::Frame,
        right: Self::Frame,
        left_on: &str,
        right_on: &str,
    ) -> BenchResult<Self::Frame>;

    /// Remove `name` if the frame has it.
    fn drop_column(&self, frame: Self::Frame, name: &str) -> BenchResult<Self::Frame>;

    /// Mean of every other column per distinct value of `by`, sorted by `by`.
    fn group_mean(&self, frame: Self::Frame, by: &str) -> BenchResult<Self::Frame>;

    fn materialize(&self, frame: Self::Frame) -> BenchResult<DataFrame>;
}

fn group_mean_plan(lf: LazyFrame, by: &str) -> LazyFrame {
    lf.group_by_stable([col(by)])
        .agg([all().exclude([by]).mean()])
        .sort([by], Default::default())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EagerStrategy;

impl ExecutionStrategy for EagerStrategy {
    type Frame = DataFrame;

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Eager
    }

    fn load(&self, path: &Path, format: FileFormat) -> BenchResult<DataFrame> {
        io::load_table(path, format, None)
    }

    fn load_columns(
        &self,
        path: &Path,
        format: FileFormat,
        columns: &[String],
    ) -> BenchResult<DataFrame> {
        io::load_table(path, format, Some(columns))
    }

    fn concat(&self, frames: Vec<DataFrame>) -> BenchResult<DataFrame> {
        let mut frames = frames.into_iter();
        let mut acc = frames
            .next()
            .ok_or_else(|| BenchError::Unknown(anyhow::anyhow!("nothing to concatenate")))?;
        for df in frames {
            acc.vstack_mut(&df)?;
        }
        Ok(acc)
    }

    fn left_join(
        &self,
        left: DataFrame,
        right: DataFrame,
        left_on: &str,
        right_on: &str,
    ) -> BenchResult<DataFrame> {
        Ok(left.left_join(&right, [left_on], [right_on])?)
    }

    fn drop_column(&self, frame: DataFrame, name: &str) -> BenchResult<DataFrame> {
        if frame.get_column_index(name).is_some() {
            Ok(frame.drop(name)?)
        } else {
            Ok(frame)
        }
    }

    fn group_mean(&self, frame: DataFrame, by: &str) -> BenchResult<DataFrame> {
        // Shares the lazy group-by plan, collected at once, so both modes
        // aggregate and sort identically.
        Ok(group_mean_plan(frame.lazy(), by).collect()?)
    }

    fn materialize(&self, frame: DataFrame) -> BenchResult<DataFrame> {
        Ok(frame)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LazyStrategy;

impl ExecutionStrategy for LazyStrategy {
    type Frame = LazyFrame;

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Lazy
    }

    fn load(&self, path: &Path, format: FileFormat) -> BenchResult<LazyFrame> {
        io::scan_table(path, format)
    }

    fn load_columns(
        &self,
        path: &Path,
        format: FileFormat,
        columns: &[String],
    ) -> BenchResult<LazyFrame> {
        let exprs: Vec<Expr> = columns.iter().map(|c| col(c.as_str())).collect();
        Ok(io::scan_table(path, format)?.select(exprs))
    }

    fn concat(&self, frames: Vec<LazyFrame>) -> BenchResult<LazyFrame> {
        if frames.is_empty() {
            return Err(BenchError::Unknown(anyhow::anyhow!("nothing to concatenate")));
        }
        Ok(concat(frames, UnionArgs::default())?)
    }

    fn left_join(
        &self,
        left: LazyFrame,
        right: LazyFrame,
        left_on: &str,
        right_on: &str,
    ) -> BenchResult<LazyFrame> {
        Ok(left.join(
            right,
            [col(left_on)],
            [col(right_on)],
            JoinArgs::new(JoinType::Left),
        ))
    }

    fn drop_column(&self, frame: LazyFrame, name: &str) -> BenchResult<LazyFrame> {
        Ok(frame.select([all().exclude([name])]))
    }

    fn group_mean(&self, frame: LazyFrame, by: &str) -> BenchResult<LazyFrame> {
        Ok(group_mean_plan(frame, by))
    }

    fn materialize(&self, frame: LazyFrame) -> BenchResult<DataFrame> {
        Ok(frame.collect()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn left() -> DataFrame {
        df! {
            "A" => ["a", "b", "z", "a"],
            "I" => [1i64, 2, 3, 4],
        }
        .unwrap()
    }

    fn lookup() -> DataFrame {
        df! {
            "key" => ["a", "b"],
            "0" => [-2i64, -3],
        }
        .unwrap()
    }

    fn check_join<S: ExecutionStrategy>(strategy: &S, l: S::Frame, r: S::Frame) {
        let joined = strategy.left_join(l, r, "A", "key").unwrap();
        let joined = strategy.drop_column(joined, "key").unwrap();
        let df = strategy.materialize(joined).unwrap();

        assert_eq!(df.height(), 4);
        assert!(df.get_column_index("key").is_none());
        let values = df.column("0").unwrap().i64().unwrap();
        assert_eq!(values.get(0), Some(-2));
        assert_eq!(values.get(1), Some(-3));
        assert_eq!(values.get(2), None);
        assert_eq!(values.get(3), Some(-2));
    }

    #[test]
    fn test_left_join_eager() {
        check_join(&EagerStrategy, left(), lookup());
    }

    #[test]
    fn test_left_join_lazy() {
        check_join(&LazyStrategy, left().lazy(), lookup().lazy());
    }

    #[test]
    fn test_concat_keeps_order() {
        let a = df! { "x" => [1i64, 2] }.unwrap();
        let b = df! { "x" => [3i64] }.unwrap();

        let eager = EagerStrategy.concat(vec![a.clone(), b.clone()]).unwrap();
        let lazy = LazyStrategy
            .materialize(LazyStrategy.concat(vec![a.lazy(), b.lazy()]).unwrap())
            .unwrap();

        for df in [eager, lazy] {
            let x: Vec<_> = df.column("x").unwrap().i64().unwrap().into_iter().collect();
            assert_eq!(x, vec![Some(1), Some(2), Some(3)]);
        }
    }

    #[test]
    fn test_concat_empty_is_error() {
        assert!(EagerStrategy.concat(Vec::new()).is_err());
        assert!(LazyStrategy.concat(Vec::new()).is_err());
    }

    #[test]
    fn test_drop_missing_column_is_noop() {
        let df = EagerStrategy.drop_column(left(), "key").unwrap();
        assert_eq!(df.width(), 2);
        let df = LazyStrategy
            .materialize(LazyStrategy.drop_column(left().lazy(), "key").unwrap())
            .unwrap();
        assert_eq!(df.width(), 2);
    }

    #[test]
    fn test_group_mean_sorted_by_key() {
        let df = EagerStrategy.group_mean(left(), "A").unwrap();
        let keys = df.column("A").unwrap().str().unwrap();
        assert_eq!(keys.get(0), Some("a"));
        assert_eq!(keys.get(2), Some("z"));
        let means = df.column("I").unwrap().f64().unwrap();
        assert_eq!(means.get(0), Some(2.5));
        assert_eq!(means.get(1), Some(2.0));
    }
}
