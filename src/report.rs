//! Bar charts of the aggregated results table.
//!
//! Every variant identifier is split into its four axes. For each axis one
//! horizontal bar chart is drawn, coloring the two values being contrasted on
//! that axis and graying out the bars the axis says nothing about.

use crate::errors::{BenchError, BenchResult};
use crate::harness::{
    ELAPSED_COLUMN, SYSTEM_COLUMN, USER_COLUMN, USER_SYSTEM_COLUMN, VARIANT_COLUMN,
};
use crate::io;
use crate::variant::VariantId;
use clap::ValueEnum;
use plotters::prelude::*;
use polars::prelude::{DataType, DataFrame};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const FIRST_COLOR: RGBColor = RGBColor(255, 140, 0); // dark orange
const SECOND_COLOR: RGBColor = BLUE;
const NEUTRAL_COLOR: RGBColor = RGBColor(128, 128, 128);

/// Results column drawn as bar length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    UserTime,
    SystemTime,
    ElapsedTime,
    #[default]
    UserPlusSystemTime,
}

impl Metric {
    pub fn column(self) -> &'static str {
        match self {
            Metric::UserTime => USER_COLUMN,
            Metric::SystemTime => SYSTEM_COLUMN,
            Metric::ElapsedTime => ELAPSED_COLUMN,
            Metric::UserPlusSystemTime => USER_SYSTEM_COLUMN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Language,
    Library,
    Execution,
    Filetype,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::Language, Axis::Library, Axis::Execution, Axis::Filetype];

    /// Chart file stem.
    pub fn name(self) -> &'static str {
        match self {
            Axis::Language => "language",
            Axis::Library => "dataframe",
            Axis::Execution => "execution",
            Axis::Filetype => "filetype",
        }
    }

    pub fn value(self, id: &VariantId) -> Option<&str> {
        match self {
            Axis::Language => Some(&id.language),
            Axis::Library => Some(&id.library),
            Axis::Execution => id.execution.as_deref(),
            Axis::Filetype => Some(&id.filetype),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarColor {
    First,
    Second,
    NotApplicable,
}

impl BarColor {
    fn rgb(self) -> RGBColor {
        match self {
            BarColor::First => FIRST_COLOR,
            BarColor::Second => SECOND_COLOR,
            BarColor::NotApplicable => NEUTRAL_COLOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotRow {
    pub variant: VariantId,
    pub label: String,
    pub time: f64,
}

/// Read the results table into plot rows, keeping its order.
pub fn load_results(path: &Path, metric: Metric) -> BenchResult<Vec<PlotRow>> {
    let df = io::read_csv(path)?.collect()?;
    plot_rows(&df, metric)
}

pub fn plot_rows(df: &DataFrame, metric: Metric) -> BenchResult<Vec<PlotRow>> {
    let ids = df.column(VARIANT_COLUMN)?.str()?;
    let times = df.column(metric.column())?.cast(&DataType::Float64)?;
    let times = times.f64()?;

    ids.into_iter()
        .zip(times)
        .map(|(id, time)| {
            let id = id.ok_or_else(|| BenchError::Plot("results row without variant_id".to_string()))?;
            let time = time.ok_or_else(|| {
                BenchError::Plot(format!("variant {} has no {}", id, metric.column()))
            })?;
            let variant = VariantId::parse(id)?;
            Ok(PlotRow {
                label: variant.label(),
                variant,
                time,
            })
        })
        .collect()
}

/// True when some other row differs from `row` on `axis` only. An axis that
/// is unset on either row does not count as a difference.
fn has_counterpart(rows: &[PlotRow], row: &PlotRow, axis: Axis) -> bool {
    rows.iter().any(|other| {
        Axis::ALL.iter().all(|&a| {
            match (a.value(&row.variant), a.value(&other.variant)) {
                (Some(mine), Some(theirs)) if a == axis => mine != theirs,
                (None, _) | (_, None) if a == axis => false,
                (Some(mine), Some(theirs)) => mine == theirs,
                _ => true,
            }
        })
    })
}

/// Colors for each row on `axis`. The axis must contrast exactly two values;
/// the first color goes to the value of the bottom-most bar.
pub fn bar_colors(rows: &[PlotRow], axis: Axis) -> BenchResult<Vec<BarColor>> {
    let mut distinct: Vec<&str> = Vec::new();
    for value in rows.iter().rev().filter_map(|r| axis.value(&r.variant)) {
        if !distinct.contains(&value) {
            distinct.push(value);
        }
    }
    if distinct.len() != 2 {
        return Err(BenchError::Plot(format!(
            "axis {} needs exactly two distinct values to compare, found {:?}",
            axis.name(),
            distinct
        )));
    }

    Ok(rows
        .iter()
        .map(|row| match axis.value(&row.variant) {
            Some(value) if has_counterpart(rows, row, axis) => {
                if value == distinct[0] {
                    BarColor::First
                } else {
                    BarColor::Second
                }
            }
            _ => BarColor::NotApplicable,
        })
        .collect())
}

fn plot_err<E: std::fmt::Display>(e: E) -> BenchError {
    BenchError::Plot(e.to_string())
}

/// Draw one horizontal bar chart; the first row ends up at the top.
pub fn render_chart(
    rows: &[PlotRow],
    colors: &[BarColor],
    path: &Path,
    size: (u32, u32),
) -> BenchResult<()> {
    let n = rows.len();
    let max_time = rows.iter().map(|r| r.time).fold(0.0, f64::max);
    let x_max = if max_time > 0.0 { max_time * 1.05 } else { 1.0 };
    let label_width = rows.iter().map(|r| r.label.len()).max().unwrap_or(0) as u32 * 7 + 10;

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(label_width)
        .build_cartesian_2d(0f64..x_max, (0..n).into_segmented())
        .map_err(plot_err)?;

    let labels: Vec<&str> = rows.iter().map(|r| r.label.as_str()).collect();
    chart
        .configure_mesh()
        .disable_y_mesh()
        .x_desc("Run time (sec)")
        .y_labels(n)
        .y_label_formatter(&|v| match v {
            SegmentValue::CenterOf(slot) if *slot < n => labels[n - 1 - *slot].to_string(),
            _ => String::new(),
        })
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(rows.iter().zip(colors).enumerate().map(|(i, (row, color))| {
            let slot = n - 1 - i;
            let mut bar = Rectangle::new(
                [
                    (0.0, SegmentValue::Exact(slot)),
                    (row.time, SegmentValue::Exact(slot + 1)),
                ],
                color.rgb().filled(),
            );
            bar.set_margin(4, 4, 0, 0);
            bar
        }))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Render every axis chart into every output directory.
pub fn plot_results(
    rows: &[PlotRow],
    output_dirs: &[PathBuf],
    size: (u32, u32),
) -> BenchResult<Vec<PathBuf>> {
    if rows.is_empty() {
        return Err(BenchError::Plot("results table is empty".to_string()));
    }
    let mut written = Vec::new();
    for axis in Axis::ALL {
        let colors = bar_colors(rows, axis)?;
        for dir in output_dirs {
            fs::create_dir_all(dir)?;
            let path = dir.join(format!("{}.png", axis.name()));
            render_chart(rows, &colors, &path, size)?;
            info!("Wrote {:?}", path);
            written.push(path);
        }
    }
    Ok(written)
}
