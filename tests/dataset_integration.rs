use anyhow::Result;
use dfbench::config::{BenchConfig, DataConfig};
use dfbench::engine::ExecutionMode;
use dfbench::generate::generate_dataset;
use dfbench::io::{self, DataLayout, FileFormat};
use dfbench::runner::run_variant;
use polars::prelude::*;
use tempfile::tempdir;

fn small_config(dir: &std::path::Path) -> DataConfig {
    DataConfig {
        dir: dir.to_path_buf(),
        tables: 4,
        rows: 300,
        seed: Some(11),
        manifest: true,
        ..Default::default()
    }
}

/// Every table reads back identically from its CSV and Parquet copies.
#[test]
fn test_csv_and_parquet_copies_match() -> Result<()> {
    let dir = tempdir()?;
    let config = small_config(dir.path());
    let summary = generate_dataset(&config, "key")?;
    assert_eq!(summary.files.len(), 2 * (config.tables + 1));

    let layout = DataLayout::new(dir.path());
    let csv_tables = layout.list_tables(FileFormat::Csv)?;
    let parquet_tables = layout.list_tables(FileFormat::Parquet)?;
    assert_eq!(csv_tables.len(), 4);
    assert_eq!(parquet_tables.len(), 4);

    for (csv, parquet) in csv_tables.iter().zip(&parquet_tables) {
        let a = io::load_table(csv, FileFormat::Csv, None)?;
        let b = io::load_table(parquet, FileFormat::Parquet, None)?;
        assert_eq!(a.shape(), (300, 20));
        assert!(a.equals_missing(&b), "{:?} differs from {:?}", csv, parquet);
    }

    let lookup_csv = io::load_table(layout.lookup_path(FileFormat::Csv), FileFormat::Csv, None)?;
    let lookup_parquet = io::load_table(
        layout.lookup_path(FileFormat::Parquet),
        FileFormat::Parquet,
        None,
    )?;
    assert_eq!(lookup_csv.shape(), (26, 4));
    assert!(lookup_csv.equals_missing(&lookup_parquet));
    Ok(())
}

#[test]
fn test_manifest_lists_every_file() -> Result<()> {
    let dir = tempdir()?;
    let summary = generate_dataset(&small_config(dir.path()), "key")?;
    let manifest_path = summary.manifest.expect("manifest requested");

    let manifest: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(manifest_path)?)?;
    assert_eq!(manifest["seed"], 11);
    let files = manifest["files"].as_array().unwrap();
    assert_eq!(files.len(), summary.files.len());
    assert!(files
        .iter()
        .all(|f| f["hash"].as_str().is_some_and(|h| h.len() == 64)));
    Ok(())
}

#[test]
fn test_same_seed_same_data() -> Result<()> {
    let first = tempdir()?;
    let second = tempdir()?;
    generate_dataset(&small_config(first.path()), "key")?;
    generate_dataset(&small_config(second.path()), "key")?;

    for index in 0..4 {
        let a = io::load_table(
            DataLayout::new(first.path()).table_path(index, FileFormat::Parquet),
            FileFormat::Parquet,
            None,
        )?;
        let b = io::load_table(
            DataLayout::new(second.path()).table_path(index, FileFormat::Parquet),
            FileFormat::Parquet,
            None,
        )?;
        assert!(a.equals(&b));
    }
    Ok(())
}

/// All four built-in variants agree on generated data, and match a direct
/// computation of the same quantities.
#[test]
fn test_variants_match_direct_computation() -> Result<()> {
    let dir = tempdir()?;
    generate_dataset(&small_config(dir.path()), "key")?;
    let layout = DataLayout::new(dir.path());
    let pipeline = BenchConfig::default().pipeline;

    let frames = layout
        .list_tables(FileFormat::Parquet)?
        .iter()
        .map(|p| io::scan_table(p, FileFormat::Parquet))
        .collect::<dfbench::errors::BenchResult<Vec<_>>>()?;
    let direct = concat(frames, UnionArgs::default())?
        .group_by([col("A")])
        .agg([col("I").cast(DataType::Float64).mean(), col("P").mean()])
        .select([col("I").mean(), col("P").mean()])
        .collect()?;
    let direct_i = direct.column("I")?.f64()?.get(0).unwrap();
    let direct_p = direct.column("P")?.f64()?.get(0).unwrap();

    let first = run_variant(&layout, ExecutionMode::Lazy, FileFormat::Csv, &pipeline)?;
    let second = run_variant(&layout, ExecutionMode::Lazy, FileFormat::Csv, &pipeline)?;
    for (a, b) in first.means.iter().zip(&second.means) {
        assert_eq!(a.column, b.column);
        assert!((a.mean.unwrap() - b.mean.unwrap()).abs() < 1e-12);
    }

    for mode in ExecutionMode::ALL {
        for format in FileFormat::ALL {
            let outcome = run_variant(&layout, mode, format, &pipeline)?;
            assert_eq!(outcome.tables, 4);
            let i = outcome.mean_of("I").unwrap();
            let p = outcome.mean_of("P").unwrap();
            assert!((i - direct_i).abs() < 1e-9, "{} {}: I {} vs {}", mode, format, i, direct_i);
            assert!((p - direct_p).abs() < 1e-9, "{} {}: P {} vs {}", mode, format, p, direct_p);
            let lookup = outcome.mean_of("0").unwrap();
            assert!((-5.0..=-2.0).contains(&lookup));
        }
    }
    Ok(())
}
