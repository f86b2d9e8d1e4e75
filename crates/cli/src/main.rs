//! CLI for yosegi - build pyramid GeoParquet files
//!
//! This is a thin wrapper around the yosegi-core library.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use yosegi_core::schedule::{DEFAULT_RESOLUTION_BASE, DEFAULT_RESOLUTION_MULTIPLIER};
use yosegi_core::{Compression, Config, Converter, ResolutionModel, DEFAULT_ROW_GROUP_SIZE};

#[derive(Parser, Debug)]
#[command(
    name = "yosegi",
    about = "Build a pyramid GeoParquet: features ordered by zoom level, then quadkey",
    version
)]
struct Args {
    /// Input GeoParquet or GeoJSON file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output GeoParquet file (a directory with --parquet-partition-by-zoomlevel)
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Minimum zoom level
    #[arg(long = "minzoom", default_value_t = 0)]
    min_zoom: u8,

    /// Maximum zoom level
    #[arg(long = "maxzoom", default_value_t = 16)]
    max_zoom: u8,

    /// Snapping resolution at zoom 0
    #[arg(long, default_value_t = DEFAULT_RESOLUTION_BASE)]
    resolution_base: f64,

    /// Ratio between the resolutions of consecutive zoom levels
    #[arg(long, default_value_t = DEFAULT_RESOLUTION_MULTIPLIER)]
    resolution_multiplier: f64,

    /// Explicit comma-separated resolutions from minzoom up (overrides base/multiplier)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    resolutions: Option<Vec<f64>>,

    /// Preferred geometry column
    #[arg(long, default_value = "geometry")]
    geometry_column: String,

    /// Maximum rows per Parquet row group
    #[arg(long, default_value_t = DEFAULT_ROW_GROUP_SIZE)]
    parquet_row_group_size: usize,

    /// Write one hive partition per zoom level instead of a single file
    #[arg(long)]
    parquet_partition_by_zoomlevel: bool,

    /// Column compression (none, snappy, gzip, zstd)
    #[arg(long, default_value = "snappy")]
    compression: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn parse_compression(&self) -> Result<Compression> {
        Compression::from_str(&self.compression)
            .with_context(|| format!("Invalid compression: {}", self.compression))
    }

    fn resolution_model(&self) -> ResolutionModel {
        match &self.resolutions {
            Some(table) => ResolutionModel::explicit(table.iter().copied()),
            None => ResolutionModel::geometric(self.resolution_base, self.resolution_multiplier),
        }
    }

    fn config(&self) -> Result<Config> {
        let config = Config::new(self.min_zoom, self.max_zoom)
            .with_resolution(self.resolution_model())
            .with_geometry_column(&self.geometry_column)
            .with_row_group_size(self.parquet_row_group_size)
            .with_partition_by_zoomlevel(self.parquet_partition_by_zoomlevel)
            .with_compression(self.parse_compression()?);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let config = args.config()?;
    let converter = Converter::new(config);

    let summary = converter
        .convert(&args.input, &args.output)
        .with_context(|| format!("Failed to build pyramid from {}", args.input.display()))?;

    for (zoom, count) in &summary.levels {
        log::debug!("zoomlevel {}: {} features", zoom, count);
    }

    if args.parquet_partition_by_zoomlevel {
        println!(
            "✓ Wrote {} features in {} partitions to {}",
            summary.features,
            summary.partitions.len(),
            args.output.display()
        );
    } else {
        println!(
            "✓ Wrote {} features in {} row groups to {}",
            summary.features,
            summary.row_groups.len(),
            args.output.display()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("yosegi").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["in.parquet", "out.parquet"]).config().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_all_flags() {
        let args = parse(&[
            "in.geojson",
            "out",
            "--minzoom",
            "2",
            "--maxzoom",
            "10",
            "--resolution-base",
            "5",
            "--resolution-multiplier",
            "3",
            "--geometry-column",
            "geom",
            "--parquet-row-group-size",
            "500",
            "--parquet-partition-by-zoomlevel",
            "--compression",
            "zstd",
            "-v",
        ]);
        let config = args.config().unwrap();

        assert_eq!((config.min_zoom, config.max_zoom), (2, 10));
        assert_eq!(config.resolution, ResolutionModel::geometric(5.0, 3.0));
        assert_eq!(config.geometry_column, "geom");
        assert_eq!(config.row_group_size, 500);
        assert!(config.partition_by_zoomlevel);
        assert_eq!(config.compression, Compression::Zstd);
        assert!(args.verbose);
    }

    #[test]
    fn test_explicit_resolutions() {
        let args = parse(&["a", "b", "--maxzoom", "3", "--resolutions", "1,0.5,0.1"]);
        assert_eq!(
            args.config().unwrap().resolution,
            ResolutionModel::explicit([1.0, 0.5, 0.1])
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(parse(&["a", "b", "--compression", "lz4"]).config().is_err());
        assert!(parse(&["a", "b", "--minzoom", "5", "--maxzoom", "4"])
            .config()
            .is_err());
        assert!(parse(&["a", "b", "--parquet-row-group-size", "0"])
            .config()
            .is_err());
    }
}
