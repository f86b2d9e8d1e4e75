//! Core library for building pyramid GeoParquet files.
//!
//! Every feature is given the coarsest zoom level at which it stays spatially
//! distinguishable from the features already placed. Features are then
//! written ordered by (zoom level, quadkey) into row groups of bounded size,
//! so a reader interested in low zooms only touches the first few row groups.
//!
//! # Examples
//!
//! ```no_run
//! use yosegi_core::{Config, Converter};
//!
//! let config = Config {
//!     min_zoom: 0,
//!     max_zoom: 14,
//!     ..Default::default()
//! };
//!
//! let converter = Converter::new(config);
//! let summary = converter.convert("input.parquet", "pyramid.parquet").unwrap();
//! println!("{} features in {} row groups", summary.features, summary.row_groups.len());
//! ```

use std::path::Path;

use arrow_schema::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

pub mod assign;
pub mod compression;
pub mod engine;
pub mod packer;
pub mod pipeline;
pub mod reader;
pub mod schedule;
pub mod tile;
pub mod validate;
pub mod writer;

pub use assign::{AbortSignal, Assignment, FeatureSet, LevelAssignor};
pub use compression::Compression;
pub use engine::{GeoEngine, GeometryEngine, WkbError};
pub use packer::{plan_row_groups, RowGroupPacker, RowGroupSink};
pub use pipeline::ConversionSummary;
pub use schedule::{PrecisionSchedule, ResolutionModel, MAX_ZOOM};

/// Errors that can occur while building a pyramid
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read input: {0}")]
    InputRead(String),

    #[error("Invalid geometry at feature {feature_id}: {reason}")]
    InvalidGeometry { feature_id: usize, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to write output: {0}")]
    OutputWrite(String),

    #[error("Aborted after {completed_rounds} rounds")]
    Aborted { completed_rounds: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Default upper bound on rows per row group
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10240;

/// Default geometry column name
pub const DEFAULT_GEOMETRY_COLUMN: &str = "geometry";

/// Configuration for a pyramid conversion
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Coarsest zoom level
    pub min_zoom: u8,
    /// Finest zoom level; catches every feature not placed earlier
    pub max_zoom: u8,
    /// Snapping resolution per zoom
    pub resolution: ResolutionModel,
    /// Preferred geometry column of the input
    pub geometry_column: String,
    /// Maximum rows per row group
    pub row_group_size: usize,
    /// Write one hive partition per zoom level instead of a packed file
    pub partition_by_zoomlevel: bool,
    /// Column compression codec
    pub compression: Compression,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_zoom: 0,
            max_zoom: 16,
            resolution: ResolutionModel::default(),
            geometry_column: DEFAULT_GEOMETRY_COLUMN.to_string(),
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            partition_by_zoomlevel: false,
            compression: Compression::default(),
        }
    }
}

impl Config {
    /// Create a new config for a zoom range.
    pub fn new(min_zoom: u8, max_zoom: u8) -> Self {
        Self {
            min_zoom,
            max_zoom,
            ..Default::default()
        }
    }

    /// Set the resolution model.
    pub fn with_resolution(mut self, resolution: ResolutionModel) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the preferred geometry column.
    pub fn with_geometry_column(mut self, name: impl Into<String>) -> Self {
        self.geometry_column = name.into();
        self
    }

    /// Set the maximum rows per row group.
    pub fn with_row_group_size(mut self, rows: usize) -> Self {
        self.row_group_size = rows;
        self
    }

    /// Enable or disable partitioning by zoom level.
    pub fn with_partition_by_zoomlevel(mut self, enabled: bool) -> Self {
        self.partition_by_zoomlevel = enabled;
        self
    }

    /// Set the compression codec.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Precision schedule for this configuration.
    pub fn schedule(&self) -> Result<PrecisionSchedule> {
        PrecisionSchedule::new(self.min_zoom, self.max_zoom, &self.resolution)
    }

    /// Check every setting without touching any file.
    pub fn validate(&self) -> Result<()> {
        self.schedule()?;
        if self.row_group_size == 0 {
            return Err(Error::InvalidConfig(
                "row group size must be at least 1".to_string(),
            ));
        }
        if self.geometry_column.is_empty() {
            return Err(Error::InvalidConfig(
                "geometry column name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Main converter struct
pub struct Converter {
    config: Config,
    abort: AbortSignal,
}

impl Converter {
    /// Create a new converter with the given configuration
    pub fn new(config: Config) -> Self {
        Self {
            config,
            abort: AbortSignal::new(),
        }
    }

    /// Use `signal` to stop the conversion between deduplication rounds.
    pub fn with_abort(mut self, signal: AbortSignal) -> Self {
        self.abort = signal;
        self
    }

    /// Convert a GeoParquet or GeoJSON file into a pyramid GeoParquet.
    ///
    /// The configuration is validated before the input is opened.
    pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input: P,
        output: Q,
    ) -> Result<ConversionSummary> {
        let input_path = input.as_ref();
        let output_path = output.as_ref();

        self.config.validate()?;

        log::info!(
            "Converting {} to {} (zoom {}..={}, {} rows per row group)",
            input_path.display(),
            output_path.display(),
            self.config.min_zoom,
            self.config.max_zoom,
            self.config.row_group_size
        );

        pipeline::build_pyramid(
            input_path,
            output_path,
            &self.config,
            &GeoEngine,
            &self.abort,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.min_zoom, 0);
        assert_eq!(config.max_zoom, 16);
        assert_eq!(config.row_group_size, 10240);
        assert_eq!(config.geometry_column, "geometry");
        assert!(!config.partition_by_zoomlevel);
        assert_eq!(config.compression, Compression::Snappy);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = Config::new(2, 8)
            .with_resolution(ResolutionModel::geometric(1.0, 3.0))
            .with_geometry_column("geom")
            .with_row_group_size(100)
            .with_partition_by_zoomlevel(true)
            .with_compression(Compression::Zstd);

        assert_eq!(config.min_zoom, 2);
        assert_eq!(config.max_zoom, 8);
        assert_eq!(config.geometry_column, "geom");
        assert_eq!(config.row_group_size, 100);
        assert!(config.partition_by_zoomlevel);
        assert_eq!(config.schedule().unwrap().len(), 6);
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::new(5, 4).validate().is_err());
        assert!(Config::default().with_row_group_size(0).validate().is_err());
        assert!(Config::default()
            .with_resolution(ResolutionModel::geometric(2.5, 1.0))
            .validate()
            .is_err());
        assert!(Config::default().with_geometry_column("").validate().is_err());
    }

    #[test]
    fn test_convert_nonexistent_file() {
        let converter = Converter::new(Config::default());

        let result = converter.convert("/nonexistent/file.parquet", "/tmp/output.parquet");

        match result {
            Err(Error::InputRead(_)) => {} // Expected error type
            other => panic!("Expected InputRead error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_checked_before_input() {
        let converter = Converter::new(Config::new(3, 1));
        let result = converter.convert("/nonexistent/file.parquet", "/tmp/output.parquet");
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
