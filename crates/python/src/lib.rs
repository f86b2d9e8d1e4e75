//! Python bindings for yosegi
//!
//! This module exposes the yosegi-core functionality to Python via pyo3.

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use yosegi_core::{Compression, Config, Converter, Error, ResolutionModel};

/// Build a pyramid GeoParquet file
///
/// Args:
///     input (str): Path to input GeoParquet or GeoJSON file
///     output (str): Path to output GeoParquet file (a directory when partitioning)
///     minzoom (int, optional): Minimum zoom level. Defaults to 0.
///     maxzoom (int, optional): Maximum zoom level. Defaults to 16.
///     resolution_base (float, optional): Snapping resolution at zoom 0. Defaults to 2.5.
///     resolution_multiplier (float, optional): Ratio between consecutive zoom resolutions. Defaults to 2.0.
///     resolutions (list[float], optional): Explicit resolutions from minzoom up; overrides base and multiplier.
///     geometry_column (str, optional): Preferred geometry column. Defaults to "geometry".
///     row_group_size (int, optional): Maximum rows per row group. Defaults to 10240.
///     partition_by_zoomlevel (bool, optional): Write one hive partition per zoom level. Defaults to False.
///     compression (str, optional): Column compression ("none", "snappy", "gzip", "zstd"). Defaults to "snappy".
///
/// Returns:
///     dict: "features", "levels" (zoom -> count), "row_groups" (row counts), "partitions" (paths)
///
/// Raises:
///     ValueError: If invalid parameters
///     RuntimeError: If conversion fails
///
/// Example:
///     >>> from yosegi import convert
///     >>> convert("places.parquet", "pyramid.parquet", maxzoom=14)
///     >>> convert("places.geojson", "pyramid", partition_by_zoomlevel=True)
#[pyfunction]
#[pyo3(signature = (input, output, minzoom=0, maxzoom=16, resolution_base=2.5, resolution_multiplier=2.0, resolutions=None, geometry_column="geometry", row_group_size=10240, partition_by_zoomlevel=false, compression="snappy"))]
#[allow(clippy::too_many_arguments)]
fn convert<'py>(
    py: Python<'py>,
    input: &str,
    output: &str,
    minzoom: u8,
    maxzoom: u8,
    resolution_base: f64,
    resolution_multiplier: f64,
    resolutions: Option<Vec<f64>>,
    geometry_column: &str,
    row_group_size: usize,
    partition_by_zoomlevel: bool,
    compression: &str,
) -> PyResult<Bound<'py, PyDict>> {
    let compression = Compression::from_str(compression).ok_or_else(|| {
        PyValueError::new_err(format!(
            "Invalid compression: '{}'. Valid options: none, snappy, gzip, zstd",
            compression
        ))
    })?;

    let resolution = match resolutions {
        Some(table) => ResolutionModel::explicit(table),
        None => ResolutionModel::geometric(resolution_base, resolution_multiplier),
    };

    let config = Config::new(minzoom, maxzoom)
        .with_resolution(resolution)
        .with_geometry_column(geometry_column)
        .with_row_group_size(row_group_size)
        .with_partition_by_zoomlevel(partition_by_zoomlevel)
        .with_compression(compression);
    config.validate().map_err(to_py_err)?;

    let converter = Converter::new(config);
    let summary = py
        .allow_threads(|| converter.convert(input, output))
        .map_err(to_py_err)?;

    let result = PyDict::new_bound(py);
    result.set_item("features", summary.features)?;
    result.set_item("levels", summary.levels)?;
    result.set_item("row_groups", summary.row_groups)?;
    result.set_item(
        "partitions",
        summary
            .partitions
            .iter()
            .map(|p| p.path.display().to_string())
            .collect::<Vec<_>>(),
    )?;
    Ok(result)
}

fn to_py_err(err: Error) -> PyErr {
    match err {
        Error::InvalidConfig(msg) => PyValueError::new_err(msg),
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

/// yosegi: pyramid GeoParquet generator
///
/// This module provides Python bindings for the yosegi Rust library.
#[pymodule]
fn yosegi(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(convert, m)?)?;
    Ok(())
}
