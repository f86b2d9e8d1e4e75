//! Pyramid pipeline: wires together reading, level assignment, ordering, and output.
//!
//! 1. Read the input into one Arrow table (uid = row index)
//! 2. Reduce every geometry to a representative point
//! 3. Assign zoom levels with the precision schedule
//! 4. Order each level by (quadkey at `max_zoom`, uid)
//! 5. Pack levels into bounded row groups, or write one partition per level

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{ArrayRef, Int32Array, RecordBatch, StringArray, UInt64Array};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use arrow_select::take::take;
use rayon::prelude::*;

use crate::assign::{AbortSignal, Assignment, LevelAssignor, RoundStats};
use crate::engine::GeometryEngine;
use crate::packer::RowGroupPacker;
use crate::reader::{read_input, InputTable};
use crate::validate::build_feature_set;
use crate::writer::{
    write_partitioned, writer_properties, GeoParquetSink, Partition, PARTITION_COLUMN,
};
use crate::{Config, Error, Result};

/// Name of the ordering-key output column.
pub const QUADKEY_COLUMN: &str = "quadkey";

/// What a conversion produced.
#[derive(Debug, Clone, Default)]
pub struct ConversionSummary {
    /// Number of input features (all of them appear in the output)
    pub features: usize,
    /// Feature count per zoom level
    pub levels: BTreeMap<u8, usize>,
    /// Row counts of the packed row groups (empty in partitioned mode)
    pub row_groups: Vec<usize>,
    /// Written partitions (empty in packed mode)
    pub partitions: Vec<Partition>,
    /// Deduplication rounds that ran
    pub rounds: Vec<RoundStats>,
    /// Features placed on `max_zoom` without deduplication
    pub fallback: usize,
}

/// Build a pyramid GeoParquet from `input` into `output`.
///
/// `output` is a file in packed mode and a directory in partitioned mode.
pub fn build_pyramid<E: GeometryEngine + ?Sized>(
    input: &Path,
    output: &Path,
    config: &Config,
    engine: &E,
    abort: &AbortSignal,
) -> Result<ConversionSummary> {
    config.validate()?;
    let schedule = config.schedule()?;

    let table = read_input(input, &config.geometry_column, engine)?;
    log::info!(
        "Read {} features from {} (geometry column '{}')",
        table.num_rows(),
        input.display(),
        table.geometry_column_name()
    );

    let features = build_feature_set(&table, engine)?;
    if let Some([min_x, min_y, max_x, max_y]) = features.bounds().to_array() {
        log::debug!(
            "Representative points span ({}, {}) - ({}, {})",
            min_x,
            min_y,
            max_x,
            max_y
        );
    }

    let (assignment, report) = LevelAssignor::new(&schedule, engine)
        .with_abort(abort.clone())
        .run(&features)?;

    let levels = assignment.level_counts();
    for (zoom, count) in &levels {
        log::info!("  Zoom {}: {} features", zoom, count);
    }
    log::info!(
        "Assigned levels in {} rounds, {} features fell through to zoom {}",
        report.rounds.len(),
        report.fallback,
        config.max_zoom
    );

    let keys: Vec<String> = features
        .points()
        .par_iter()
        .map(|p| engine.ordering_key(p, config.max_zoom))
        .collect();
    let ordered = order_levels(&assignment, &keys, config.min_zoom, config.max_zoom);

    let props = writer_properties(config.row_group_size, config.compression);

    let mut summary = ConversionSummary {
        features: features.len(),
        levels,
        rounds: report.rounds,
        fallback: report.fallback,
        ..Default::default()
    };

    if config.partition_by_zoomlevel {
        let schema = output_schema(&table, false)?;
        let batches = ordered
            .iter()
            .map(|(zoom, uids)| level_batch(&table, &schema, uids, *zoom, &keys).map(|b| (*zoom, b)))
            .collect::<Result<Vec<_>>>()?;

        summary.partitions = write_partitioned(output, batches, &props)?;
        log::info!(
            "Wrote {} partitions under {}",
            summary.partitions.len(),
            output.display()
        );
    } else {
        let schema = output_schema(&table, true)?;
        let sink = GeoParquetSink::create(output, schema.clone(), props)?;
        let mut packer = RowGroupPacker::new(sink, config.row_group_size)?;

        for (zoom, uids) in &ordered {
            packer.push_level(level_batch(&table, &schema, uids, *zoom, &keys)?)?;
        }

        let (sink, stats) = packer.finish()?;
        sink.close()?;
        log::info!(
            "Wrote {} rows in {} row groups to {}",
            stats.total_rows(),
            stats.row_groups.len(),
            output.display()
        );
        summary.row_groups = stats.row_groups;
    }

    Ok(summary)
}

/// Group uids by zoom level and order each level by `(keys[uid], uid)`.
///
/// Returns one entry per zoom in `[min_zoom, max_zoom]`, ascending, including
/// empty levels.
pub fn order_levels(
    assignment: &Assignment,
    keys: &[String],
    min_zoom: u8,
    max_zoom: u8,
) -> Vec<(u8, Vec<usize>)> {
    let mut levels: Vec<(u8, Vec<usize>)> =
        (min_zoom..=max_zoom).map(|z| (z, Vec::new())).collect();

    for (uid, zoom) in assignment.iter() {
        levels[usize::from(zoom - min_zoom)].1.push(uid);
    }

    // uids are pushed ascending, so a stable sort on the key breaks ties by uid
    for (_, uids) in &mut levels {
        uids.sort_by(|a, b| keys[*a].cmp(&keys[*b]));
    }

    levels
}

/// Output schema: attributes in input order, the WKB geometry field as read, then
/// `zoomlevel` (packed mode only) and `quadkey`.
pub fn output_schema(table: &InputTable, with_zoomlevel: bool) -> Result<SchemaRef> {
    let input = table.schema();
    let geometry_index = table.geometry_index();
    let mut fields: Vec<Field> = Vec::with_capacity(input.fields().len() + 2);

    for (i, field) in input.fields().iter().enumerate() {
        if i == geometry_index {
            continue;
        }
        if field.name() == PARTITION_COLUMN || field.name() == QUADKEY_COLUMN {
            return Err(Error::InputRead(format!(
                "Input column '{}' clashes with an output column",
                field.name()
            )));
        }
        fields.push(field.as_ref().clone());
    }

    fields.push(input.field(geometry_index).clone());
    if with_zoomlevel {
        fields.push(Field::new(PARTITION_COLUMN, DataType::Int32, false));
    }
    fields.push(Field::new(QUADKEY_COLUMN, DataType::Utf8, false));

    Ok(Arc::new(Schema::new(fields)))
}

/// Rows of one zoom level, in the given uid order, shaped to `schema`.
///
/// Every input column, geometry included, is gathered with `take`, so the
/// geometry bytes are the input's.
fn level_batch(
    table: &InputTable,
    schema: &SchemaRef,
    uids: &[usize],
    zoom: u8,
    keys: &[String],
) -> Result<RecordBatch> {
    let indices = UInt64Array::from_iter_values(uids.iter().map(|&uid| uid as u64));
    let batch = table.batch();
    let geometry_index = table.geometry_index();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());

    for (i, column) in batch.columns().iter().enumerate() {
        if i != geometry_index {
            columns.push(take(column.as_ref(), &indices, None)?);
        }
    }
    columns.push(take(batch.column(geometry_index).as_ref(), &indices, None)?);

    if schema.column_with_name(PARTITION_COLUMN).is_some() {
        columns.push(Arc::new(Int32Array::from(vec![i32::from(zoom); uids.len()])));
    }
    columns.push(Arc::new(StringArray::from_iter_values(
        uids.iter().map(|&uid| keys[uid].as_str()),
    )));

    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}
