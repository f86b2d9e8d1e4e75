//! GeoParquet output: the packed row-group sink and the hive-partitioned writer.
//!
//! Batches pass through a `geoparquet` record-batch encoder, which also
//! collects the bounding box and geometry types for the file's `geo` metadata.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use geoparquet::writer::{GeoParquetRecordBatchEncoder, GeoParquetWriterOptions};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::compression::Compression;
use crate::packer::RowGroupSink;
use crate::{Error, Result};

/// Name of the hive partition column.
pub const PARTITION_COLUMN: &str = "zoomlevel";

/// Writer properties for pyramid output.
///
/// `max_rows` caps every row group the underlying writer emits on its own.
pub fn writer_properties(max_rows: usize, compression: Compression) -> WriterProperties {
    WriterProperties::builder()
        .set_max_row_group_size(max_rows)
        .set_compression(compression.to_parquet())
        .build()
}

/// GeoParquet writer; each [`RowGroupSink::write_row_group`] call becomes one row group.
///
/// The geometry column of `schema` must carry a GeoArrow extension type.
pub struct GeoParquetSink<W: Write + Send> {
    writer: ArrowWriter<W>,
    encoder: GeoParquetRecordBatchEncoder,
}

impl GeoParquetSink<File> {
    /// Create `path` and write the Parquet header.
    pub fn create(path: &Path, schema: SchemaRef, props: WriterProperties) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::OutputWrite(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let file = File::create(path).map_err(|e| {
            Error::OutputWrite(format!("Failed to create {}: {}", path.display(), e))
        })?;
        Self::new(file, schema, props)
    }
}

impl<W: Write + Send> GeoParquetSink<W> {
    pub fn new(writer: W, schema: SchemaRef, props: WriterProperties) -> Result<Self> {
        let encoder =
            GeoParquetRecordBatchEncoder::try_new(&schema, &GeoParquetWriterOptions::default())
                .map_err(|e| {
                    Error::OutputWrite(format!("Failed to create GeoParquet encoder: {}", e))
                })?;
        let writer = ArrowWriter::try_new(writer, encoder.target_schema(), Some(props))
            .map_err(|e| Error::OutputWrite(format!("Failed to create writer: {}", e)))?;
        Ok(Self { writer, encoder })
    }

    /// Write rows without closing the current row group.
    fn write_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        let encoded = self
            .encoder
            .encode_record_batch(batch)
            .map_err(|e| Error::OutputWrite(format!("Failed to encode geometries: {}", e)))?;
        self.writer
            .write(&encoded)
            .map_err(|e| Error::OutputWrite(format!("Failed to write rows: {}", e)))
    }

    /// Attach the `geo` metadata, write the footer and return the inner writer.
    pub fn close(self) -> Result<W> {
        let Self {
            mut writer,
            encoder,
        } = self;
        let geo = encoder
            .into_keyvalue()
            .map_err(|e| Error::OutputWrite(format!("Failed to encode 'geo' metadata: {}", e)))?;
        writer.append_key_value_metadata(geo);
        writer
            .into_inner()
            .map_err(|e| Error::OutputWrite(format!("Failed to close writer: {}", e)))
    }
}

impl<W: Write + Send> RowGroupSink<RecordBatch> for GeoParquetSink<W> {
    fn write_row_group(&mut self, parts: Vec<RecordBatch>) -> Result<()> {
        for part in &parts {
            self.write_batch(part)?;
        }
        self.writer
            .flush()
            .map_err(|e| Error::OutputWrite(format!("Failed to flush row group: {}", e)))
    }
}

/// One written partition of a hive-partitioned output.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub zoom: u8,
    pub path: PathBuf,
    pub rows: usize,
}

/// Directory of the partition holding `zoom` under `root`.
pub fn partition_dir(root: &Path, zoom: u8) -> PathBuf {
    root.join(format!("{}={}", PARTITION_COLUMN, zoom))
}

/// Write each level to `<root>/zoomlevel=<z>/data_0.parquet`.
///
/// Levels must be in ascending zoom order; empty levels produce no partition.
/// Row groups are bounded by the `max_row_group_size` of `props`.
pub fn write_partitioned<I>(root: &Path, levels: I, props: &WriterProperties) -> Result<Vec<Partition>>
where
    I: IntoIterator<Item = (u8, RecordBatch)>,
{
    std::fs::create_dir_all(root)
        .map_err(|e| Error::OutputWrite(format!("Failed to create {}: {}", root.display(), e)))?;

    let mut partitions = Vec::new();
    for (zoom, batch) in levels {
        if batch.num_rows() == 0 {
            continue;
        }

        let path = partition_dir(root, zoom).join("data_0.parquet");
        let mut sink = GeoParquetSink::create(&path, batch.schema(), props.clone())?;
        sink.write_batch(&batch)?;
        sink.close()?;

        log::debug!("Partition {}: {} rows", path.display(), batch.num_rows());

        partitions.push(Partition {
            zoom,
            path,
            rows: batch.num_rows(),
        });
    }

    Ok(partitions)
}
