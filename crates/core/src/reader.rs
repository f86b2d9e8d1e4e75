//! Input loading: GeoParquet and GeoJSON into a single Arrow table.
//!
//! The whole input is materialized as one [`RecordBatch`] because level
//! assignment needs random access to every feature. The row index of the
//! batch is the feature uid.
//!
//! GeoParquet geometry columns are resolved through the `geo` file metadata
//! with the `geoparquet` reader, and decoded as GeoArrow arrays. WKB and
//! native encodings are both accepted.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    ArrayRef, BinaryArray, BooleanArray, Float64Array, Int64Array, RecordBatch,
    StringArray,
};
use arrow_schema::{ArrowError, DataType, Field, FieldRef, Schema, SchemaRef};
use arrow_select::concat::concat_batches;
use geo::Geometry;
use geo_traits::to_geo::ToGeoGeometry;
use geoarrow::array::from_arrow_array;
use geoarrow::datatypes::{CoordType, GeoArrowType, WkbType};
use geoarrow_array::cast::{to_wkb, AsGeoArrowArray};
use geoarrow_array::{GeoArrowArray, GeoArrowArrayAccessor};
use geojson::{GeoJson, JsonObject, JsonValue};
use geoparquet::reader::GeoParquetReaderBuilder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::engine::GeometryEngine;
use crate::validate::InvalidReason;
use crate::{Error, Result};

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    GeoParquet,
    GeoJson,
}

impl InputFormat {
    /// Detect the format from the file extension, falling back to the leading bytes.
    pub fn detect(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("parquet") | Some("geoparquet") => return Ok(Self::GeoParquet),
            Some("geojson") | Some("json") => return Ok(Self::GeoJson),
            _ => {}
        }

        let mut head = [0u8; 64];
        let mut file = File::open(path)
            .map_err(|e| Error::InputRead(format!("Failed to open {}: {}", path.display(), e)))?;
        let n = file.read(&mut head)?;

        if head[..n].starts_with(b"PAR1") {
            return Ok(Self::GeoParquet);
        }
        if head[..n]
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|&b| b == b'{')
        {
            return Ok(Self::GeoJson);
        }

        Err(Error::InputRead(format!(
            "Cannot determine the format of {}",
            path.display()
        )))
    }
}

/// A decoded input geometry, or why it cannot be used.
pub type DecodedGeometry = std::result::Result<Geometry<f64>, InvalidReason>;

/// Input features as one Arrow batch plus the position of the geometry column.
///
/// In the batch the geometry column always holds WKB: WKB input is kept byte
/// for byte, native GeoArrow input is encoded once on load. Decoding for
/// representative points goes through the original GeoArrow array.
pub struct InputTable {
    batch: RecordBatch,
    geometry_index: usize,
    geometry: Arc<dyn GeoArrowArray>,
}

impl InputTable {
    /// Wrap `batch`, whose field at `geometry_index` must carry a GeoArrow
    /// extension type.
    pub fn new(batch: RecordBatch, geometry_index: usize) -> Result<Self> {
        let schema = batch.schema();
        let field = schema.fields().get(geometry_index).cloned().ok_or_else(|| {
            Error::InputRead(format!("Geometry column index {} out of range", geometry_index))
        })?;
        let column = batch.column(geometry_index).clone();

        let geometry = from_arrow_array(column.as_ref(), &field).map_err(|e| {
            Error::InputRead(format!(
                "Column '{}' is not a GeoArrow geometry column: {}",
                field.name(),
                e
            ))
        })?;

        let (wkb_column, wkb_type) = match geometry.data_type() {
            GeoArrowType::Wkb(_) | GeoArrowType::LargeWkb(_) | GeoArrowType::WkbView(_) => {
                (column, geometry.data_type())
            }
            native => {
                log::debug!(
                    "Encoding native {:?} column '{}' as WKB",
                    native,
                    field.name()
                );
                let wkb = to_wkb::<i32>(geometry.as_ref()).map_err(|e| {
                    Error::InputRead(format!("Failed to encode '{}' as WKB: {}", field.name(), e))
                })?;
                (wkb.to_array_ref(), wkb.data_type())
            }
        };

        let mut fields: Vec<FieldRef> = schema.fields().iter().cloned().collect();
        fields[geometry_index] = Arc::new(wkb_type.to_field(field.name(), field.is_nullable()));
        let mut columns = batch.columns().to_vec();
        columns[geometry_index] = wkb_column;

        // File-level metadata such as the input `geo` key is not carried over
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

        Ok(Self {
            batch,
            geometry_index,
            geometry,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn geometry_index(&self) -> usize {
        self.geometry_index
    }

    pub fn geometry_column_name(&self) -> String {
        self.batch.schema().field(self.geometry_index).name().clone()
    }

    /// Decode every geometry in row order.
    ///
    /// The callback receives the row index (the uid) and the decoded geometry;
    /// nulls, empty geometries and undecodable values are passed as errors.
    pub fn for_each_geometry<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(usize, DecodedGeometry) -> Result<()>,
    {
        visit_geoarrow_array(self.geometry.as_ref(), &mut callback)
    }
}

/// Dispatch on the concrete GeoArrow type and visit each row.
fn visit_geoarrow_array<F>(array: &dyn GeoArrowArray, callback: &mut F) -> Result<()>
where
    F: FnMut(usize, DecodedGeometry) -> Result<()>,
{
    match array.data_type() {
        GeoArrowType::Point(_) => visit_typed_array(array.as_point(), callback),
        GeoArrowType::LineString(_) => visit_typed_array(array.as_line_string(), callback),
        GeoArrowType::Polygon(_) => visit_typed_array(array.as_polygon(), callback),
        GeoArrowType::MultiPoint(_) => visit_typed_array(array.as_multi_point(), callback),
        GeoArrowType::MultiLineString(_) => {
            visit_typed_array(array.as_multi_line_string(), callback)
        }
        GeoArrowType::MultiPolygon(_) => visit_typed_array(array.as_multi_polygon(), callback),
        GeoArrowType::Geometry(_) => visit_typed_array(array.as_geometry(), callback),
        GeoArrowType::GeometryCollection(_) => {
            visit_typed_array(array.as_geometry_collection(), callback)
        }
        GeoArrowType::Wkb(_) => visit_typed_array(array.as_wkb::<i32>(), callback),
        GeoArrowType::LargeWkb(_) => visit_typed_array(array.as_wkb::<i64>(), callback),
        GeoArrowType::WkbView(_) => visit_typed_array(array.as_wkb_view(), callback),
        other => Err(Error::InputRead(format!(
            "Unsupported geometry type: {:?}",
            other
        ))),
    }
}

fn visit_typed_array<'a, A, F>(accessor: &'a A, callback: &mut F) -> Result<()>
where
    A: GeoArrowArrayAccessor<'a>,
    A::Item: ToGeoGeometry<f64>,
    F: FnMut(usize, DecodedGeometry) -> Result<()>,
{
    for (row, item) in accessor.iter().enumerate() {
        let decoded = match item {
            None => Err(InvalidReason::NullGeometry),
            Some(Err(e)) => Err(InvalidReason::Undecodable(e.to_string())),
            Some(Ok(geom)) => geom
                .try_to_geometry()
                .ok_or(InvalidReason::EmptyGeometry),
        };
        callback(row, decoded)?;
    }
    Ok(())
}

/// Read a GeoParquet or GeoJSON file.
///
/// `geometry_column` is the preferred geometry column; see [`read_geoparquet`]
/// for how the column is chosen when it is absent. GeoJSON geometries are
/// encoded with `engine`.
pub fn read_input<E: GeometryEngine + ?Sized>(
    path: &Path,
    geometry_column: &str,
    engine: &E,
) -> Result<InputTable> {
    if !path.exists() {
        return Err(Error::InputRead(format!(
            "Input file does not exist: {}",
            path.display()
        )));
    }

    let table = match InputFormat::detect(path)? {
        InputFormat::GeoParquet => read_geoparquet(path, geometry_column)?,
        InputFormat::GeoJson => read_geojson(path, geometry_column, engine)?,
    };

    if table.num_rows() == 0 {
        log::warn!("Input {} has no features", path.display());
    }

    Ok(table)
}

/// Read a GeoParquet file into one batch.
///
/// Geometry columns are those declared in the `geo` file metadata, or fields
/// tagged with a GeoArrow extension type. The column named `geometry_column`
/// is used when it is one of them, then the metadata's primary column, then
/// the first geometry column in schema order. A file without any geometry
/// markers may still carry WKB in a plain binary column named
/// `geometry_column`.
pub fn read_geoparquet(path: &Path, geometry_column: &str) -> Result<InputTable> {
    let file = File::open(path)
        .map_err(|e| Error::InputRead(format!("Failed to open {}: {}", path.display(), e)))?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::InputRead(format!("Failed to create reader: {}", e)))?;

    let raw_schema = builder.schema().clone();
    let (geo_schema, primary_column) = match builder.geoparquet_metadata() {
        Some(metadata) => {
            let metadata = metadata.map_err(|e| {
                Error::InputRead(format!("Failed to parse GeoParquet metadata: {}", e))
            })?;
            // Keep WKB as WKB; native encodings map to GeoArrow's separated coordinates
            let schema = builder
                .geoarrow_schema(&metadata, false, CoordType::Separated)
                .map_err(|e| Error::InputRead(format!("Failed to infer schema: {}", e)))?;
            (schema, Some(metadata.primary_column.clone()))
        }
        None => (raw_schema.clone(), None),
    };

    let (geometry_index, geometry_field) =
        choose_geometry_column(&geo_schema, primary_column.as_deref(), geometry_column)?;

    let reader = builder
        .build()
        .map_err(|e| Error::InputRead(format!("Failed to build reader: {}", e)))?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, ArrowError>>()
        .map_err(|e| Error::InputRead(format!("Failed to read batch: {}", e)))?;

    log::debug!(
        "Read {} batches from {}",
        batches.len(),
        path.display()
    );

    let batch = concat_batches(&raw_schema, &batches)?;

    let mut fields: Vec<FieldRef> = raw_schema.fields().iter().cloned().collect();
    fields[geometry_index] = Arc::new(geometry_field);
    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), batch.columns().to_vec())?;

    InputTable::new(batch, geometry_index)
}

fn is_geometry_field(field: &Field) -> bool {
    GeoArrowType::try_from(field).is_ok()
}

/// WKB field for a binary column that carries no extension metadata.
fn untagged_wkb_field(field: &Field) -> Option<Field> {
    let wkb = WkbType::new(Default::default());
    let geo_type = match field.data_type() {
        DataType::Binary => GeoArrowType::Wkb(wkb),
        DataType::LargeBinary => GeoArrowType::LargeWkb(wkb),
        DataType::BinaryView => GeoArrowType::WkbView(wkb),
        _ => return None,
    };
    Some(geo_type.to_field(field.name(), field.is_nullable()))
}

/// Nullable `geoarrow.wkb` field named `name`.
pub fn wkb_field(name: &str) -> Field {
    GeoArrowType::Wkb(WkbType::new(Default::default())).to_field(name, true)
}

fn choose_geometry_column(
    schema: &Schema,
    primary_column: Option<&str>,
    preferred: &str,
) -> Result<(usize, Field)> {
    if let Ok(index) = schema.index_of(preferred) {
        let field = schema.field(index);
        if is_geometry_field(field) {
            return Ok((index, field.clone()));
        }
        let unmarked =
            primary_column.is_none() && !schema.fields().iter().any(|f| is_geometry_field(f));
        if let Some(field) = untagged_wkb_field(field).filter(|_| unmarked) {
            return Ok((index, field));
        }
    }

    let index = primary_column
        .and_then(|name| schema.index_of(name).ok())
        .filter(|&i| is_geometry_field(schema.field(i)))
        .or_else(|| schema.fields().iter().position(|f| is_geometry_field(f)))
        .ok_or_else(|| Error::InputRead("No geometry column found".to_string()))?;

    log::info!("Using geometry column '{}'", schema.field(index).name());
    Ok((index, schema.field(index).clone()))
}

/// Inferred Arrow type of a GeoJSON property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropertyKind {
    Int64,
    Float64,
    Boolean,
    Utf8,
    /// Mixed or nested values, kept as JSON text
    Json,
}

fn infer_kind<'a>(values: impl Iterator<Item = &'a JsonValue>) -> PropertyKind {
    let mut kind: Option<PropertyKind> = None;
    for value in values {
        let this = match value {
            JsonValue::Null => continue,
            JsonValue::Bool(_) => PropertyKind::Boolean,
            JsonValue::Number(n) if n.is_i64() => PropertyKind::Int64,
            JsonValue::Number(_) => PropertyKind::Float64,
            JsonValue::String(_) => PropertyKind::Utf8,
            JsonValue::Array(_) | JsonValue::Object(_) => return PropertyKind::Json,
        };
        kind = Some(match (kind, this) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(PropertyKind::Int64), PropertyKind::Float64)
            | (Some(PropertyKind::Float64), PropertyKind::Int64) => PropertyKind::Float64,
            _ => return PropertyKind::Json,
        });
    }
    kind.unwrap_or(PropertyKind::Utf8)
}

fn present<'a>(value: &Option<&'a JsonValue>) -> Option<&'a JsonValue> {
    value.filter(|v| !v.is_null())
}

fn property_array(kind: PropertyKind, values: &[Option<&JsonValue>]) -> ArrayRef {
    match kind {
        PropertyKind::Int64 => Arc::new(
            values
                .iter()
                .map(|v| present(v).and_then(JsonValue::as_i64))
                .collect::<Int64Array>(),
        ),
        PropertyKind::Float64 => Arc::new(
            values
                .iter()
                .map(|v| present(v).and_then(JsonValue::as_f64))
                .collect::<Float64Array>(),
        ),
        PropertyKind::Boolean => Arc::new(
            values
                .iter()
                .map(|v| present(v).and_then(JsonValue::as_bool))
                .collect::<BooleanArray>(),
        ),
        PropertyKind::Utf8 => Arc::new(
            values
                .iter()
                .map(|v| present(v).and_then(JsonValue::as_str))
                .collect::<StringArray>(),
        ),
        PropertyKind::Json => Arc::new(
            values
                .iter()
                .map(|v| {
                    present(v).map(|v| match v {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                })
                .collect::<StringArray>(),
        ),
    }
}

fn arrow_type(kind: PropertyKind) -> DataType {
    match kind {
        PropertyKind::Int64 => DataType::Int64,
        PropertyKind::Float64 => DataType::Float64,
        PropertyKind::Boolean => DataType::Boolean,
        PropertyKind::Utf8 | PropertyKind::Json => DataType::Utf8,
    }
}

/// Read a GeoJSON FeatureCollection, Feature or bare Geometry.
///
/// Properties become columns in first-seen order; the geometry becomes a WKB
/// column named `geometry_column`, placed last.
pub fn read_geojson<E: GeometryEngine + ?Sized>(
    path: &Path,
    geometry_column: &str,
    engine: &E,
) -> Result<InputTable> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::InputRead(format!("Failed to read {}: {}", path.display(), e)))?;
    let geojson: GeoJson = text
        .parse()
        .map_err(|e| Error::InputRead(format!("Invalid GeoJSON: {}", e)))?;

    let features = match geojson {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(f) => vec![f],
        GeoJson::Geometry(g) => vec![geojson::Feature::from(g)],
    };

    let empty = JsonObject::new();
    let mut names: Vec<String> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut shadowed = false;
    let mut flattened = false;
    let mut wkbs: Vec<Option<Vec<u8>>> = Vec::with_capacity(features.len());

    for (uid, feature) in features.iter().enumerate() {
        for key in feature.properties.as_ref().unwrap_or(&empty).keys() {
            if key == geometry_column {
                shadowed = true;
                continue;
            }
            if !seen.contains_key(key) {
                seen.insert(key.clone(), names.len());
                names.push(key.clone());
            }
        }

        let wkb = match &feature.geometry {
            Some(geometry) => {
                flattened |= max_position_len(&geometry.value) > 2;
                let geom = geo::Geometry::<f64>::try_from(geometry.value.clone()).map_err(|e| {
                    Error::InvalidGeometry {
                        feature_id: uid,
                        reason: e.to_string(),
                    }
                })?;
                Some(engine.encode_geometry(&geom).map_err(|e| Error::InvalidGeometry {
                    feature_id: uid,
                    reason: e.to_string(),
                })?)
            }
            None => None,
        };
        wkbs.push(wkb);
    }

    if flattened {
        log::warn!("GeoJSON positions with more than two values are stored as XY");
    }
    if shadowed {
        log::warn!(
            "Dropping property '{}': the name is used by the geometry column",
            geometry_column
        );
    }

    let mut fields = Vec::with_capacity(names.len() + 1);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(names.len() + 1);

    for name in &names {
        let values: Vec<Option<&JsonValue>> = features
            .iter()
            .map(|f| f.properties.as_ref().and_then(|p| p.get(name)))
            .collect();
        let kind = infer_kind(values.iter().flatten().copied());
        fields.push(Field::new(name, arrow_type(kind), true));
        columns.push(property_array(kind, &values));
    }

    fields.push(wkb_field(geometry_column));
    columns.push(Arc::new(
        wkbs.iter().map(|w| w.as_deref()).collect::<BinaryArray>(),
    ));

    log::debug!(
        "Read {} GeoJSON features with {} properties",
        features.len(),
        names.len()
    );

    let geometry_index = columns.len() - 1;
    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    InputTable::new(batch, geometry_index)
}

/// Longest position (number of ordinates) in a GeoJSON geometry.
fn max_position_len(value: &geojson::Value) -> usize {
    use geojson::Value;
    match value {
        Value::Point(p) => p.len(),
        Value::MultiPoint(ps) | Value::LineString(ps) => {
            ps.iter().map(Vec::len).max().unwrap_or(0)
        }
        Value::MultiLineString(ls) | Value::Polygon(ls) => {
            ls.iter().flatten().map(Vec::len).max().unwrap_or(0)
        }
        Value::MultiPolygon(ps) => ps.iter().flatten().flatten().map(Vec::len).max().unwrap_or(0),
        Value::GeometryCollection(gs) => gs
            .iter()
            .map(|g| max_position_len(&g.value))
            .max()
            .unwrap_or(0),
    }
}
