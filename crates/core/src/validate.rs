//! Input geometry validation and representative-point extraction.
//!
//! Every feature needs a usable representative point before level assignment
//! starts. A null, empty or non-finite geometry anywhere in the input is a
//! fatal error reported with the offending feature's uid, so assignment never
//! begins on data it cannot finish.

use std::fmt;

use geo::{BoundingRect, CoordsIter, Geometry, HasDimensions, Point};

use crate::assign::FeatureSet;
use crate::engine::GeometryEngine;
use crate::reader::InputTable;
use crate::tile::BoundingBox;
use crate::{Error, Result};

/// Result of geometry validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Geometry can be used for deduplication
    Valid,
    /// Geometry is unusable
    Invalid(InvalidReason),
}

/// Reason why a geometry is unusable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Geometry value is null
    NullGeometry,
    /// Geometry has no coordinates
    EmptyGeometry,
    /// A coordinate is NaN or infinite
    NonFiniteCoordinate,
    /// Geometry bytes could not be decoded
    Undecodable(String),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullGeometry => write!(f, "geometry is null"),
            Self::EmptyGeometry => write!(f, "geometry is empty"),
            Self::NonFiniteCoordinate => write!(f, "geometry has a non-finite coordinate"),
            Self::Undecodable(msg) => write!(f, "geometry could not be decoded: {}", msg),
        }
    }
}

impl ValidationResult {
    /// Returns true if the geometry is valid
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// Validate a decoded geometry.
pub fn validate_geometry(geom: &Geometry<f64>) -> ValidationResult {
    if geom.is_empty() {
        return ValidationResult::Invalid(InvalidReason::EmptyGeometry);
    }
    if geom
        .coords_iter()
        .any(|c| !c.x.is_finite() || !c.y.is_finite())
    {
        return ValidationResult::Invalid(InvalidReason::NonFiniteCoordinate);
    }
    ValidationResult::Valid
}

/// Validate one geometry and reduce it to its representative point.
///
/// Returns the point together with the geometry's bounding box.
pub fn representative_point<E: GeometryEngine + ?Sized>(
    geom: &Geometry<f64>,
    engine: &E,
) -> std::result::Result<(Point<f64>, BoundingBox), InvalidReason> {
    if let ValidationResult::Invalid(reason) = validate_geometry(geom) {
        return Err(reason);
    }

    let point = engine
        .representative_point(geom)
        .ok_or(InvalidReason::EmptyGeometry)?;
    if !point.x().is_finite() || !point.y().is_finite() {
        return Err(InvalidReason::NonFiniteCoordinate);
    }

    let bounds = geom
        .bounding_rect()
        .map(|rect| BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y))
        .unwrap_or_else(BoundingBox::empty);

    Ok((point, bounds))
}

/// Build the feature arena for an input table.
///
/// The uid of a feature is its row index. Fails on the first unusable geometry.
pub fn build_feature_set<E: GeometryEngine + ?Sized>(
    table: &InputTable,
    engine: &E,
) -> Result<FeatureSet> {
    let mut points = Vec::with_capacity(table.num_rows());
    let mut bounds = BoundingBox::empty();

    table.for_each_geometry(|uid, decoded| {
        let (point, geom_bounds) = decoded
            .and_then(|geom| representative_point(&geom, engine))
            .map_err(|reason| Error::InvalidGeometry {
                feature_id: uid,
                reason: reason.to_string(),
            })?;
        bounds.expand(&geom_bounds);
        points.push(point);
        Ok(())
    })?;

    log::debug!("Extracted {} representative points", points.len());

    Ok(FeatureSet::with_bounds(points, bounds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{encode_wkb, GeoEngine};
    use crate::reader::{wkb_field, InputTable};
    use arrow_array::{BinaryArray, RecordBatch};
    use arrow_schema::Schema;
    use geo::{point, polygon, MultiPoint, MultiPolygon};
    use std::sync::Arc;

    fn table(geoms: &[Option<Geometry<f64>>]) -> InputTable {
        let wkbs: Vec<Option<Vec<u8>>> = geoms
            .iter()
            .map(|g| g.as_ref().map(|g| encode_wkb(g).unwrap()))
            .collect();
        let column = wkbs.iter().map(|w| w.as_deref()).collect::<BinaryArray>();
        let schema = Schema::new(vec![wkb_field("geometry")]);
        let batch = RecordBatch::try_new(Arc::new(schema), vec![Arc::new(column)]).unwrap();
        InputTable::new(batch, 0).unwrap()
    }

    #[test]
    fn test_point_is_valid() {
        let geom = Geometry::Point(point!(x: 1.0, y: 2.0));
        assert!(validate_geometry(&geom).is_valid());
    }

    #[test]
    fn test_empty_multipolygon_is_invalid() {
        let geom = Geometry::MultiPolygon(MultiPolygon::new(vec![]));
        assert_eq!(
            validate_geometry(&geom),
            ValidationResult::Invalid(InvalidReason::EmptyGeometry)
        );
    }

    #[test]
    fn test_nan_coordinate_is_invalid() {
        let geom = Geometry::Point(point!(x: f64::NAN, y: 0.0));
        assert_eq!(
            validate_geometry(&geom),
            ValidationResult::Invalid(InvalidReason::NonFiniteCoordinate)
        );
    }

    #[test]
    fn test_representative_point_of_polygon_has_bounds() {
        let geom = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 4.0, y: 0.0),
            (x: 4.0, y: 2.0),
            (x: 0.0, y: 2.0),
            (x: 0.0, y: 0.0),
        ]);

        let (point, bounds) = representative_point(&geom, &GeoEngine).unwrap();
        assert!(point.x() > 0.0 && point.x() < 4.0);
        assert!(point.y() > 0.0 && point.y() < 2.0);
        assert_eq!(bounds.to_array(), Some([0.0, 0.0, 4.0, 2.0]));
    }

    #[test]
    fn test_empty_multipoint_rejected() {
        let geom = Geometry::MultiPoint(MultiPoint::new(vec![]));
        let err = representative_point(&geom, &GeoEngine).unwrap_err();
        assert_eq!(err, InvalidReason::EmptyGeometry);
    }

    // ========== Feature set ==========

    #[test]
    fn test_feature_set_from_table() {
        let features = build_feature_set(
            &table(&[
                Some(Geometry::Point(point!(x: 1.0, y: 2.0))),
                Some(Geometry::Point(point!(x: -3.0, y: 5.0))),
            ]),
            &GeoEngine,
        )
        .unwrap();

        assert_eq!(features.len(), 2);
        assert_eq!(features.point(1), point!(x: -3.0, y: 5.0));
        assert_eq!(features.bounds().to_array(), Some([-3.0, 2.0, 1.0, 5.0]));
    }

    #[test]
    fn test_null_geometry_names_the_uid() {
        let err = build_feature_set(
            &table(&[Some(Geometry::Point(point!(x: 0.0, y: 0.0))), None]),
            &GeoEngine,
        )
        .unwrap_err();

        match err {
            Error::InvalidGeometry { feature_id, reason } => {
                assert_eq!(feature_id, 1);
                assert_eq!(reason, "geometry is null");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_reason_messages() {
        assert_eq!(InvalidReason::NullGeometry.to_string(), "geometry is null");
        assert_eq!(InvalidReason::EmptyGeometry.to_string(), "geometry is empty");
    }
}
