//! Geometry engine: the narrow interface the pyramid core uses to look at geometries.
//!
//! The level assignor and the output ordering never inspect geometries
//! directly. They ask a [`GeometryEngine`] for a representative point, a
//! quantized grid key, and an ordering key. [`GeoEngine`] is the default
//! implementation built on `geo` and `geozero`.
//!
//! # Examples
//!
//! ```
//! use geo::{point, Geometry};
//! use yosegi_core::engine::{GeoEngine, GeometryEngine};
//!
//! let engine = GeoEngine;
//! let geom = Geometry::Point(point!(x: 1.4, y: 2.6));
//!
//! let rep = engine.representative_point(&geom).unwrap();
//! let key = engine.quantize(&rep, 1.0);
//! assert_eq!((key.x, key.y), (1, 3));
//!
//! let wkb = engine.encode_geometry(&geom).unwrap();
//! assert_eq!(wkb.len(), 21);
//! ```

use geo::{Geometry, InteriorPoint, Point};
use geozero::{CoordDimensions, ToWkb};

use crate::tile;

/// Errors from WKB encoding.
#[derive(Debug, thiserror::Error)]
pub enum WkbError {
    #[error("WKB encode error: {0}")]
    Encode(String),
}

/// A point snapped to a grid of a given resolution.
///
/// Two points with equal keys at the same resolution are indistinguishable at
/// that zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuantizedKey {
    pub x: i64,
    pub y: i64,
}

/// Geometry operations consumed by the pyramid core.
///
/// Implementations must be deterministic: the same input always yields the
/// same output, which keeps level assignment reproducible.
pub trait GeometryEngine: Sync {
    /// A single point standing in for `geom` during deduplication.
    ///
    /// Points return themselves. Other geometries return an interior point.
    /// Empty geometries return `None`.
    fn representative_point(&self, geom: &Geometry<f64>) -> Option<Point<f64>>;

    /// Snap `point` to a grid with cell size `resolution`.
    fn quantize(&self, point: &Point<f64>, resolution: f64) -> QuantizedKey;

    /// Space-filling-curve key of `point` at `zoom`, used for intra-level ordering.
    fn ordering_key(&self, point: &Point<f64>, zoom: u8) -> String;

    /// WKB for a geometry that arrives without an Arrow encoding (GeoJSON input).
    fn encode_geometry(&self, geom: &Geometry<f64>) -> Result<Vec<u8>, WkbError>;
}

/// Default engine: `geo` interior points, round-to-nearest snapping,
/// Web Mercator quadkeys and XY WKB.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoEngine;

impl GeometryEngine for GeoEngine {
    fn representative_point(&self, geom: &Geometry<f64>) -> Option<Point<f64>> {
        match geom {
            Geometry::Point(p) => Some(*p),
            other => other.interior_point(),
        }
    }

    fn quantize(&self, point: &Point<f64>, resolution: f64) -> QuantizedKey {
        QuantizedKey {
            x: (point.x() / resolution).round() as i64,
            y: (point.y() / resolution).round() as i64,
        }
    }

    fn ordering_key(&self, point: &Point<f64>, zoom: u8) -> String {
        tile::quadkey(point.x(), point.y(), zoom)
    }

    fn encode_geometry(&self, geom: &Geometry<f64>) -> Result<Vec<u8>, WkbError> {
        encode_wkb(geom)
    }
}

/// Serialize a geometry to WKB with XY coordinates.
pub fn encode_wkb(geom: &Geometry<f64>) -> Result<Vec<u8>, WkbError> {
    geom.to_wkb(CoordDimensions::xy())
        .map_err(|e| WkbError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point, polygon, LineString, MultiPoint, Polygon};
    use geozero::ToGeo;

    #[test]
    fn test_point_is_its_own_representative() {
        let p = point!(x: 3.25, y: -7.5);
        let rep = GeoEngine.representative_point(&Geometry::Point(p));
        assert_eq!(rep, Some(p));
    }

    #[test]
    fn test_polygon_representative_is_inside() {
        use geo::Contains;

        // An L-shape whose centroid falls outside the polygon
        let poly = polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 1.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 10.0),
            (x: 0.0, y: 10.0),
            (x: 0.0, y: 0.0),
        ];
        let rep = GeoEngine
            .representative_point(&Geometry::Polygon(poly.clone()))
            .unwrap();
        assert!(poly.contains(&rep), "{:?} should be inside the polygon", rep);
    }

    #[test]
    fn test_multipoint_representative_is_a_member() {
        let mp = MultiPoint::from(vec![(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]);
        let rep = GeoEngine
            .representative_point(&Geometry::MultiPoint(mp.clone()))
            .unwrap();
        assert!(mp.0.contains(&rep));
    }

    #[test]
    fn test_linestring_representative_exists() {
        let ls = line_string![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0)];
        assert!(GeoEngine
            .representative_point(&Geometry::LineString(ls))
            .is_some());
    }

    #[test]
    fn test_empty_geometry_has_no_representative() {
        let empty = Geometry::Polygon(Polygon::new(LineString::new(vec![]), vec![]));
        assert_eq!(GeoEngine.representative_point(&empty), None);

        let empty = Geometry::MultiPoint(MultiPoint::new(vec![]));
        assert_eq!(GeoEngine.representative_point(&empty), None);
    }

    #[test]
    fn test_quantize_rounds_to_nearest_cell() {
        let engine = GeoEngine;
        assert_eq!(
            engine.quantize(&point!(x: 0.4, y: 0.6), 1.0),
            QuantizedKey { x: 0, y: 1 }
        );
        assert_eq!(
            engine.quantize(&point!(x: -0.6, y: -0.4), 1.0),
            QuantizedKey { x: -1, y: 0 }
        );
        assert_eq!(
            engine.quantize(&point!(x: 2.4, y: 2.4), 2.5),
            QuantizedKey { x: 1, y: 1 }
        );
    }

    #[test]
    fn test_quantize_is_collision_consistent() {
        let engine = GeoEngine;
        let a = engine.quantize(&point!(x: 10.01, y: 20.02), 0.1);
        let b = engine.quantize(&point!(x: 10.03, y: 19.98), 0.1);
        let c = engine.quantize(&point!(x: 10.2, y: 20.0), 0.1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_ordering_key_is_quadkey() {
        let p = point!(x: 139.76, y: 35.68);
        assert_eq!(GeoEngine.ordering_key(&p, 12), tile::quadkey(139.76, 35.68, 12));
    }

    #[test]
    fn test_wkb_round_trip_polygon() {
        let original = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]);
        let wkb = encode_wkb(&original).unwrap();
        assert_eq!(geozero::wkb::Wkb(wkb).to_geo().unwrap(), original);
    }
}
