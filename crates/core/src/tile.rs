//! Tile coordinate math and quadkey ordering keys.
//!
//! Features inside a zoom level are ordered by the quadkey of the Web Mercator
//! tile that contains their representative point at `max_zoom`. Quadkeys of
//! equal length sort lexicographically in Z-order, which keeps spatially close
//! features close together in the output file.

use std::f64::consts::PI;

/// Latitude limit of the Web Mercator projection.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Tile coordinates: x, y, and zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileCoord {
    /// Create a new tile coordinate
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Bing-style quadkey: one base-4 digit per zoom level, most significant first.
    ///
    /// Zoom 0 yields the empty string.
    pub fn quadkey(&self) -> String {
        let mut key = String::with_capacity(usize::from(self.z));
        for level in (1..=self.z).rev() {
            let mask = 1u32 << (level - 1);
            let mut digit = b'0';
            if self.x & mask != 0 {
                digit += 1;
            }
            if self.y & mask != 0 {
                digit += 2;
            }
            key.push(char::from(digit));
        }
        key
    }
}

/// Axis-aligned extent in input coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Create an empty/invalid bounding box
    pub fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    /// Check if this is a valid bounding box
    pub fn is_valid(&self) -> bool {
        self.min_x <= self.max_x && self.min_y <= self.max_y
    }

    /// Expand this bounding box to include another
    pub fn expand(&mut self, other: &Self) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// `[minx, miny, maxx, maxy]`, the GeoParquet `bbox` layout. `None` when empty.
    pub fn to_array(&self) -> Option<[f64; 4]> {
        self.is_valid()
            .then_some([self.min_x, self.min_y, self.max_x, self.max_y])
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

/// Convert longitude/latitude to the tile containing it at `zoom`.
///
/// Uses Web Mercator (EPSG:3857). Coordinates outside the projection are
/// clamped onto the edge tiles, so every finite input maps to a valid tile.
pub fn lng_lat_to_tile(lng: f64, lat: f64, zoom: u8) -> TileCoord {
    let n = 2_f64.powi(zoom as i32);
    let max_index = (1u64 << zoom) - 1;

    let lng = lng.clamp(-180.0, 180.0);
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);

    let x = ((lng + 180.0) / 360.0 * n).floor();

    let lat_rad = lat.to_radians();
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor();

    let clamp = |v: f64| (v.max(0.0) as u64).min(max_index) as u32;
    TileCoord::new(clamp(x), clamp(y), zoom)
}

/// Quadkey of the tile containing `(lng, lat)` at `zoom`.
pub fn quadkey(lng: f64, lat: f64, zoom: u8) -> String {
    lng_lat_to_tile(lng, lat, zoom).quadkey()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lng_lat_to_tile_origin() {
        let tile = lng_lat_to_tile(0.0, 0.0, 0);
        assert_eq!(tile, TileCoord::new(0, 0, 0));
    }

    #[test]
    fn test_lng_lat_to_tile_zoom_1() {
        let tile = lng_lat_to_tile(0.0, 0.0, 1);
        assert_eq!(tile, TileCoord::new(1, 1, 1));

        // Top-left quadrant
        let tile = lng_lat_to_tile(-90.0, 45.0, 1);
        assert_eq!(tile, TileCoord::new(0, 0, 1));

        // Bottom-right quadrant
        let tile = lng_lat_to_tile(90.0, -45.0, 1);
        assert_eq!(tile, TileCoord::new(1, 1, 1));
    }

    #[test]
    fn test_edges_clamp_to_last_tile() {
        let tile = lng_lat_to_tile(180.0, -90.0, 3);
        assert_eq!(tile, TileCoord::new(7, 7, 3));

        let tile = lng_lat_to_tile(-200.0, 90.0, 3);
        assert_eq!(tile, TileCoord::new(0, 0, 3));
    }

    #[test]
    fn test_quadkey_digits() {
        // Reference values from the Bing Maps tile system documentation
        assert_eq!(TileCoord::new(3, 5, 3).quadkey(), "213");
        assert_eq!(TileCoord::new(0, 0, 1).quadkey(), "0");
        assert_eq!(TileCoord::new(1, 0, 1).quadkey(), "1");
        assert_eq!(TileCoord::new(0, 1, 1).quadkey(), "2");
        assert_eq!(TileCoord::new(1, 1, 1).quadkey(), "3");
    }

    #[test]
    fn test_quadkey_zoom_zero_is_empty() {
        assert_eq!(quadkey(12.3, 45.6, 0), "");
    }

    #[test]
    fn test_quadkey_length_matches_zoom() {
        for zoom in 0..=20 {
            assert_eq!(quadkey(139.76, 35.68, zoom).len(), usize::from(zoom));
        }
    }

    #[test]
    fn test_quadkey_prefix_is_parent_tile() {
        let fine = quadkey(139.76, 35.68, 16);
        let coarse = quadkey(139.76, 35.68, 10);
        assert!(fine.starts_with(&coarse));
    }

    #[test]
    fn test_quadkey_orders_nearby_points_together() {
        // Two points in Tokyo and one in London: the Tokyo pair shares a long prefix
        let a = quadkey(139.70, 35.68, 16);
        let b = quadkey(139.71, 35.69, 16);
        let c = quadkey(-0.12, 51.50, 16);

        let common = a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count();
        assert!(common >= 8, "expected a long shared prefix, got {}", common);
        assert_ne!(&a[..1], &c[..1]);
    }

    #[test]
    fn test_bbox_expand() {
        let mut bbox1 = BoundingBox::new(-10.0, -10.0, 10.0, 10.0);
        let bbox2 = BoundingBox::new(-20.0, -5.0, 5.0, 15.0);

        bbox1.expand(&bbox2);

        assert_eq!(bbox1.to_array(), Some([-20.0, -10.0, 10.0, 15.0]));
    }

    #[test]
    fn test_bbox_empty() {
        let bbox = BoundingBox::empty();
        assert!(!bbox.is_valid());
        assert_eq!(bbox.to_array(), None);

        let mut bbox = BoundingBox::empty();
        bbox.expand(&BoundingBox::new(1.0, 2.0, 1.0, 2.0));
        assert_eq!(bbox.to_array(), Some([1.0, 2.0, 1.0, 2.0]));
    }
}
