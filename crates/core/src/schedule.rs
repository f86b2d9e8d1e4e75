//! Precision schedule: the snapping resolution used at each zoom level.
//!
//! Every zoom in `[min_zoom, max_zoom)` gets a grid resolution. Lower zooms use
//! larger cells, so more features collapse into one cell and fewer survive.
//! `max_zoom` itself has no entry: it is the catch-all level where every
//! remaining feature lands without deduplication.
//!
//! # Example
//!
//! ```
//! use yosegi_core::schedule::{PrecisionSchedule, ResolutionModel};
//!
//! let model = ResolutionModel::geometric(2.5, 2.0);
//! let schedule = PrecisionSchedule::new(0, 3, &model).unwrap();
//!
//! assert_eq!(schedule.len(), 3);
//! assert_eq!(schedule.resolution(0), Some(2.5));
//! assert_eq!(schedule.resolution(2), Some(0.625));
//! assert_eq!(schedule.resolution(3), None);
//! ```

use crate::{Error, Result};

/// Highest zoom level accepted anywhere in the pipeline.
///
/// Quadkeys are derived from 32-bit tile coordinates, so 30 leaves headroom.
pub const MAX_ZOOM: u8 = 30;

/// Default resolution at zoom 0 (in input coordinate units, usually degrees).
pub const DEFAULT_RESOLUTION_BASE: f64 = 2.5;

/// Default ratio between the resolutions of consecutive zooms.
pub const DEFAULT_RESOLUTION_MULTIPLIER: f64 = 2.0;

/// How the resolution for a zoom level is derived.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionModel {
    /// `resolution(z) = base / multiplier^z`
    Geometric { base: f64, multiplier: f64 },
    /// Explicit per-zoom table; entry `i` is the resolution of `min_zoom + i`.
    Explicit(Vec<f64>),
}

impl Default for ResolutionModel {
    fn default() -> Self {
        Self::Geometric {
            base: DEFAULT_RESOLUTION_BASE,
            multiplier: DEFAULT_RESOLUTION_MULTIPLIER,
        }
    }
}

impl ResolutionModel {
    /// Geometric model from a base resolution and a per-zoom multiplier.
    pub fn geometric(base: f64, multiplier: f64) -> Self {
        Self::Geometric { base, multiplier }
    }

    /// Explicit model from a table starting at `min_zoom`.
    pub fn explicit<I: IntoIterator<Item = f64>>(resolutions: I) -> Self {
        Self::Explicit(resolutions.into_iter().collect())
    }

    fn resolution_at(&self, min_zoom: u8, zoom: u8) -> Option<f64> {
        match self {
            Self::Geometric { base, multiplier } => Some(base / multiplier.powi(zoom as i32)),
            Self::Explicit(table) => table.get(usize::from(zoom - min_zoom)).copied(),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Geometric { base, multiplier } => {
                if !base.is_finite() || *base <= 0.0 {
                    return Err(Error::InvalidConfig(format!(
                        "resolution base must be a positive number, got {}",
                        base
                    )));
                }
                if !multiplier.is_finite() || *multiplier <= 1.0 {
                    return Err(Error::InvalidConfig(format!(
                        "resolution multiplier must be greater than 1, got {}",
                        multiplier
                    )));
                }
                Ok(())
            }
            Self::Explicit(_) => Ok(()),
        }
    }
}

/// One `(zoom, resolution)` pair of a schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleEntry {
    pub zoom: u8,
    pub resolution: f64,
}

/// Ordered list of snapping resolutions for `[min_zoom, max_zoom)`.
///
/// Entries are sorted by ascending zoom with strictly decreasing resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecisionSchedule {
    min_zoom: u8,
    max_zoom: u8,
    entries: Vec<ScheduleEntry>,
}

impl PrecisionSchedule {
    /// Build and validate a schedule.
    ///
    /// Fails with [`Error::InvalidConfig`] when the zoom range is inverted or
    /// out of bounds, when the model parameters are out of range, or when a
    /// resolution is missing, non-positive, or not strictly decreasing.
    pub fn new(min_zoom: u8, max_zoom: u8, model: &ResolutionModel) -> Result<Self> {
        if min_zoom > max_zoom {
            return Err(Error::InvalidConfig(format!(
                "minzoom ({}) must not exceed maxzoom ({})",
                min_zoom, max_zoom
            )));
        }
        if max_zoom > MAX_ZOOM {
            return Err(Error::InvalidConfig(format!(
                "maxzoom ({}) must not exceed {}",
                max_zoom, MAX_ZOOM
            )));
        }
        model.validate()?;

        let mut entries: Vec<ScheduleEntry> = Vec::with_capacity(usize::from(max_zoom - min_zoom));
        for zoom in min_zoom..max_zoom {
            let resolution = model.resolution_at(min_zoom, zoom).ok_or_else(|| {
                Error::InvalidConfig(format!("no resolution configured for zoom {}", zoom))
            })?;

            if !resolution.is_finite() || resolution <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "resolution at zoom {} must be positive, got {}",
                    zoom, resolution
                )));
            }
            if let Some(prev) = entries.last().map(|e| e.resolution) {
                if resolution >= prev {
                    return Err(Error::InvalidConfig(format!(
                        "resolution at zoom {} ({}) must be smaller than at zoom {} ({})",
                        zoom,
                        resolution,
                        zoom - 1,
                        prev
                    )));
                }
            }

            entries.push(ScheduleEntry { zoom, resolution });
        }

        Ok(Self {
            min_zoom,
            max_zoom,
            entries,
        })
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    /// Entries in ascending zoom order.
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Resolution for `zoom`, or `None` for `max_zoom` and zooms outside the range.
    pub fn resolution(&self, zoom: u8) -> Option<f64> {
        if zoom < self.min_zoom {
            return None;
        }
        self.entries
            .get(usize::from(zoom - self.min_zoom))
            .map(|e| e.resolution)
    }

    /// Number of deduplication rounds (`max_zoom - min_zoom`).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
