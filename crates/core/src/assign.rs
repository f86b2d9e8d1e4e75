//! Zoom-level assignment by progressive spatial deduplication.
//!
//! Each feature is given the coarsest zoom at which it is still spatially
//! distinguishable from the features already placed.
//!
//! # Algorithm
//!
//! Rounds run once per zoom in `[min_zoom, max_zoom)`, coarse to fine:
//!
//! 1. Group the still-pending features by their representative point snapped
//!    to the round's resolution.
//! 2. In each group the smallest uid wins and is assigned the round's zoom.
//! 3. Winners leave the pending pool before the next round starts.
//!
//! Whatever is still pending after the last round lands on `max_zoom`
//! without deduplication. The pool empties early on sparse data, in which
//! case the remaining rounds are skipped.
//!
//! Grouping inside a round is a parallel fold/reduce over the pending pool
//! that keeps only the running minimum uid per key. Rounds themselves are
//! strictly sequential.
//!
//! # Example
//!
//! ```
//! use geo::point;
//! use yosegi_core::assign::{FeatureSet, LevelAssignor};
//! use yosegi_core::engine::GeoEngine;
//! use yosegi_core::schedule::{PrecisionSchedule, ResolutionModel};
//!
//! let features = FeatureSet::new(vec![
//!     point!(x: 0.0, y: 0.0),
//!     point!(x: 0.1, y: 0.1),
//!     point!(x: 50.0, y: 50.0),
//! ]);
//! let schedule = PrecisionSchedule::new(0, 1, &ResolutionModel::geometric(1.0, 2.0)).unwrap();
//!
//! let (assignment, _report) = LevelAssignor::new(&schedule, &GeoEngine).run(&features).unwrap();
//! assert_eq!(assignment.get(0), Some(0));
//! assert_eq!(assignment.get(1), Some(1));
//! assert_eq!(assignment.get(2), Some(0));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use geo::Point;
use rayon::prelude::*;

use crate::engine::{GeometryEngine, QuantizedKey};
use crate::schedule::PrecisionSchedule;
use crate::tile::BoundingBox;
use crate::{Error, Result};

/// Pools smaller than this are grouped on the calling thread.
const PARALLEL_THRESHOLD: usize = 16 * 1024;

/// Representative points of all features, indexed by uid.
///
/// The uid is the position in input order. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    points: Vec<Point<f64>>,
    bounds: BoundingBox,
}

impl FeatureSet {
    pub fn new(points: Vec<Point<f64>>) -> Self {
        let mut bounds = BoundingBox::empty();
        for p in &points {
            bounds.expand(&BoundingBox::new(p.x(), p.y(), p.x(), p.y()));
        }
        Self { points, bounds }
    }

    /// Feature set whose extent is known from the full geometries.
    pub fn with_bounds(points: Vec<Point<f64>>, bounds: BoundingBox) -> Self {
        Self { points, bounds }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, uid: usize) -> Point<f64> {
        self.points[uid]
    }

    pub fn points(&self) -> &[Point<f64>] {
        &self.points
    }

    /// Extent of the source geometries (empty for an empty set).
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }
}

/// Mapping from feature uid to zoom level.
///
/// Entries are written once and never revised. The assignment is complete
/// when every uid has a level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    levels: Vec<Option<u8>>,
    assigned: usize,
}

impl Assignment {
    /// Empty assignment for `len` features.
    pub fn new(len: usize) -> Self {
        Self {
            levels: vec![None; len],
            assigned: 0,
        }
    }

    /// Record `zoom` for `uid`.
    ///
    /// # Panics
    ///
    /// Panics if `uid` already has a level; double assignment means the
    /// pending pool is out of sync with the assignment.
    pub fn assign(&mut self, uid: usize, zoom: u8) {
        let slot = &mut self.levels[uid];
        assert!(
            slot.is_none(),
            "feature {} assigned twice ({:?} then {})",
            uid,
            slot,
            zoom
        );
        *slot = Some(zoom);
        self.assigned += 1;
    }

    pub fn get(&self, uid: usize) -> Option<u8> {
        self.levels.get(uid).copied().flatten()
    }

    /// Number of features covered (assigned or not).
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn assigned_count(&self) -> usize {
        self.assigned
    }

    pub fn is_complete(&self) -> bool {
        self.assigned == self.levels.len()
    }

    /// `(uid, zoom)` pairs for every assigned feature, in uid order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .filter_map(|(uid, level)| level.map(|z| (uid, z)))
    }

    /// Number of features per zoom level, ascending by zoom.
    pub fn level_counts(&self) -> BTreeMap<u8, usize> {
        let mut counts = BTreeMap::new();
        for (_, zoom) in self.iter() {
            *counts.entry(zoom).or_insert(0) += 1;
        }
        counts
    }
}

/// Shared flag for stopping an assignment between rounds.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the run stops before its next round.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a single deduplication round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundStats {
    pub zoom: u8,
    pub resolution: f64,
    /// Pending features entering the round
    pub candidates: usize,
    /// Features assigned this zoom
    pub winners: usize,
}

/// Per-run summary of the assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignReport {
    pub rounds: Vec<RoundStats>,
    /// Features that fell through to `max_zoom`
    pub fallback: usize,
    /// Run stopped early by an [`AbortSignal`]
    pub aborted: bool,
}

/// Runs the coarse-to-fine deduplication rounds.
pub struct LevelAssignor<'a, E: GeometryEngine + ?Sized> {
    schedule: &'a PrecisionSchedule,
    engine: &'a E,
    abort: Option<AbortSignal>,
    allow_partial: bool,
}

impl<'a, E: GeometryEngine + ?Sized> LevelAssignor<'a, E> {
    pub fn new(schedule: &'a PrecisionSchedule, engine: &'a E) -> Self {
        Self {
            schedule,
            engine,
            abort: None,
            allow_partial: false,
        }
    }

    /// Check `signal` before every round.
    pub fn with_abort(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }

    /// On abort, return the incomplete assignment instead of an error.
    pub fn allow_partial(mut self, allow: bool) -> Self {
        self.allow_partial = allow;
        self
    }

    /// Assign a zoom level to every feature.
    ///
    /// Fails with [`Error::InvalidConfig`] before any round if the finest
    /// resolution cannot index the coordinate range of `features`.
    /// Returns [`Error::Aborted`] if the abort signal fires and partial
    /// results were not requested. With partial results allowed, the returned
    /// assignment holds only the rounds that completed and no fallback level.
    pub fn run(&self, features: &FeatureSet) -> Result<(Assignment, AssignReport)> {
        check_grid_range(features, self.schedule)?;

        let mut assignment = Assignment::new(features.len());
        let mut report = AssignReport::default();
        let mut pending: Vec<usize> = (0..features.len()).collect();

        for entry in self.schedule.entries() {
            if pending.is_empty() {
                log::debug!("All features placed before zoom {}", entry.zoom);
                break;
            }

            if self.abort.as_ref().is_some_and(AbortSignal::is_aborted) {
                log::warn!(
                    "Level assignment aborted before zoom {} ({} rounds done)",
                    entry.zoom,
                    report.rounds.len()
                );
                if self.allow_partial {
                    report.aborted = true;
                    return Ok((assignment, report));
                }
                return Err(Error::Aborted {
                    completed_rounds: report.rounds.len(),
                });
            }

            let winners = round_winners(features, &pending, entry.resolution, self.engine);
            for &uid in &winners {
                assignment.assign(uid, entry.zoom);
            }

            let candidates = pending.len();
            pending.retain(|&uid| assignment.get(uid).is_none());

            log::debug!(
                "Zoom {} (resolution {}): {} of {} pending features placed, {} left",
                entry.zoom,
                entry.resolution,
                winners.len(),
                candidates,
                pending.len()
            );

            report.rounds.push(RoundStats {
                zoom: entry.zoom,
                resolution: entry.resolution,
                candidates,
                winners: winners.len(),
            });
        }

        let max_zoom = self.schedule.max_zoom();
        for &uid in &pending {
            assignment.assign(uid, max_zoom);
        }
        report.fallback = pending.len();

        assert!(
            assignment.is_complete(),
            "{} features left without a zoom level",
            assignment.len() - assignment.assigned_count()
        );

        Ok((assignment, report))
    }
}

/// Winners of one round: the smallest uid of every quantized-key group.
///
/// `pending` lists the uids still competing. The result is sorted by uid.
pub fn round_winners<E: GeometryEngine + ?Sized>(
    features: &FeatureSet,
    pending: &[usize],
    resolution: f64,
    engine: &E,
) -> Vec<usize> {
    let groups = if pending.len() < PARALLEL_THRESHOLD {
        group_sequential(features, pending, resolution, engine)
    } else {
        group_parallel(features, pending, resolution, engine)
    };

    let mut winners: Vec<usize> = groups.into_values().collect();
    winners.sort_unstable();
    winners
}

fn keep_min(groups: &mut HashMap<QuantizedKey, usize>, key: QuantizedKey, uid: usize) {
    groups
        .entry(key)
        .and_modify(|winner| *winner = (*winner).min(uid))
        .or_insert(uid);
}

fn group_sequential<E: GeometryEngine + ?Sized>(
    features: &FeatureSet,
    pending: &[usize],
    resolution: f64,
    engine: &E,
) -> HashMap<QuantizedKey, usize> {
    let mut groups = HashMap::new();
    for &uid in pending {
        keep_min(&mut groups, engine.quantize(&features.point(uid), resolution), uid);
    }
    groups
}

fn group_parallel<E: GeometryEngine + ?Sized>(
    features: &FeatureSet,
    pending: &[usize],
    resolution: f64,
    engine: &E,
) -> HashMap<QuantizedKey, usize> {
    pending
        .par_iter()
        .fold(HashMap::new, |mut groups, &uid| {
            keep_min(&mut groups, engine.quantize(&features.point(uid), resolution), uid);
            groups
        })
        .reduce(HashMap::new, merge_min)
}

/// Reject schedules whose finest grid cannot index every point.
///
/// Grid indices are `i64`; a coordinate whose index would overflow saturates
/// and collides with unrelated points.
fn check_grid_range(features: &FeatureSet, schedule: &PrecisionSchedule) -> Result<()> {
    let Some(finest) = schedule
        .entries()
        .iter()
        .map(|entry| entry.resolution)
        .reduce(f64::min)
    else {
        return Ok(());
    };

    let extent = features
        .points()
        .iter()
        .map(|p| p.x().abs().max(p.y().abs()))
        .fold(0.0, f64::max);

    let cells = extent / finest;
    if cells.is_finite() && cells < i64::MAX as f64 {
        return Ok(());
    }
    Err(Error::InvalidConfig(format!(
        "Resolution {} is too fine for coordinates up to {}: grid index {:e} exceeds the i64 range",
        finest, extent, cells
    )))
}

fn merge_min(
    mut left: HashMap<QuantizedKey, usize>,
    right: HashMap<QuantizedKey, usize>,
) -> HashMap<QuantizedKey, usize> {
    for (key, uid) in right {
        keep_min(&mut left, key, uid);
    }
    left
}
