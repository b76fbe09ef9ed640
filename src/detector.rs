//! Seams to the external detection and tracking services.
//!
//! Implementations wrap whatever model runtime the host application uses.
//! All coordinates crossing these traits are normalized to the full frame,
//! including skeletons detected inside a crop region.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::bbox::{BBox, Ltrb};
use crate::error::Result;
use crate::skeleton::Skeleton;

/// Multi-person pose detector.
pub trait PoseDetector: Send + Sync {
    /// Detects every person in `frame`, or only inside `region` when given.
    fn detect(&self, frame: usize, region: Option<&BBox<Ltrb>>) -> Result<Vec<Skeleton>>;
}

/// Stateful single-target visual tracker, seeded once per pass.
pub trait VisualTracker: Send {
    /// Tracks the target inside `seed` at `seed_frame` over `range`.
    ///
    /// `hints` maps frames to boxes already known to hold the athlete and
    /// may be used to re-seed. Frames where the tracker confidence falls
    /// below `min_confidence` are left out of the result.
    fn run_tracking_pass(
        &mut self,
        seed: &BBox<Ltrb>,
        seed_frame: usize,
        range: Range<usize>,
        hints: &BTreeMap<usize, BBox<Ltrb>>,
        min_confidence: f32,
    ) -> Result<BTreeMap<usize, BBox<Ltrb>>>;
}

/// Silhouette-only person detector.
pub trait HumanDetector: Send + Sync {
    fn detect_humans(&self, frame: usize) -> Result<Vec<BBox<Ltrb>>>;
}
