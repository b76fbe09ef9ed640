//! Projectile motion model of the athlete's box center: horizontal position
//! linear in the frame index, vertical position quadratic in it.

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::assignment::{AssignmentStore, FrameAssignment};
use crate::bbox::{BBox, Ltrb};
use crate::config::TrajectoryConfig;
use crate::frame::DetectionSet;
use crate::math::{linear_ls, median, quadratic_ls, r_squared};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct AnchorPoint {
    pub frame: usize,
    pub center: na::Point2<f32>,
}

/// Trusted frames feeding the fit: user-confirmed poses and confident
/// automatic matches on detector output. Uncertain matches never count.
fn trusted_frames<'a>(
    store: &'a AssignmentStore,
    detections: &'a DetectionSet,
    config: &'a TrajectoryConfig,
) -> impl Iterator<Item = (usize, BBox<Ltrb>)> + 'a {
    store.iter().filter_map(move |(frame, a)| {
        let pose = match *a {
            FrameAssignment::AthleteConfirmed { pose } => pose,
            FrameAssignment::AthleteAuto { pose, confidence }
                if confidence >= config.anchor_confidence =>
            {
                pose
            }
            _ => return None,
        };

        let skeleton = detections.skeleton(frame, pose)?;
        if !skeleton.is_detected() {
            return None;
        }

        Some((frame, skeleton.bbox(config.joint_confidence)?))
    })
}

pub fn anchor_points(
    store: &AssignmentStore,
    detections: &DetectionSet,
    config: &TrajectoryConfig,
) -> Vec<AnchorPoint> {
    trusted_frames(store, detections, config)
        .map(|(frame, bbox)| AnchorPoint {
            frame,
            center: bbox.center(),
        })
        .collect()
}

/// Median width and height of the athlete's box over the trusted frames.
pub fn typical_size(
    store: &AssignmentStore,
    detections: &DetectionSet,
    config: &TrajectoryConfig,
) -> Option<na::Vector2<f32>> {
    let (mut w, mut h): (Vec<f32>, Vec<f32>) = trusted_frames(store, detections, config)
        .map(|(_, b)| (b.width(), b.height()))
        .unzip();

    Some(na::Vector2::new(median(&mut w)?, median(&mut h)?))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validation {
    pub accepted: BTreeMap<usize, BBox<Ltrb>>,
    pub rejected: BTreeSet<usize>,
}

impl Validation {
    /// Every box accepted as-is, used when no model could be fitted.
    pub fn unchecked(boxes: &BTreeMap<usize, BBox<Ltrb>>) -> Self {
        Self {
            accepted: boxes.clone(),
            rejected: BTreeSet::new(),
        }
    }

    /// Moves `frames` from accepted to rejected.
    pub fn reject<I: IntoIterator<Item = usize>>(&mut self, frames: I) {
        for f in frames {
            if self.accepted.remove(&f).is_some() {
                self.rejected.insert(f);
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrajectoryModel {
    /// `x = k * frame + b`, stored as `[k, b]`
    pub horizontal: [f64; 2],
    /// `y = a * frame^2 + b * frame + c`, stored as `[a, b, c]`
    pub vertical: [f64; 3],
    /// Coefficient of determination of the vertical fit.
    pub r_squared: f64,
    pub anchor_count: usize,
    /// First and last anchor frame.
    pub domain: (usize, usize),
}

impl TrajectoryModel {
    pub fn fit(anchors: &[AnchorPoint], config: &TrajectoryConfig) -> Option<Self> {
        let frames: BTreeSet<usize> = anchors.iter().map(|a| a.frame).collect();
        if anchors.len() < config.min_anchors.max(3) || frames.len() < 3 {
            debug!(anchors = anchors.len(), "not enough anchors for a trajectory fit");
            return None;
        }

        let n = anchors.len();

        // centered frame index keeps the normal equations well conditioned
        let origin = anchors.iter().map(|a| a.frame as f64).sum::<f64>() / n as f64;
        let t = na::DVector::from_iterator(n, anchors.iter().map(|a| a.frame as f64 - origin));
        let xs = na::DVector::from_iterator(n, anchors.iter().map(|a| a.center.x as f64));
        let ys = na::DVector::from_iterator(n, anchors.iter().map(|a| a.center.y as f64));

        let h = linear_ls(&t, &xs)?;
        let v = quadratic_ls(&t, &ys)?;

        let fitted = t.map(|t| v[0] * t * t + v[1] * t + v[2]);
        let r2 = r_squared(&ys, &fitted)?;

        let model = Self {
            horizontal: [h[0], h[1] - h[0] * origin],
            vertical: [
                v[0],
                v[1] - 2.0 * v[0] * origin,
                v[0] * origin * origin - v[1] * origin + v[2],
            ],
            r_squared: r2,
            anchor_count: n,
            domain: (*frames.iter().next()?, *frames.iter().next_back()?),
        };

        debug!(
            anchors = n,
            r2 = model.r_squared,
            curvature = model.vertical[0],
            "trajectory fitted"
        );

        Some(model)
    }

    pub fn predict_center(&self, frame: usize) -> na::Point2<f32> {
        let f = frame as f64;
        let [k, b] = self.horizontal;
        let [qa, qb, qc] = self.vertical;

        na::Point2::new((k * f + b) as f32, (qa * f * f + qb * f + qc) as f32)
    }

    /// Frames between `frame` and the anchor domain, zero inside it.
    #[inline]
    pub fn extrapolation(&self, frame: usize) -> usize {
        if frame < self.domain.0 {
            self.domain.0 - frame
        } else {
            frame.saturating_sub(self.domain.1)
        }
    }

    /// Largest accepted distance between a tracked box center and the
    /// prediction at `frame`.
    pub fn tolerance(&self, frame: usize, config: &TrajectoryConfig) -> f32 {
        let base = if self.r_squared >= config.good_fit_r2 as f64 {
            config.base_tolerance * config.good_fit_factor
        } else {
            config.base_tolerance
        };

        let grown = base + config.extrapolation_growth * self.extrapolation(frame) as f32;

        grown.min(base * config.max_tolerance_factor.max(1.0))
    }

    pub fn predict_search_region(
        &self,
        frame: usize,
        typical_size: na::Vector2<f32>,
        config: &TrajectoryConfig,
    ) -> BBox<Ltrb> {
        let s = config.search_region_scale;

        BBox::around(
            self.predict_center(frame),
            typical_size.x * s,
            typical_size.y * s,
        )
        .clamp_unit()
    }

    pub fn validate(
        &self,
        boxes: &BTreeMap<usize, BBox<Ltrb>>,
        config: &TrajectoryConfig,
    ) -> Validation {
        let mut out = Validation::default();

        for (&frame, bbox) in boxes {
            let dist = na::distance(&bbox.center(), &self.predict_center(frame));

            if dist <= self.tolerance(frame, config) {
                out.accepted.insert(frame, *bbox);
            } else {
                debug!(frame, dist, "tracked box drifted off trajectory");
                out.rejected.insert(frame);
            }
        }

        out
    }
}
