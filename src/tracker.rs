use nalgebra as na;
use tracing::debug;

use crate::assignment::{AssignmentStore, Correction, FrameAssignment};
use crate::bbox::{BBox, Ltrb};
use crate::config::IdentityConfig;
use crate::error::{Error, Result};
use crate::frame::DetectionSet;
use crate::math;
use crate::skeleton::Skeleton;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    #[inline]
    pub fn step(self, frame: usize, len: usize) -> Option<usize> {
        match self {
            Direction::Forward => (frame + 1 < len).then(|| frame + 1),
            Direction::Backward => frame.checked_sub(1),
        }
    }

    #[inline]
    pub fn reverse(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    #[inline(always)]
    pub fn is_forward(self) -> bool {
        self == Direction::Forward
    }
}

#[inline]
fn ratio(a: f32, b: f32) -> f32 {
    let (lo, hi) = (a.min(b), a.max(b));
    if hi <= f32::EPSILON {
        1.0
    } else {
        lo / hi
    }
}

/// Last matched athlete pose plus its per-frame velocity. Velocity is kept in
/// forward-time units whichever way the walk goes.
#[derive(Debug, Clone)]
pub struct TrackState {
    pub skeleton: Skeleton,
    pub frame: usize,
    pub bbox: BBox<Ltrb>,
    pub vel: na::Vector2<f32>,
    pub initialized: bool,
}

impl TrackState {
    pub fn new(frame: usize, skeleton: Skeleton, joint_confidence: f32) -> Option<Self> {
        let bbox = skeleton.bbox(joint_confidence)?;

        Some(Self {
            skeleton,
            frame,
            bbox,
            vel: na::Vector2::zeros(),
            initialized: false,
        })
    }

    #[inline]
    fn dt(&self, frame: usize) -> f32 {
        frame as f32 - self.frame as f32
    }

    #[inline]
    pub fn center(&self) -> na::Point2<f32> {
        self.bbox.center()
    }

    #[inline]
    pub fn predict(&self, frame: usize) -> na::Point2<f32> {
        self.center() + self.vel * self.dt(frame)
    }

    #[inline]
    pub fn predicted_bbox(&self, frame: usize) -> BBox<Ltrb> {
        self.bbox.translate(self.vel * self.dt(frame))
    }

    /// Weighted match score in [0, 1] of `candidate` seen at `frame`, `None`
    /// when the candidate has no usable joints.
    pub fn score(&self, frame: usize, candidate: &Skeleton, config: &IdentityConfig) -> Option<f32> {
        let jc = config.joint_confidence;
        let bbox = candidate.bbox(jc)?;
        let dt = self.dt(frame);
        let gap = dt.abs().max(1.0);
        let offset = self.vel * dt;

        let overlap = bbox.iou(&self.predicted_bbox(frame));

        let (sum, n) = self
            .skeleton
            .confident_joints(jc)
            .filter_map(|(kind, j)| {
                let c = candidate.confident_joint(kind, jc)?;
                Some(na::distance(&(j.point() + offset), &c.point()))
            })
            .fold((0.0, 0usize), |(s, n), d| (s + d, n + 1));

        let disp = if n > 0 {
            sum / n as f32
        } else {
            na::distance(&self.predict(frame), &bbox.center())
        };

        let sigma = (self.bbox.height() * config.displacement_sigma).max(0.01)
            * (1.0 + config.sigma_growth * (gap - 1.0));
        let displacement = math::gauss(disp, sigma);

        let shift = bbox.center() - self.center();
        let motion = if self.initialized && self.vel.norm() >= config.min_speed {
            let cos = shift.dot(&offset) / (shift.norm() * offset.norm() + f32::EPSILON);
            let heading = (cos.clamp(-1.0, 1.0) + 1.0) * 0.5;

            if shift.norm() < config.min_speed * gap {
                heading * 0.5
            } else {
                heading
            }
        } else {
            0.5
        };

        let size = (ratio(bbox.width(), self.bbox.width()) * ratio(bbox.height(), self.bbox.height()))
            .sqrt();

        let weights = config.iou_weight
            + config.displacement_weight
            + config.motion_weight
            + config.size_weight;

        Some(
            (config.iou_weight * overlap
                + config.displacement_weight * displacement
                + config.motion_weight * motion
                + config.size_weight * size)
                / weights,
        )
    }

    pub fn update(&mut self, frame: usize, skeleton: &Skeleton, config: &IdentityConfig) {
        let bbox = if let Some(b) = skeleton.bbox(config.joint_confidence) {
            b
        } else {
            return;
        };

        let dt = self.dt(frame);
        if dt.abs() < f32::EPSILON {
            return;
        }

        let vel = (bbox.center() - self.center()) / dt;

        if self.initialized {
            let a = config.velocity_smoothing;
            self.vel = self.vel * (1.0 - a) + vel * a;
        } else {
            self.vel = vel;
            self.initialized = true;
        }

        self.skeleton = skeleton.clone();
        self.bbox = bbox;
        self.frame = frame;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkSummary {
    pub matched: usize,
    pub uncertain: usize,
    pub empty: usize,
    pub halted_at: Option<usize>,
}

pub struct IdentityTracker {
    config: IdentityConfig,
}

impl IdentityTracker {
    pub fn new(config: IdentityConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    fn seed(&self, frame: usize, skeleton: &Skeleton) -> Result<TrackState> {
        TrackState::new(frame, skeleton.clone(), self.config.joint_confidence)
            .ok_or(Error::MissingSeed(frame))
    }

    fn anchor_state(
        &self,
        frame: usize,
        store: &AssignmentStore,
        detections: &DetectionSet,
    ) -> Option<TrackState> {
        match store.get(frame) {
            FrameAssignment::AthleteConfirmed { pose } => {
                self.seed(frame, detections.skeleton(frame, pose)?).ok()
            }
            _ => None,
        }
    }

    /// Fresh assignments for the whole clip, walking outward from the user's
    /// chosen athlete pose.
    pub fn propagate(
        &self,
        anchor_frame: usize,
        anchor_pose: usize,
        detections: &DetectionSet,
    ) -> Result<AssignmentStore> {
        let skeleton = detections.check_detected(anchor_frame, anchor_pose)?;
        let state = self.seed(anchor_frame, skeleton)?;

        let mut store = AssignmentStore::new(detections.len());
        store.correct(anchor_frame, Correction::Athlete(anchor_pose))?;

        for dir in [Direction::Forward, Direction::Backward] {
            let summary = self.walk(state.clone(), dir, detections, &mut store, None)?;
            debug!(anchor_frame, ?dir, ?summary, "propagation finished");
        }

        Ok(store)
    }

    /// Applies `correction` at `frame` and re-walks only the frames between
    /// it and the nearest anchors on either side.
    pub fn re_propagate(
        &self,
        correction: Correction,
        frame: usize,
        detections: &DetectionSet,
        existing: &AssignmentStore,
    ) -> Result<AssignmentStore> {
        detections.check_frame(frame)?;
        if existing.len() != detections.len() {
            return Err(Error::FrameOutOfRange {
                frame: existing.len(),
                len: detections.len(),
            });
        }

        let seed = match correction {
            Correction::Athlete(pose) => Some(self.seed(frame, detections.check_detected(frame, pose)?)?),
            Correction::NoAthlete | Correction::NoPose => None,
        };

        let mut store = existing.clone();
        store.correct(frame, correction)?;

        for dir in [Direction::Forward, Direction::Backward] {
            let bound = store.nearest_anchor(frame, dir.is_forward());

            // without a pose at `frame`, walk back toward it from the neighbour anchor
            let origin = match &seed {
                Some(state) => Some((state.clone(), dir, bound)),
                None => bound
                    .and_then(|b| self.anchor_state(b, &store, detections))
                    .map(|state| (state, dir.reverse(), Some(frame))),
            };

            let (state, walk_dir, walk_bound) = match origin {
                Some(origin) => origin,
                None => {
                    debug!(frame, ?dir, "no athlete anchor to re-walk from, keeping assignments");
                    continue;
                }
            };

            let span = match dir {
                Direction::Forward => frame + 1..bound.unwrap_or(store.len()),
                Direction::Backward => bound.map_or(0, |b| b + 1)..frame,
            };

            for f in span {
                store.set(f, FrameAssignment::UnreviewedGap)?;
            }

            let summary = self.walk(state, walk_dir, detections, &mut store, walk_bound)?;
            debug!(frame, ?dir, ?summary, "re-propagation finished");
        }

        Ok(store)
    }

    fn walk(
        &self,
        mut state: TrackState,
        dir: Direction,
        detections: &DetectionSet,
        store: &mut AssignmentStore,
        bound: Option<usize>,
    ) -> Result<WalkSummary> {
        let cfg = &self.config;
        let mut summary = WalkSummary::default();
        let mut misses = 0usize;
        let mut frame = state.frame;

        while let Some(next) = dir.step(frame, detections.len()) {
            frame = next;

            if Some(frame) == bound || store.get(frame).is_anchor() {
                break;
            }

            let candidates = match detections.frame(frame) {
                Some(f) => f,
                None => break,
            };

            let best = candidates
                .candidates()
                .filter_map(|(idx, s)| Some((idx, state.score(frame, s, cfg)?)))
                .max_by(|a, b| a.1.total_cmp(&b.1));

            let threshold = if misses > 0 {
                cfg.low_threshold + cfg.reacquire_hysteresis
            } else {
                cfg.low_threshold
            };

            match best {
                Some((pose, score)) if score >= threshold => {
                    let value = if score >= cfg.high_threshold {
                        summary.matched += 1;
                        FrameAssignment::AthleteAuto {
                            pose,
                            confidence: score,
                        }
                    } else {
                        summary.uncertain += 1;
                        FrameAssignment::AthleteUncertain {
                            pose,
                            confidence: score,
                        }
                    };

                    store.set(frame, value)?;
                    if let Some(skeleton) = candidates.get(pose) {
                        state.update(frame, skeleton, cfg);
                    }
                    misses = 0;
                }
                Some(_) => {
                    store.set(frame, FrameAssignment::UnreviewedGap)?;
                    misses += 1;
                }
                None if candidates.candidates().next().is_none() => {
                    store.set(frame, FrameAssignment::NoAthleteAuto)?;
                    summary.empty += 1;
                    misses += 1;
                }
                None => {
                    store.set(frame, FrameAssignment::UnreviewedGap)?;
                    misses += 1;
                }
            }

            if misses >= cfg.max_misses {
                summary.halted_at = Some(frame);
                break;
            }
        }

        Ok(summary)
    }
}
