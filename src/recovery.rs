//! Recovery cascade for frames the identity tracker left unresolved.
//!
//! Every frame is tried independently, strategy by strategy, and the outcome
//! of each attempt is recorded. Results are merged on the calling thread in
//! frame order.

use nalgebra as na;
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::assignment::{AssignmentStore, FrameAssignment};
use crate::bbox::{BBox, Ltrb};
use crate::config::{RecoveryConfig, TrajectoryConfig};
use crate::detector::{HumanDetector, PoseDetector};
use crate::error::{Error, Result};
use crate::frame::DetectionSet;
use crate::skeleton::{Skeleton, SkeletonSource};
use crate::trajectory::{TrajectoryModel, Validation};

const CHUNK: usize = 16;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    VisualTracker,
    TrajectoryCrop,
    SecondaryDetector,
    HumanBox,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::VisualTracker,
        Priority::TrajectoryCrop,
        Priority::SecondaryDetector,
        Priority::HumanBox,
    ];

    /// Assignment confidence given to frames recovered by this strategy.
    pub fn confidence(self, config: &RecoveryConfig) -> f32 {
        match self {
            Priority::VisualTracker => config.visual_tracker_confidence,
            Priority::TrajectoryCrop => config.trajectory_crop_confidence,
            Priority::SecondaryDetector => config.secondary_detector_confidence,
            Priority::HumanBox => config.human_box_confidence,
        }
    }
}

/// Why a single strategy did not resolve a frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Failure {
    /// The visual tracker produced no box for the frame.
    NoBox,
    /// The tracked box drifted off the trajectory.
    BoxRejected,
    NoModel,
    NoDetector,
    /// Neither a trajectory nor resolved neighbours to measure distance to.
    NoReference,
    NothingDetected,
    TooFar { distance: f32 },
    Service(String),
    Cancelled,
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        if err.is_cancelled() {
            Failure::Cancelled
        } else {
            Failure::Service(err.to_string())
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Recovered {
    pub priority: Priority,
    pub skeleton: Skeleton,
    pub confidence: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FrameRecovery {
    pub frame: usize,
    pub attempts: Vec<(Priority, Failure)>,
    pub recovered: Option<Recovered>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RecoveryReport {
    pub frames: Vec<FrameRecovery>,
}

impl RecoveryReport {
    pub fn get(&self, frame: usize) -> Option<&FrameRecovery> {
        self.frames
            .binary_search_by_key(&frame, |r| r.frame)
            .ok()
            .map(|i| &self.frames[i])
    }

    pub fn recovered_by(&self, priority: Priority) -> usize {
        self.frames
            .iter()
            .filter(|r| matches!(&r.recovered, Some(rec) if rec.priority == priority))
            .count()
    }

    pub fn recovered(&self) -> usize {
        self.frames.iter().filter(|r| r.recovered.is_some()).count()
    }

    pub fn unresolved(&self) -> usize {
        self.frames.len() - self.recovered()
    }

    /// Writes every recovered skeleton into its frame and marks the frame
    /// `AthleteAuto`. Frames that stopped being fillable are skipped.
    pub fn merge(&self, store: &mut AssignmentStore, detections: &mut DetectionSet) -> Result<usize> {
        let mut merged = 0;

        for rec in &self.frames {
            let found = match &rec.recovered {
                Some(found) => found,
                None => continue,
            };

            if !store.get(rec.frame).is_fillable() {
                continue;
            }

            let pose = detections.insert(rec.frame, found.skeleton.clone())?;
            store.set(
                rec.frame,
                FrameAssignment::AthleteAuto {
                    pose,
                    confidence: found.confidence,
                },
            )?;
            merged += 1;
        }

        Ok(merged)
    }
}

/// Shared cancellation flag for a running analysis.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Default)]
pub struct Detectors<'a> {
    pub pose: Option<&'a dyn PoseDetector>,
    pub secondary: Option<&'a dyn PoseDetector>,
    pub humans: Option<&'a dyn HumanDetector>,
}

/// Everything the cascade knows about the athlete besides the detectors.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryContext<'a> {
    pub model: Option<&'a TrajectoryModel>,
    pub trajectory: &'a TrajectoryConfig,
    pub tracked: &'a Validation,
    pub typical_size: Option<na::Vector2<f32>>,
    /// Athlete centers of frames already resolved.
    pub resolved: &'a BTreeMap<usize, na::Point2<f32>>,
}

impl<'a> RecoveryContext<'a> {
    /// Where the athlete should be: the trajectory prediction, or a linear
    /// estimate from the nearest resolved frames.
    pub fn reference(&self, frame: usize) -> Option<na::Point2<f32>> {
        match self.model {
            Some(model) => Some(model.predict_center(frame)),
            None => velocity_reference(self.resolved, frame),
        }
    }
}

pub fn resolved_centers(
    store: &AssignmentStore,
    detections: &DetectionSet,
    joint_confidence: f32,
) -> BTreeMap<usize, na::Point2<f32>> {
    store
        .iter()
        .filter_map(|(frame, a)| {
            let skeleton = detections.skeleton(frame, a.pose_index()?)?;
            Some((frame, skeleton.center(joint_confidence)?))
        })
        .collect()
}

/// Interpolates between the closest resolved frames on both sides, or
/// extrapolates from the two closest on one side.
pub fn velocity_reference(
    resolved: &BTreeMap<usize, na::Point2<f32>>,
    frame: usize,
) -> Option<na::Point2<f32>> {
    if let Some(p) = resolved.get(&frame) {
        return Some(*p);
    }

    let mut before = resolved.range(..frame).rev();
    let mut after = resolved.range(frame + 1..);

    let at = |(f0, p0): (&usize, &na::Point2<f32>), (f1, p1): (&usize, &na::Point2<f32>)| {
        let span = *f1 as f32 - *f0 as f32;
        let t = (frame as f32 - *f0 as f32) / span;
        p0 + (p1 - p0) * t
    };

    match (before.next(), after.next()) {
        (Some(b), Some(a)) => Some(at(b, a)),
        (Some(b), None) => Some(before.next().map_or(*b.1, |b2| at(b2, b))),
        (None, Some(a)) => Some(after.next().map_or(*a.1, |a2| at(a, a2))),
        (None, None) => None,
    }
}

pub struct RecoveryCascade<'a> {
    config: &'a RecoveryConfig,
    detectors: Detectors<'a>,
    context: RecoveryContext<'a>,
}

impl<'a> RecoveryCascade<'a> {
    pub fn new(
        config: &'a RecoveryConfig,
        detectors: Detectors<'a>,
        context: RecoveryContext<'a>,
    ) -> Self {
        Self {
            config,
            detectors,
            context,
        }
    }

    /// Usable skeleton nearest to `target`, optionally restricted to those
    /// centered inside `region`.
    fn nearest(
        &self,
        skeletons: Vec<Skeleton>,
        target: &na::Point2<f32>,
        region: Option<&BBox<Ltrb>>,
    ) -> Option<(Skeleton, f32)> {
        let jc = self.config.joint_confidence;

        skeletons
            .into_iter()
            .filter(|s| s.confident_count(jc) >= self.config.min_joints)
            .filter_map(|s| {
                let c = s.center(jc)?;
                if region.map_or(true, |r| r.contains(&c)) {
                    Some((s, na::distance(&c, target)))
                } else {
                    None
                }
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    fn crop(&self, frame: usize, region: &BBox<Ltrb>) -> std::result::Result<Skeleton, Failure> {
        let detector = self.detectors.pose.ok_or(Failure::NoDetector)?;
        let found = detector.detect(frame, Some(region))?;

        self.nearest(found, &region.center(), Some(region))
            .map(|(s, _)| s)
            .ok_or(Failure::NothingDetected)
    }

    fn visual_tracker(&self, frame: usize) -> std::result::Result<Skeleton, Failure> {
        if self.context.tracked.rejected.contains(&frame) {
            return Err(Failure::BoxRejected);
        }

        let bbox = self.context.tracked.accepted.get(&frame).ok_or(Failure::NoBox)?;
        self.crop(frame, bbox)
    }

    fn trajectory_crop(&self, frame: usize) -> std::result::Result<Skeleton, Failure> {
        let model = self.context.model.ok_or(Failure::NoModel)?;
        let size = self.context.typical_size.ok_or(Failure::NoModel)?;

        let region = model.predict_search_region(frame, size, self.context.trajectory);
        self.crop(frame, &region)
    }

    fn secondary_detector(&self, frame: usize) -> std::result::Result<Skeleton, Failure> {
        let detector = self.detectors.secondary.ok_or(Failure::NoDetector)?;
        let target = self.context.reference(frame).ok_or(Failure::NoReference)?;

        let (skeleton, distance) = self
            .nearest(detector.detect(frame, None)?, &target, None)
            .ok_or(Failure::NothingDetected)?;

        if distance > self.config.secondary_max_distance {
            return Err(Failure::TooFar { distance });
        }

        Ok(skeleton)
    }

    fn human_box(&self, frame: usize) -> std::result::Result<Skeleton, Failure> {
        let detector = self.detectors.humans.ok_or(Failure::NoDetector)?;
        let target = self.context.reference(frame).ok_or(Failure::NoReference)?;

        let (bbox, distance) = detector
            .detect_humans(frame)?
            .into_iter()
            .map(|b| {
                let d = na::distance(&b.center(), &target);
                (b, d)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or(Failure::NothingDetected)?;

        if distance > self.config.human_box_max_distance {
            return Err(Failure::TooFar { distance });
        }

        match self.crop(frame, &bbox) {
            Err(reason @ (Failure::NothingDetected | Failure::NoDetector)) => {
                debug!(frame, ?reason, "no joints in human box, using its center");
                Ok(Skeleton::placeholder(
                    bbox.center(),
                    self.config.human_box_confidence,
                ))
            }
            other => other,
        }
    }

    /// Runs the strategies in priority order until one resolves `frame`.
    pub fn attempt(&self, frame: usize, cancel: &CancelToken) -> FrameRecovery {
        let mut attempts = Vec::new();

        for priority in Priority::ALL {
            if cancel.is_cancelled() {
                attempts.push((priority, Failure::Cancelled));
                break;
            }

            let result = match priority {
                Priority::VisualTracker => self.visual_tracker(frame),
                Priority::TrajectoryCrop => self.trajectory_crop(frame),
                Priority::SecondaryDetector => self.secondary_detector(frame),
                Priority::HumanBox => self.human_box(frame),
            };

            match result {
                Ok(skeleton) => {
                    let skeleton = if skeleton.is_placeholder() {
                        skeleton
                    } else {
                        skeleton.with_source(SkeletonSource::Recovered(priority))
                    };

                    return FrameRecovery {
                        frame,
                        attempts,
                        recovered: Some(Recovered {
                            priority,
                            skeleton,
                            confidence: priority.confidence(self.config),
                        }),
                    };
                }
                Err(reason) => attempts.push((priority, reason)),
            }
        }

        FrameRecovery {
            frame,
            attempts,
            recovered: None,
        }
    }

    /// Attempts every frame on the rayon pool. `on_progress` receives
    /// `(done, total)` on the calling thread. A cancelled run yields nothing.
    pub fn run<F>(&self, frames: &[usize], cancel: &CancelToken, mut on_progress: F) -> Result<RecoveryReport>
    where
        F: FnMut(usize, usize),
    {
        let frames: Vec<usize> = frames
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut report = RecoveryReport::default();

        for chunk in frames.chunks(CHUNK) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut done: Vec<FrameRecovery> = chunk
                .par_iter()
                .map(|&frame| self.attempt(frame, cancel))
                .collect();

            report.frames.append(&mut done);
            on_progress(report.frames.len(), frames.len());
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!(
            frames = report.frames.len(),
            recovered = report.recovered(),
            tracker = report.recovered_by(Priority::VisualTracker),
            trajectory = report.recovered_by(Priority::TrajectoryCrop),
            secondary = report.recovered_by(Priority::SecondaryDetector),
            human = report.recovered_by(Priority::HumanBox),
            "recovery finished"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::Correction;
    use crate::skeleton::figure;

    /// Returns the stored skeletons whose center lies in the region.
    struct Fixed(Vec<Skeleton>);

    impl PoseDetector for Fixed {
        fn detect(&self, _frame: usize, region: Option<&BBox<Ltrb>>) -> Result<Vec<Skeleton>> {
            Ok(self
                .0
                .iter()
                .filter(|s| match (region, s.center(0.3)) {
                    (Some(r), Some(c)) => r.contains(&c),
                    _ => true,
                })
                .cloned()
                .collect())
        }
    }

    struct Failing;

    impl PoseDetector for Failing {
        fn detect(&self, _frame: usize, _region: Option<&BBox<Ltrb>>) -> Result<Vec<Skeleton>> {
            Err(Error::service("model crashed"))
        }
    }

    struct Interrupted;

    impl PoseDetector for Interrupted {
        fn detect(&self, _frame: usize, _region: Option<&BBox<Ltrb>>) -> Result<Vec<Skeleton>> {
            Err(Error::Cancelled)
        }
    }

    struct Humans(Vec<BBox<Ltrb>>);

    impl HumanDetector for Humans {
        fn detect_humans(&self, _frame: usize) -> Result<Vec<BBox<Ltrb>>> {
            Ok(self.0.clone())
        }
    }

    fn still_model() -> TrajectoryModel {
        TrajectoryModel {
            horizontal: [0.0, 0.5],
            vertical: [0.0, 0.0, 0.5],
            r_squared: 1.0,
            anchor_count: 5,
            domain: (0, 10),
        }
    }

    fn tracked(frame: usize, center: na::Point2<f32>) -> Validation {
        let mut v = Validation::default();
        v.accepted.insert(frame, BBox::around(center, 0.15, 0.3));
        v
    }

    struct Fixture {
        config: RecoveryConfig,
        trajectory: TrajectoryConfig,
        model: TrajectoryModel,
        resolved: BTreeMap<usize, na::Point2<f32>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                config: RecoveryConfig::default(),
                trajectory: TrajectoryConfig::default(),
                model: still_model(),
                resolved: BTreeMap::new(),
            }
        }

        fn context<'a>(&'a self, tracked: &'a Validation, with_model: bool) -> RecoveryContext<'a> {
            RecoveryContext {
                model: if with_model { Some(&self.model) } else { None },
                trajectory: &self.trajectory,
                tracked,
                typical_size: Some(na::Vector2::new(0.1, 0.2)),
                resolved: &self.resolved,
            }
        }
    }

    #[test]
    fn tracked_box_is_tried_first() {
        let fx = Fixture::new();
        let athlete = figure(na::Point2::new(0.5, 0.5), 0.2, 0.9);
        let pose = Fixed(vec![athlete]);
        let boxes = tracked(3, na::Point2::new(0.5, 0.5));

        let cascade = RecoveryCascade::new(
            &fx.config,
            Detectors {
                pose: Some(&pose),
                ..Default::default()
            },
            fx.context(&boxes, true),
        );
        let rec = cascade.attempt(3, &CancelToken::new());

        let found = rec.recovered.unwrap();
        assert_eq!(found.priority, Priority::VisualTracker);
        assert_eq!(found.confidence, 0.55);
        assert_eq!(
            found.skeleton.source(),
            SkeletonSource::Recovered(Priority::VisualTracker)
        );
        assert!(rec.attempts.is_empty());
    }

    #[test]
    fn rejected_box_falls_through_to_trajectory_crop() {
        let fx = Fixture::new();
        let athlete = figure(na::Point2::new(0.5, 0.5), 0.2, 0.9);
        let bystander = figure(na::Point2::new(0.85, 0.5), 0.2, 0.9);
        let pose = Fixed(vec![bystander, athlete]);

        let mut boxes = tracked(3, na::Point2::new(0.85, 0.5));
        boxes.reject(vec![3]);

        let cascade = RecoveryCascade::new(
            &fx.config,
            Detectors {
                pose: Some(&pose),
                ..Default::default()
            },
            fx.context(&boxes, true),
        );
        let rec = cascade.attempt(3, &CancelToken::new());

        assert_eq!(rec.attempts, vec![(Priority::VisualTracker, Failure::BoxRejected)]);
        let found = rec.recovered.unwrap();
        assert_eq!(found.priority, Priority::TrajectoryCrop);
        assert!((found.skeleton.center(0.3).unwrap().x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn far_secondary_result_escalates_to_human_box_placeholder() {
        let fx = Fixture::new();
        let far = Fixed(vec![figure(na::Point2::new(0.9, 0.5), 0.2, 0.9)]);
        let humans = Humans(vec![
            BBox::around(na::Point2::new(0.9, 0.9), 0.1, 0.2),
            BBox::around(na::Point2::new(0.55, 0.5), 0.1, 0.2),
        ]);
        let boxes = Validation::default();

        let cascade = RecoveryCascade::new(
            &fx.config,
            Detectors {
                pose: None,
                secondary: Some(&far),
                humans: Some(&humans),
            },
            fx.context(&boxes, true),
        );
        let rec = cascade.attempt(4, &CancelToken::new());

        assert_eq!(rec.attempts[0], (Priority::VisualTracker, Failure::NoBox));
        assert_eq!(rec.attempts[1], (Priority::TrajectoryCrop, Failure::NoDetector));
        assert!(matches!(
            rec.attempts[2],
            (Priority::SecondaryDetector, Failure::TooFar { .. })
        ));

        let found = rec.recovered.unwrap();
        assert_eq!(found.priority, Priority::HumanBox);
        assert!(found.skeleton.is_placeholder());
        let c = found.skeleton.center(0.3).unwrap();
        assert!((c.x - 0.55).abs() < 1e-5 && (c.y - 0.5).abs() < 1e-5);
        assert_eq!(found.confidence, 0.25);
    }

    #[test]
    fn service_errors_are_soft_failures() {
        let fx = Fixture::new();
        let boxes = tracked(2, na::Point2::new(0.5, 0.5));

        let cascade = RecoveryCascade::new(
            &fx.config,
            Detectors {
                pose: Some(&Failing),
                secondary: Some(&Failing),
                humans: None,
            },
            fx.context(&boxes, true),
        );
        let report = cascade.run(&[2], &CancelToken::new(), |_, _| {}).unwrap();

        let rec = report.get(2).unwrap();
        assert!(rec.recovered.is_none());
        assert_eq!(rec.attempts.len(), 4);
        assert!(matches!(rec.attempts[0].1, Failure::Service(_)));
        assert_eq!(report.unresolved(), 1);
    }

    fn human_box_attempt(pose: &dyn PoseDetector) -> FrameRecovery {
        let fx = Fixture::new();
        let humans = Humans(vec![BBox::around(na::Point2::new(0.55, 0.5), 0.1, 0.2)]);
        let boxes = Validation::default();

        let cascade = RecoveryCascade::new(
            &fx.config,
            Detectors {
                pose: Some(pose),
                secondary: None,
                humans: Some(&humans),
            },
            fx.context(&boxes, true),
        );
        cascade.attempt(4, &CancelToken::new())
    }

    #[test]
    fn failed_crop_in_human_box_is_not_a_placeholder() {
        let rec = human_box_attempt(&Failing);
        assert!(rec.recovered.is_none());
        assert!(matches!(
            rec.attempts.last(),
            Some((Priority::HumanBox, Failure::Service(_)))
        ));

        let rec = human_box_attempt(&Interrupted);
        assert!(rec.recovered.is_none());
        assert_eq!(
            rec.attempts.last(),
            Some(&(Priority::HumanBox, Failure::Cancelled))
        );
    }

    #[test]
    fn cancelled_run_returns_nothing() {
        let fx = Fixture::new();
        let boxes = Validation::default();
        let cascade = RecoveryCascade::new(&fx.config, Detectors::default(), fx.context(&boxes, true));

        let cancel = CancelToken::new();
        cancel.cancel();

        assert!(matches!(
            cascade.run(&[1, 2, 3], &cancel, |_, _| {}),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn run_reports_progress_in_frame_order() {
        let fx = Fixture::new();
        let boxes = Validation::default();
        let cascade = RecoveryCascade::new(&fx.config, Detectors::default(), fx.context(&boxes, false));

        let frames: Vec<usize> = (0..40).rev().collect();
        let mut seen = Vec::new();
        let report = cascade
            .run(&frames, &CancelToken::new(), |done, total| seen.push((done, total)))
            .unwrap();

        assert!(report.frames.windows(2).all(|w| w[0].frame < w[1].frame));
        assert_eq!(seen.last(), Some(&(40, 40)));
        assert_eq!(report.get(7).unwrap().attempts[1], (Priority::TrajectoryCrop, Failure::NoModel));
    }

    #[test]
    fn merge_only_touches_fillable_frames() {
        let config = RecoveryConfig::default();
        let mut dets = DetectionSet::new(vec![vec![]; 3]);
        let mut store = AssignmentStore::new(3);
        store.correct(1, Correction::NoAthlete).unwrap();

        let skeleton = figure(na::Point2::new(0.5, 0.5), 0.2, 0.9)
            .with_source(SkeletonSource::Recovered(Priority::TrajectoryCrop));
        let report = RecoveryReport {
            frames: (0..3)
                .map(|frame| FrameRecovery {
                    frame,
                    attempts: vec![],
                    recovered: Some(Recovered {
                        priority: Priority::TrajectoryCrop,
                        skeleton: skeleton.clone(),
                        confidence: Priority::TrajectoryCrop.confidence(&config),
                    }),
                })
                .collect(),
        };

        assert_eq!(report.merge(&mut store, &mut dets).unwrap(), 2);
        assert_eq!(store.get(1), FrameAssignment::NoAthleteConfirmed);
        assert_eq!(
            store.get(2),
            FrameAssignment::AthleteAuto {
                pose: 0,
                confidence: 0.45
            }
        );
        assert!(dets.frame(0).unwrap().is_synthetic(0));
        assert!(dets.frame(1).unwrap().is_empty());
    }

    #[test]
    fn velocity_reference_interpolates_and_extrapolates() {
        let resolved: BTreeMap<_, _> = vec![
            (0, na::Point2::new(0.1, 0.5)),
            (2, na::Point2::new(0.2, 0.5)),
            (10, na::Point2::new(0.6, 0.3)),
        ]
        .into_iter()
        .collect();

        let mid = velocity_reference(&resolved, 6).unwrap();
        assert!((mid.x - 0.4).abs() < 1e-5);
        assert!((mid.y - 0.4).abs() < 1e-5);

        let ahead = velocity_reference(&resolved, 12).unwrap();
        assert!((ahead.x - 0.7).abs() < 1e-5);

        let behind = velocity_reference(&resolved, 0).unwrap();
        assert_eq!(behind, na::Point2::new(0.1, 0.5));

        assert!(velocity_reference(&BTreeMap::new(), 3).is_none());
    }
}
