//! Session context: owns the detections, the assignment store and the
//! fitted trajectory of one clip, and runs the analysis chain over them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use crate::assignment::{AssignmentStore, Correction, FrameAssignment};
use crate::bbox::{BBox, Ltrb};
use crate::config::TrackingConfig;
use crate::detector::VisualTracker;
use crate::error::{Error, Result};
use crate::frame::DetectionSet;
use crate::interpolate::{GapInterpolator, TrackFrame};
use crate::path::build_path;
use crate::recovery::{self, CancelToken, Detectors, RecoveryCascade, RecoveryContext};
use crate::skeleton::Skeleton;
use crate::smooth::Smoother;
use crate::track::TrackOutcome;
use crate::tracker::IdentityTracker;
use crate::trajectory::{self, TrajectoryModel, Validation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    VisualTracking,
    Fitting,
    Recovery,
    Interpolation,
    Smoothing,
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Started(Stage),
    Recovery { done: usize, total: usize },
    Finished(Stage),
}

/// External services available to one analysis run.
#[derive(Default)]
pub struct Services<'a> {
    pub detectors: Detectors<'a>,
    pub visual: Option<&'a mut dyn VisualTracker>,
}

#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub progress: Option<Sender<Progress>>,
    pub cancel: CancelToken,
}

impl RunControl {
    fn report(&self, p: Progress) {
        if let Some(tx) = &self.progress {
            // a dropped receiver only means nobody is listening
            let _ = tx.send(p);
        }
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Tracked boxes rejected under a given anchor set.
#[derive(Debug, Clone, PartialEq)]
struct FitCycle {
    anchors: Vec<usize>,
    rejected: BTreeSet<usize>,
}

pub struct Session {
    config: TrackingConfig,
    tracker: IdentityTracker,
    detections: DetectionSet,
    store: Option<AssignmentStore>,
    selected: usize,
    model: Option<TrajectoryModel>,
    cycle: Option<FitCycle>,
}

impl Session {
    pub fn new(config: TrackingConfig, detections: DetectionSet) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            tracker: IdentityTracker::new(config.identity.clone()),
            config,
            detections,
            store: None,
            selected: 0,
            model: None,
            cycle: None,
        })
    }

    #[inline]
    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    #[inline]
    pub fn detections(&self) -> &DetectionSet {
        &self.detections
    }

    #[inline]
    pub fn assignments(&self) -> Option<&AssignmentStore> {
        self.store.as_ref()
    }

    #[inline]
    pub fn model(&self) -> Option<&TrajectoryModel> {
        self.model.as_ref()
    }

    /// Starts over from the user's pick of the athlete.
    pub fn select_athlete(&mut self, frame: usize, pose: usize) -> Result<()> {
        let mut detections = self.detections.clone();
        detections.strip_synthetic();
        let store = self.tracker.propagate(frame, pose, &detections)?;

        info!(
            frame,
            pose,
            review = store.needs_review(),
            "athlete selected"
        );

        self.store = Some(store);
        self.detections = detections;
        self.selected = frame;
        self.model = None;
        self.cycle = None;

        Ok(())
    }

    pub fn correct(&mut self, frame: usize, correction: Correction) -> Result<()> {
        let store = self.store.as_ref().ok_or(Error::NoAthleteSelected)?;

        // synthesized poses between the neighbouring anchors go first, so
        // every pose index the re-walk can see refers to detector output
        let span = store.nearest_anchor(frame, false).map_or(0, |f| f + 1)
            ..store.nearest_anchor(frame, true).unwrap_or(store.len());

        let mut rolled_back = store.clone();
        let released = rolled_back.release_synthetic_in(&self.detections, span.clone());
        let mut detections = self.detections.clone();
        let stripped = detections.strip_synthetic_in(span.clone());
        debug!(?span, released, stripped, "correction span rolled back");

        let next = self
            .tracker
            .re_propagate(correction, frame, &detections, &rolled_back)?;

        info!(frame, ?correction, review = next.needs_review(), "correction applied");

        self.store = Some(next);
        self.detections = detections;

        Ok(())
    }

    /// Confirmed athlete anchor closest to the original pick.
    fn seed(&self, store: &AssignmentStore) -> Option<(usize, BBox<Ltrb>)> {
        store
            .anchors()
            .filter_map(|(frame, a)| match *a {
                FrameAssignment::AthleteConfirmed { pose } => {
                    let bbox = self
                        .detections
                        .skeleton(frame, pose)?
                        .bbox(self.config.identity.joint_confidence)?;
                    Some((frame, bbox))
                }
                _ => None,
            })
            .min_by_key(|(frame, _)| (*frame as isize - self.selected as isize).abs())
    }

    fn visual_pass(
        &self,
        store: &AssignmentStore,
        detections: &DetectionSet,
        visual: Option<&mut dyn VisualTracker>,
    ) -> Result<BTreeMap<usize, BBox<Ltrb>>> {
        let visual = match visual {
            Some(v) => v,
            None => return Ok(BTreeMap::new()),
        };

        let (seed_frame, seed) = self
            .seed(store)
            .ok_or(Error::MissingSeed(self.selected))?;

        let hints: BTreeMap<usize, BBox<Ltrb>> = store
            .anchors()
            .filter_map(|(frame, a)| {
                let s = detections.skeleton(frame, a.pose_index()?)?;
                Some((frame, s.bbox(self.config.identity.joint_confidence)?))
            })
            .collect();

        visual.run_tracking_pass(
            &seed,
            seed_frame,
            0..detections.len(),
            &hints,
            self.config.recovery.tracker_min_confidence,
        )
    }

    /// Adds interpolated poses to frames without an athlete pose, or whose
    /// pose is only a placeholder.
    fn merge_interpolated(
        store: &mut AssignmentStore,
        detections: &mut DetectionSet,
        filled: BTreeMap<usize, Skeleton>,
        max_confidence: f32,
    ) -> Result<usize> {
        let mut merged = 0;

        for (frame, skeleton) in filled {
            let current = store.get(frame);
            let replaceable = current.is_fillable()
                || (!current.is_anchor()
                    && current
                        .pose_index()
                        .and_then(|p| detections.skeleton(frame, p))
                        .map_or(false, |s| s.is_placeholder()));

            if !replaceable {
                continue;
            }

            let confidence = skeleton.mean_confidence().min(max_confidence);
            let pose = detections.insert(frame, skeleton)?;
            store.set(frame, FrameAssignment::AthleteAuto { pose, confidence })?;
            merged += 1;
        }

        Ok(merged)
    }

    /// Runs visual tracking, fitting, validation, recovery, interpolation,
    /// smoothing and path building over the current assignments.
    ///
    /// The session is only updated once every stage has finished, so a
    /// cancelled or failed run leaves it as it was.
    pub fn analyze(&mut self, services: Services<'_>, control: &RunControl) -> Result<TrackOutcome> {
        let cfg = &self.config;

        let mut store = self.store.clone().ok_or(Error::NoAthleteSelected)?;
        let mut detections = self.detections.clone();
        let released = store.release_synthetic(&detections);
        let stripped = detections.strip_synthetic();
        debug!(released, stripped, "previous cycle rolled back");

        control.checkpoint()?;
        control.report(Progress::Started(Stage::VisualTracking));
        let tracked = match self.visual_pass(&store, &detections, services.visual) {
            Ok(boxes) => boxes,
            Err(err) => {
                warn!(%err, "visual tracking pass skipped");
                BTreeMap::new()
            }
        };
        control.report(Progress::Finished(Stage::VisualTracking));

        control.checkpoint()?;
        control.report(Progress::Started(Stage::Fitting));
        let anchors = trajectory::anchor_points(&store, &detections, &cfg.trajectory);
        let model = TrajectoryModel::fit(&anchors, &cfg.trajectory);
        let typical_size = trajectory::typical_size(&store, &detections, &cfg.trajectory);

        let mut validation = match &model {
            Some(m) => m.validate(&tracked, &cfg.trajectory),
            None => Validation::unchecked(&tracked),
        };

        let anchor_frames: Vec<usize> = anchors.iter().map(|a| a.frame).collect();
        if let Some(prev) = self.cycle.as_ref().filter(|c| c.anchors == anchor_frames) {
            validation.reject(prev.rejected.iter().copied());
        }
        let cycle = FitCycle {
            anchors: anchor_frames,
            rejected: validation.rejected.clone(),
        };

        info!(
            anchors = anchors.len(),
            fitted = model.is_some(),
            accepted = validation.accepted.len(),
            rejected = validation.rejected.len(),
            "trajectory stage done"
        );
        control.report(Progress::Finished(Stage::Fitting));

        control.checkpoint()?;
        control.report(Progress::Started(Stage::Recovery));
        let resolved = recovery::resolved_centers(&store, &detections, cfg.recovery.joint_confidence);
        let fillable: Vec<usize> = store
            .iter()
            .filter(|(_, a)| a.is_fillable())
            .map(|(f, _)| f)
            .collect();

        let report = RecoveryCascade::new(
            &cfg.recovery,
            services.detectors,
            RecoveryContext {
                model: model.as_ref(),
                trajectory: &cfg.trajectory,
                tracked: &validation,
                typical_size,
                resolved: &resolved,
            },
        )
        .run(&fillable, &control.cancel, |done, total| {
            control.report(Progress::Recovery { done, total })
        })?;

        let recovered = report.merge(&mut store, &mut detections)?;
        debug!(recovered, "recovered frames merged");
        control.report(Progress::Finished(Stage::Recovery));

        control.checkpoint()?;
        control.report(Progress::Started(Stage::Interpolation));
        let frames = track_frames(&store, &detections);
        let filled = GapInterpolator::new(cfg.interpolation.clone()).fill(&frames);
        let interpolated = Self::merge_interpolated(
            &mut store,
            &mut detections,
            filled,
            cfg.interpolation.max_confidence,
        )?;
        control.report(Progress::Finished(Stage::Interpolation));

        control.checkpoint()?;
        control.report(Progress::Started(Stage::Smoothing));
        let raw: Vec<Option<Skeleton>> = store
            .iter()
            .map(|(f, a)| a.pose_index().and_then(|p| detections.skeleton(f, p)).cloned())
            .collect();
        let track = Smoother::new(cfg.smoothing.clone()).smooth(&raw);
        control.report(Progress::Finished(Stage::Smoothing));

        control.report(Progress::Started(Stage::Path));
        let path = build_path(&track, &cfg.path);
        control.report(Progress::Finished(Stage::Path));

        debug_assert!(store.check_indices(&detections).is_ok());

        let outcome = TrackOutcome {
            needs_review: store.needs_review(),
            assignments: store.clone(),
            model: model.clone(),
            path: path.points,
            takeoff_frame: path.takeoff_frame,
            recovery: report,
            interpolated,
            track,
        };

        info!(
            recovered,
            interpolated,
            review = outcome.needs_review,
            takeoff = ?outcome.takeoff_frame,
            "analysis finished"
        );

        self.store = Some(store);
        self.detections = detections;
        self.model = model;
        self.cycle = Some(cycle);

        Ok(outcome)
    }
}

/// Interpolator view of the assignments. Uncertain matches are treated as
/// gaps so a possible bystander never becomes a boundary.
fn track_frames(store: &AssignmentStore, detections: &DetectionSet) -> Vec<TrackFrame> {
    store
        .iter()
        .map(|(frame, a)| {
            let pose = |pose: usize, anchored: bool| {
                detections
                    .skeleton(frame, pose)
                    .map_or(TrackFrame::Gap, |s| TrackFrame::Pose {
                        skeleton: s.clone(),
                        anchored,
                    })
            };

            match *a {
                FrameAssignment::AthleteConfirmed { pose: p } => pose(p, true),
                FrameAssignment::AthleteAuto { pose: p, .. } => pose(p, false),
                FrameAssignment::NoAthleteConfirmed | FrameAssignment::AthleteNoPose => {
                    TrackFrame::Blocked
                }
                FrameAssignment::AthleteUncertain { .. }
                | FrameAssignment::NoAthleteAuto
                | FrameAssignment::UnreviewedGap => TrackFrame::Gap,
            }
        })
        .collect()
}
