use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::InterpolationConfig;
use crate::math::lerp;
use crate::skeleton::{Joint, JointKind, Skeleton, SkeletonSource};

/// The athlete's state in one frame as seen by the interpolator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum TrackFrame {
    Pose { skeleton: Skeleton, anchored: bool },
    Gap,
    /// Athlete confirmed absent or without a pose, never bridged.
    Blocked,
}

impl TrackFrame {
    pub fn skeleton(&self) -> Option<&Skeleton> {
        match self {
            TrackFrame::Pose { skeleton, .. } => Some(skeleton),
            TrackFrame::Gap | TrackFrame::Blocked => None,
        }
    }
}

pub struct GapInterpolator {
    config: InterpolationConfig,
}

impl GapInterpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        Self { config }
    }

    fn is_boundary(&self, frame: &TrackFrame) -> bool {
        frame.skeleton().map_or(false, |s| {
            s.confident_count(self.config.joint_confidence) >= self.config.min_boundary_joints
        })
    }

    /// Non-boundary frames that may be replaced. Sparse anchored poses may not.
    fn is_bridgeable(&self, frame: &TrackFrame) -> bool {
        match frame {
            TrackFrame::Gap => true,
            TrackFrame::Pose { anchored, .. } => !anchored,
            TrackFrame::Blocked => false,
        }
    }

    fn blend(&self, from: &Skeleton, to: &Skeleton, t: f32) -> Option<Skeleton> {
        let jc = self.config.joint_confidence;

        let joints: Vec<(JointKind, Joint)> = JointKind::ALL
            .iter()
            .filter_map(|&kind| {
                let a = from.confident_joint(kind, jc)?;
                let b = to.confident_joint(kind, jc)?;

                Some((
                    kind,
                    Joint::new(
                        lerp(a.x, b.x, t),
                        lerp(a.y, b.y, t),
                        a.confidence.min(b.confidence) * self.config.confidence_decay,
                    ),
                ))
            })
            .collect();

        if joints.is_empty() {
            return None;
        }

        Some(Skeleton::from_joints(joints).with_source(SkeletonSource::Interpolated))
    }

    /// Interpolated skeletons for every bridgeable frame lying in a short
    /// enough run between two boundary frames.
    pub fn fill(&self, track: &[TrackFrame]) -> BTreeMap<usize, Skeleton> {
        let mut out = BTreeMap::new();

        let boundaries: Vec<usize> = track
            .iter()
            .enumerate()
            .filter(|(_, f)| self.is_boundary(f))
            .map(|(i, _)| i)
            .collect();

        for pair in boundaries.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let run = end - start - 1;

            if run == 0 {
                continue;
            }

            if run > self.config.max_gap {
                debug!(start, end, run, "gap too long to interpolate");
                continue;
            }

            if !track[start + 1..end].iter().all(|f| self.is_bridgeable(f)) {
                continue;
            }

            let (from, to) = match (track[start].skeleton(), track[end].skeleton()) {
                (Some(from), Some(to)) => (from, to),
                _ => continue,
            };

            let span = (end - start) as f32;
            for frame in start + 1..end {
                let t = (frame - start) as f32 / span;
                if let Some(s) = self.blend(from, to, t) {
                    out.insert(frame, s);
                }
            }
        }

        debug!(filled = out.len(), "interpolation done");

        out
    }

    pub fn interpolate(&self, track: &[TrackFrame]) -> Vec<TrackFrame> {
        let mut filled = self.fill(track);

        track
            .iter()
            .enumerate()
            .map(|(i, f)| match filled.remove(&i) {
                Some(skeleton) => TrackFrame::Pose {
                    skeleton,
                    anchored: false,
                },
                None => f.clone(),
            })
            .collect()
    }
}
