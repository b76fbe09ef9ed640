use serde_derive::{Deserialize, Serialize};

use crate::assignment::AssignmentStore;
use crate::error::Result;
use crate::path::AthletePathPoint;
use crate::recovery::RecoveryReport;
use crate::skeleton::Skeleton;
use crate::trajectory::TrajectoryModel;

/// Result of one analysis cycle, handed to analysis and UI consumers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackOutcome {
    pub assignments: AssignmentStore,
    pub model: Option<TrajectoryModel>,
    pub path: Vec<AthletePathPoint>,
    pub takeoff_frame: Option<usize>,
    /// Frames still `AthleteUncertain` or `UnreviewedGap`.
    pub needs_review: usize,
    pub recovery: RecoveryReport,
    /// Frames filled by the gap interpolator.
    pub interpolated: usize,
    /// Smoothed athlete skeleton per frame.
    pub track: Vec<Option<Skeleton>>,
}

impl TrackOutcome {
    #[inline]
    pub fn athlete(&self, frame: usize) -> Option<&Skeleton> {
        self.track.get(frame)?.as_ref()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
