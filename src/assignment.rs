//! Per-frame identity decisions.
//!
//! `AthleteConfirmed`, `NoAthleteConfirmed` and `AthleteNoPose` are user
//! anchors: no automatic stage may overwrite them, only a new correction.

use serde_derive::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{Error, Result};
use crate::frame::DetectionSet;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub enum FrameAssignment {
    AthleteConfirmed {
        pose: usize,
    },
    AthleteAuto {
        pose: usize,
        confidence: f32,
    },
    AthleteUncertain {
        pose: usize,
        confidence: f32,
    },
    NoAthleteConfirmed,
    NoAthleteAuto,
    /// Athlete visible but the detector has nothing usable.
    AthleteNoPose,
    #[default]
    UnreviewedGap,
}

impl FrameAssignment {
    #[inline]
    pub fn is_anchor(&self) -> bool {
        matches!(
            self,
            FrameAssignment::AthleteConfirmed { .. }
                | FrameAssignment::NoAthleteConfirmed
                | FrameAssignment::AthleteNoPose
        )
    }

    #[inline]
    pub fn pose_index(&self) -> Option<usize> {
        match *self {
            FrameAssignment::AthleteConfirmed { pose }
            | FrameAssignment::AthleteAuto { pose, .. }
            | FrameAssignment::AthleteUncertain { pose, .. } => Some(pose),
            FrameAssignment::NoAthleteConfirmed
            | FrameAssignment::NoAthleteAuto
            | FrameAssignment::AthleteNoPose
            | FrameAssignment::UnreviewedGap => None,
        }
    }

    /// Match confidence; user-confirmed poses count as certain.
    #[inline]
    pub fn confidence(&self) -> Option<f32> {
        match *self {
            FrameAssignment::AthleteConfirmed { .. } => Some(1.0),
            FrameAssignment::AthleteAuto { confidence, .. }
            | FrameAssignment::AthleteUncertain { confidence, .. } => Some(confidence),
            FrameAssignment::NoAthleteConfirmed
            | FrameAssignment::NoAthleteAuto
            | FrameAssignment::AthleteNoPose
            | FrameAssignment::UnreviewedGap => None,
        }
    }

    /// Frames the recovery stages are allowed to fill.
    #[inline]
    pub fn is_fillable(&self) -> bool {
        matches!(
            self,
            FrameAssignment::NoAthleteAuto | FrameAssignment::UnreviewedGap
        )
    }

    #[inline]
    pub fn needs_review(&self) -> bool {
        matches!(
            self,
            FrameAssignment::AthleteUncertain { .. } | FrameAssignment::UnreviewedGap
        )
    }
}

/// A user decision about one frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    Athlete(usize),
    NoAthlete,
    NoPose,
}

impl From<Correction> for FrameAssignment {
    fn from(c: Correction) -> Self {
        match c {
            Correction::Athlete(pose) => FrameAssignment::AthleteConfirmed { pose },
            Correction::NoAthlete => FrameAssignment::NoAthleteConfirmed,
            Correction::NoPose => FrameAssignment::AthleteNoPose,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AssignmentStore {
    frames: Vec<FrameAssignment>,
}

impl AssignmentStore {
    pub fn new(len: usize) -> Self {
        Self {
            frames: vec![FrameAssignment::UnreviewedGap; len],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn get(&self, frame: usize) -> FrameAssignment {
        self.frames.get(frame).copied().unwrap_or_default()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (usize, &FrameAssignment)> {
        self.frames.iter().enumerate()
    }

    fn slot(&mut self, frame: usize) -> Result<&mut FrameAssignment> {
        let len = self.frames.len();
        self.frames
            .get_mut(frame)
            .ok_or(Error::FrameOutOfRange { frame, len })
    }

    /// Automatic write; refuses to touch anchors.
    pub fn set(&mut self, frame: usize, value: FrameAssignment) -> Result<()> {
        let slot = self.slot(frame)?;
        if slot.is_anchor() {
            return Err(Error::AnchorProtected(frame));
        }

        *slot = value;
        Ok(())
    }

    /// User write; the only way to replace an anchor.
    pub fn correct(&mut self, frame: usize, correction: Correction) -> Result<()> {
        *self.slot(frame)? = correction.into();
        Ok(())
    }

    /// Nearest anchor strictly before (`forward == false`) or after `frame`.
    pub fn nearest_anchor(&self, frame: usize, forward: bool) -> Option<usize> {
        if forward {
            (frame + 1..self.frames.len()).find(|&f| self.frames[f].is_anchor())
        } else {
            (0..frame.min(self.frames.len()))
                .rev()
                .find(|&f| self.frames[f].is_anchor())
        }
    }

    pub fn anchors(&self) -> impl Iterator<Item = (usize, &FrameAssignment)> {
        self.iter().filter(|(_, a)| a.is_anchor())
    }

    pub fn needs_review(&self) -> usize {
        self.frames.iter().filter(|a| a.needs_review()).count()
    }

    /// Resets every automatic entry that points at a synthesized skeleton.
    /// Must run before the synthetic skeletons are stripped.
    pub fn release_synthetic(&mut self, detections: &DetectionSet) -> usize {
        self.release_synthetic_in(detections, 0..self.frames.len())
    }

    /// Same as `release_synthetic`, restricted to the frames in `range`.
    pub fn release_synthetic_in(&mut self, detections: &DetectionSet, range: Range<usize>) -> usize {
        let mut released = 0;
        let end = range.end.min(self.frames.len());
        let start = range.start.min(end);

        for (frame, slot) in self.frames[start..end]
            .iter_mut()
            .enumerate()
            .map(|(i, slot)| (start + i, slot))
        {
            let synthetic = match (slot.pose_index(), detections.frame(frame)) {
                (Some(pose), Some(f)) => f.is_synthetic(pose),
                _ => false,
            };

            if synthetic && !slot.is_anchor() {
                *slot = FrameAssignment::UnreviewedGap;
                released += 1;
            }
        }

        released
    }

    /// Every pose index must name a skeleton of its frame.
    pub fn check_indices(&self, detections: &DetectionSet) -> Result<()> {
        for (frame, a) in self.iter() {
            if let Some(pose) = a.pose_index() {
                let len = detections.frame(frame).map(|f| f.len()).unwrap_or(0);
                if pose >= len {
                    return Err(Error::InvalidPoseIndex {
                        frame,
                        index: pose,
                        len,
                    });
                }
            }
        }

        Ok(())
    }
}
