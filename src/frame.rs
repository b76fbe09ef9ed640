use serde_derive::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::{Error, Result};
use crate::skeleton::Skeleton;

/// Candidate skeletons of a single video frame. Detector output occupies the
/// first `detected` slots and is never modified; synthesized skeletons are
/// appended behind it.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Frame {
    skeletons: Vec<Skeleton>,
    detected: usize,
}

impl Frame {
    pub fn new(skeletons: Vec<Skeleton>) -> Self {
        Self {
            detected: skeletons.len(),
            skeletons,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.skeletons.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.skeletons.is_empty()
    }

    /// Number of skeletons the detector produced for this frame.
    #[inline]
    pub fn detected_len(&self) -> usize {
        self.detected
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Skeleton> {
        self.skeletons.get(idx)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Skeleton> {
        self.skeletons.iter()
    }

    /// Detector output only, with its pose indices.
    #[inline]
    pub fn candidates(&self) -> impl Iterator<Item = (usize, &Skeleton)> {
        self.skeletons[..self.detected].iter().enumerate()
    }

    #[inline]
    pub fn is_synthetic(&self, idx: usize) -> bool {
        idx >= self.detected && idx < self.skeletons.len()
    }

    fn push(&mut self, skeleton: Skeleton) -> usize {
        self.skeletons.push(skeleton);
        self.skeletons.len() - 1
    }

    fn strip_synthetic(&mut self) -> usize {
        let removed = self.skeletons.len() - self.detected;
        self.skeletons.truncate(self.detected);
        removed
    }
}

/// Per-frame detector output for the whole clip, indexed by frame number.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DetectionSet {
    frames: Vec<Frame>,
}

impl DetectionSet {
    pub fn new(frames: Vec<Vec<Skeleton>>) -> Self {
        Self {
            frames: frames.into_iter().map(Frame::new).collect(),
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
    pub fn frame(&self, frame: usize) -> Option<&Frame> {
        self.frames.get(frame)
    }

    #[inline]
    pub fn skeleton(&self, frame: usize, idx: usize) -> Option<&Skeleton> {
        self.frames.get(frame)?.get(idx)
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn check_frame(&self, frame: usize) -> Result<&Frame> {
        self.frames.get(frame).ok_or(Error::FrameOutOfRange {
            frame,
            len: self.frames.len(),
        })
    }

    /// Checks that `idx` names a detector skeleton of `frame`.
    pub fn check_detected(&self, frame: usize, idx: usize) -> Result<&Skeleton> {
        let f = self.check_frame(frame)?;
        if idx >= f.detected_len() {
            return Err(Error::InvalidPoseIndex {
                frame,
                index: idx,
                len: f.detected_len(),
            });
        }

        Ok(&f.skeletons[idx])
    }

    /// Appends a synthesized skeleton to `frame` and returns its pose index.
    pub fn insert(&mut self, frame: usize, skeleton: Skeleton) -> Result<usize> {
        let len = self.frames.len();
        let f = self
            .frames
            .get_mut(frame)
            .ok_or(Error::FrameOutOfRange { frame, len })?;

        Ok(f.push(skeleton))
    }

    /// Drops every synthesized skeleton, returns how many were removed.
    pub fn strip_synthetic(&mut self) -> usize {
        self.strip_synthetic_in(0..self.frames.len())
    }

    /// Drops the synthesized skeletons of the frames in `range` only.
    pub fn strip_synthetic_in(&mut self, range: Range<usize>) -> usize {
        let end = range.end.min(self.frames.len());
        let start = range.start.min(end);

        self.frames[start..end]
            .iter_mut()
            .map(Frame::strip_synthetic)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{Joint, JointKind};
    use nalgebra as na;

    fn one_joint(x: f32) -> Skeleton {
        Skeleton::from_joints(vec![(JointKind::Nose, Joint::new(x, 0.5, 0.9))])
    }

    #[test]
    fn synthetic_skeletons_are_appended_and_stripped() {
        let mut set = DetectionSet::new(vec![vec![one_joint(0.1)], vec![]]);

        let idx = set
            .insert(1, Skeleton::placeholder(na::Point2::new(0.5, 0.5), 0.2))
            .unwrap();
        assert_eq!(idx, 0);
        assert!(set.frame(1).unwrap().is_synthetic(0));
        assert_eq!(set.frame(1).unwrap().candidates().count(), 0);

        let idx = set.insert(0, one_joint(0.2)).unwrap();
        assert_eq!(idx, 1);
        assert!(!set.frame(0).unwrap().is_synthetic(0));

        assert_eq!(set.strip_synthetic(), 2);
        assert_eq!(set.frame(0).unwrap().len(), 1);
        assert!(set.frame(1).unwrap().is_empty());
    }

    #[test]
    fn ranged_strip_keeps_other_frames() {
        let mut set = DetectionSet::new(vec![vec![one_joint(0.1)]; 4]);
        for f in 0..4 {
            set.insert(f, one_joint(0.2)).unwrap();
        }

        assert_eq!(set.strip_synthetic_in(1..3), 2);
        assert_eq!(set.frame(0).unwrap().len(), 2);
        assert_eq!(set.frame(1).unwrap().len(), 1);
        assert_eq!(set.frame(2).unwrap().len(), 1);
        assert_eq!(set.frame(3).unwrap().len(), 2);

        assert_eq!(set.strip_synthetic_in(3..10), 1);
        assert_eq!(set.strip_synthetic(), 1);
    }

    #[test]
    fn insert_out_of_range_fails() {
        let mut set = DetectionSet::new(vec![vec![]]);
        assert!(matches!(
            set.insert(3, one_joint(0.1)),
            Err(Error::FrameOutOfRange { frame: 3, len: 1 })
        ));
    }

    #[test]
    fn check_detected_rejects_synthetic_indices() {
        let mut set = DetectionSet::new(vec![vec![one_joint(0.1)]]);
        set.insert(0, one_joint(0.3)).unwrap();

        assert!(set.check_detected(0, 0).is_ok());
        assert!(matches!(
            set.check_detected(0, 1),
            Err(Error::InvalidPoseIndex { index: 1, len: 1, .. })
        ));
    }
}
