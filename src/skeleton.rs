use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::recovery::Priority;

/// COCO-17 joint layout shared by every detector this crate talks to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(usize)]
pub enum JointKind {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl JointKind {
    pub const COUNT: usize = 17;

    pub const ALL: [JointKind; JointKind::COUNT] = [
        JointKind::Nose,
        JointKind::LeftEye,
        JointKind::RightEye,
        JointKind::LeftEar,
        JointKind::RightEar,
        JointKind::LeftShoulder,
        JointKind::RightShoulder,
        JointKind::LeftElbow,
        JointKind::RightElbow,
        JointKind::LeftWrist,
        JointKind::RightWrist,
        JointKind::LeftHip,
        JointKind::RightHip,
        JointKind::LeftKnee,
        JointKind::RightKnee,
        JointKind::LeftAnkle,
        JointKind::RightAnkle,
    ];

    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Joint {
    pub x: f32,
    pub y: f32,
    #[serde(rename = "p")]
    pub confidence: f32,
}

impl Joint {
    #[inline]
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    #[inline(always)]
    pub fn point(&self) -> na::Point2<f32> {
        na::Point2::new(self.x, self.y)
    }

    #[inline(always)]
    pub fn is_confident(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }
}

/// Where a skeleton came from. Anything but `Detected` was synthesized by
/// this crate and may be rolled back.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum SkeletonSource {
    Detected,
    Recovered(Priority),
    Interpolated,
    /// Center-only stand-in for a silhouette box without joints.
    Placeholder,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Skeleton {
    joints: [Option<Joint>; JointKind::COUNT],
    marker: Option<Joint>,
    source: SkeletonSource,
}

impl Skeleton {
    pub fn new(joints: [Option<Joint>; JointKind::COUNT]) -> Self {
        Self {
            joints,
            marker: None,
            source: SkeletonSource::Detected,
        }
    }

    /// Builds a skeleton from `(kind, joint)` pairs, missing kinds stay empty.
    pub fn from_joints<I: IntoIterator<Item = (JointKind, Joint)>>(joints: I) -> Self {
        let mut slots = [None; JointKind::COUNT];
        for (kind, joint) in joints {
            slots[kind.index()] = Some(joint);
        }

        Self::new(slots)
    }

    pub fn placeholder(center: na::Point2<f32>, confidence: f32) -> Self {
        Self {
            joints: [None; JointKind::COUNT],
            marker: Some(Joint::new(center.x, center.y, confidence)),
            source: SkeletonSource::Placeholder,
        }
    }

    #[inline]
    pub fn with_source(mut self, source: SkeletonSource) -> Self {
        self.source = source;
        self
    }

    #[inline(always)]
    pub fn source(&self) -> SkeletonSource {
        self.source
    }

    #[inline(always)]
    pub fn is_detected(&self) -> bool {
        self.source == SkeletonSource::Detected
    }

    #[inline(always)]
    pub fn is_placeholder(&self) -> bool {
        self.source == SkeletonSource::Placeholder
    }

    #[inline(always)]
    pub fn joint(&self, kind: JointKind) -> Option<&Joint> {
        self.joints[kind.index()].as_ref()
    }

    /// Joint of `kind` when present with at least `threshold` confidence.
    #[inline]
    pub fn confident_joint(&self, kind: JointKind, threshold: f32) -> Option<&Joint> {
        self.joint(kind).filter(|j| j.is_confident(threshold))
    }

    #[inline]
    pub fn joints(&self) -> impl Iterator<Item = (JointKind, &Joint)> + '_ {
        JointKind::ALL
            .iter()
            .zip(self.joints.iter())
            .filter_map(|(kind, j)| Some((*kind, j.as_ref()?)))
    }

    #[inline]
    pub fn confident_joints(&self, threshold: f32) -> impl Iterator<Item = (JointKind, &Joint)> + '_ {
        self.joints().filter(move |(_, j)| j.is_confident(threshold))
    }

    #[inline]
    pub fn confident_count(&self, threshold: f32) -> usize {
        self.confident_joints(threshold).count()
    }

    /// Bounding box of the confident joints. Placeholders yield a zero-size box
    /// on their marker.
    pub fn bbox(&self, threshold: f32) -> Option<BBox<Ltrb>> {
        BBox::enclosing(self.confident_joints(threshold).map(|(_, j)| j.point()))
            .or_else(|| self.marker.map(|m| BBox::around(m.point(), 0.0, 0.0)))
    }

    pub fn center(&self, threshold: f32) -> Option<na::Point2<f32>> {
        self.bbox(threshold).map(|b| b.center())
    }

    pub fn mean_confidence(&self) -> f32 {
        let (sum, n) = self
            .joints()
            .map(|(_, j)| j.confidence)
            .chain(self.marker.map(|m| m.confidence))
            .fold((0.0, 0usize), |(s, n), c| (s + c, n + 1));

        if n == 0 {
            0.0
        } else {
            sum / n as f32
        }
    }

    pub(crate) fn set_joint(&mut self, kind: JointKind, joint: Option<Joint>) {
        self.joints[kind.index()] = joint;
    }
}

/// Upright 17-joint figure whose joint box is centered on `center`.
#[cfg(test)]
pub(crate) fn figure(center: na::Point2<f32>, height: f32, confidence: f32) -> Skeleton {
    const LAYOUT: [(f32, f32); JointKind::COUNT] = [
        (0.0, -0.5),
        (-0.1, -0.47),
        (0.1, -0.47),
        (-0.2, -0.45),
        (0.2, -0.45),
        (-0.3, -0.3),
        (0.3, -0.3),
        (-0.4, -0.1),
        (0.4, -0.1),
        (-0.5, 0.05),
        (0.5, 0.05),
        (-0.2, 0.05),
        (0.2, 0.05),
        (-0.2, 0.27),
        (0.2, 0.27),
        (-0.2, 0.5),
        (0.2, 0.5),
    ];

    let width = height * 0.5;
    Skeleton::from_joints(JointKind::ALL.iter().zip(LAYOUT.iter()).map(|(kind, (dx, dy))| {
        (
            *kind,
            Joint::new(center.x + dx * width, center.y + dy * height, confidence),
        )
    }))
}
