#![allow(dead_code)]

use std::collections::BTreeMap;
use std::ops::Range;

use jumptrack::{BBox, DetectionSet, Joint, JointKind, Ltrb, PoseDetector, Skeleton, VisualTracker};
use nalgebra as na;

pub const FRAMES: usize = 100;
pub const ANCHOR: usize = 20;
pub const ATHLETE_POSE: usize = 1;
pub const GAP: Range<usize> = 41..60;

/// Projectile path of the athlete's box center.
pub fn athlete_center(frame: usize) -> na::Point2<f32> {
    let f = frame as f64;
    na::Point2::new(
        (0.1 + 0.002 * f) as f32,
        (0.8 - 0.01 * f + 0.00005 * f * f) as f32,
    )
}

pub fn bystander_center() -> na::Point2<f32> {
    na::Point2::new(0.8, 0.35)
}

/// Upright figure whose joint box is centered on `center`, `height` tall and
/// half as wide.
pub fn figure(center: na::Point2<f32>, height: f32, confidence: f32) -> Skeleton {
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

pub fn athlete(frame: usize) -> Skeleton {
    figure(athlete_center(frame), 0.2, 0.9)
}

pub fn bystander() -> Skeleton {
    figure(bystander_center(), 0.2, 0.9)
}

/// Bystander at pose 0 and athlete at pose 1, nothing at all in `missing`.
pub fn detections(missing: Range<usize>) -> DetectionSet {
    DetectionSet::new(
        (0..FRAMES)
            .map(|f| {
                if missing.contains(&f) {
                    vec![]
                } else {
                    vec![bystander(), athlete(f)]
                }
            })
            .collect(),
    )
}

/// Pose detector that sees everyone on the full frame and only the person
/// centered inside a crop region.
pub struct SceneDetector;

impl PoseDetector for SceneDetector {
    fn detect(&self, frame: usize, region: Option<&BBox<Ltrb>>) -> jumptrack::Result<Vec<Skeleton>> {
        let people = vec![bystander(), athlete(frame)];

        Ok(match region {
            None => people,
            Some(r) => people
                .into_iter()
                .filter(|s| s.center(0.3).map_or(false, |c| r.contains(&c)))
                .collect(),
        })
    }
}

/// Visual tracker replaying a fixed set of boxes.
#[derive(Default)]
pub struct ScriptedTracker {
    pub boxes: BTreeMap<usize, BBox<Ltrb>>,
    pub seed_frame: Option<usize>,
    pub calls: usize,
}

impl ScriptedTracker {
    /// Boxes on the athlete over `frames`, on the bystander over `drift`.
    pub fn following(frames: Range<usize>, drift: Range<usize>) -> Self {
        let boxes = frames
            .map(|f| {
                let center = if drift.contains(&f) {
                    bystander_center()
                } else {
                    athlete_center(f)
                };
                (f, BBox::around(center, 0.1, 0.2))
            })
            .collect();

        Self {
            boxes,
            ..Default::default()
        }
    }
}

impl VisualTracker for ScriptedTracker {
    fn run_tracking_pass(
        &mut self,
        _seed: &BBox<Ltrb>,
        seed_frame: usize,
        range: Range<usize>,
        _hints: &BTreeMap<usize, BBox<Ltrb>>,
        _min_confidence: f32,
    ) -> jumptrack::Result<BTreeMap<usize, BBox<Ltrb>>> {
        self.calls += 1;
        self.seed_frame = Some(seed_frame);

        Ok(self
            .boxes
            .range(range)
            .map(|(f, b)| (*f, *b))
            .collect())
    }
}
