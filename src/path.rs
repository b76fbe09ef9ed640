//! Athlete path and takeoff detection over the final track.

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PathConfig;
use crate::math::median;
use crate::skeleton::{JointKind, Skeleton};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct AthletePathPoint {
    pub frame: usize,
    pub ground_contact: na::Point2<f32>,
    pub center_of_mass: na::Point2<f32>,
    pub airborne: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AthletePath {
    pub points: Vec<AthletePathPoint>,
    pub takeoff_frame: Option<usize>,
}

fn mean_of(skeleton: &Skeleton, kinds: &[JointKind], threshold: f32) -> Option<na::Point2<f32>> {
    let (sum, n) = kinds
        .iter()
        .filter_map(|&k| skeleton.confident_joint(k, threshold))
        .fold((na::Vector2::zeros(), 0usize), |(s, n), j| {
            (s + j.point().coords, n + 1)
        });

    if n == 0 {
        None
    } else {
        Some(na::Point2::from(sum / n as f32))
    }
}

fn ground_contact(skeleton: &Skeleton, threshold: f32) -> Option<na::Point2<f32>> {
    mean_of(skeleton, &[JointKind::LeftAnkle, JointKind::RightAnkle], threshold).or_else(|| {
        skeleton
            .confident_joints(threshold)
            .map(|(_, j)| j.point())
            .max_by(|a, b| a.y.total_cmp(&b.y))
    })
}

fn center_of_mass(skeleton: &Skeleton, threshold: f32) -> Option<na::Point2<f32>> {
    mean_of(
        skeleton,
        &[
            JointKind::LeftHip,
            JointKind::RightHip,
            JointKind::LeftShoulder,
            JointKind::RightShoulder,
        ],
        threshold,
    )
    .or_else(|| skeleton.center(threshold))
}

pub fn build_path(track: &[Option<Skeleton>], config: &PathConfig) -> AthletePath {
    let jc = config.joint_confidence;

    let mut points: Vec<AthletePathPoint> = track
        .iter()
        .enumerate()
        .filter_map(|(frame, s)| {
            let s = s.as_ref()?;
            Some(AthletePathPoint {
                frame,
                ground_contact: ground_contact(s, jc)?,
                center_of_mass: center_of_mass(s, jc)?,
                airborne: false,
            })
        })
        .collect();

    let mut baseline: Vec<f32> = points
        .iter()
        .take(config.baseline_frames.max(1))
        .map(|p| p.ground_contact.y)
        .collect();

    let ground = match median(&mut baseline) {
        Some(g) => g,
        None => return AthletePath::default(),
    };

    for p in points.iter_mut() {
        // image y grows downwards
        p.airborne = ground - p.ground_contact.y > config.lift_margin;
    }

    let min_run = config.min_airborne_frames.max(1);
    let mut takeoff_frame = None;
    let mut run_start = 0;
    let mut run_len = 0;

    for (i, p) in points.iter().enumerate() {
        let continues = i > 0 && points[i - 1].frame + 1 == p.frame;

        if !p.airborne {
            run_len = 0;
            continue;
        }

        if run_len == 0 || !continues {
            run_start = p.frame;
            run_len = 0;
        }

        run_len += 1;
        if run_len >= min_run {
            takeoff_frame = Some(run_start);
            break;
        }
    }

    debug!(points = points.len(), ground, ?takeoff_frame, "athlete path built");

    AthletePath {
        points,
        takeoff_frame,
    }
}
