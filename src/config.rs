use serde_derive::{Deserialize, Serialize};
use std::io::Read;

use crate::error::{Error, Result};

/// Candidate scoring and propagation for the identity tracker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    /// Score at or above which a match is recorded as `AthleteAuto`.
    pub high_threshold: f32,
    /// Score below which a candidate is not a match.
    pub low_threshold: f32,
    /// Extra score required to resume a track after a missed frame.
    pub reacquire_hysteresis: f32,
    /// Consecutive unmatched frames after which a direction halts.
    pub max_misses: usize,
    pub joint_confidence: f32,
    pub iou_weight: f32,
    pub displacement_weight: f32,
    pub motion_weight: f32,
    pub size_weight: f32,
    /// Displacement tolerance as a fraction of the track's box height.
    pub displacement_sigma: f32,
    /// Growth of the displacement tolerance per skipped frame.
    pub sigma_growth: f32,
    pub velocity_smoothing: f32,
    /// Per-frame speed below which a track counts as static.
    pub min_speed: f32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.6,
            low_threshold: 0.35,
            reacquire_hysteresis: 0.1,
            max_misses: 30,
            joint_confidence: 0.3,
            iou_weight: 0.35,
            displacement_weight: 0.35,
            motion_weight: 0.10,
            size_weight: 0.20,
            displacement_sigma: 0.25,
            sigma_growth: 0.05,
            velocity_smoothing: 0.5,
            min_speed: 0.002,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrajectoryConfig {
    pub min_anchors: usize,
    /// Minimum `AthleteAuto` confidence for a frame to feed the fit.
    pub anchor_confidence: f32,
    pub joint_confidence: f32,
    /// Distance from the prediction beyond which a tracked box is drift.
    pub base_tolerance: f32,
    pub good_fit_r2: f32,
    pub good_fit_factor: f32,
    /// Tolerance growth per frame of extrapolation outside the anchor domain.
    pub extrapolation_growth: f32,
    pub max_tolerance_factor: f32,
    pub search_region_scale: f32,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            min_anchors: 3,
            anchor_confidence: 0.6,
            joint_confidence: 0.3,
            base_tolerance: 0.1,
            good_fit_r2: 0.95,
            good_fit_factor: 0.75,
            extrapolation_growth: 0.004,
            max_tolerance_factor: 2.0,
            search_region_scale: 1.5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    pub visual_tracker_confidence: f32,
    pub trajectory_crop_confidence: f32,
    pub secondary_detector_confidence: f32,
    pub human_box_confidence: f32,
    /// Confidence floor handed to the visual tracker.
    pub tracker_min_confidence: f32,
    pub secondary_max_distance: f32,
    pub human_box_max_distance: f32,
    pub joint_confidence: f32,
    /// Minimum confident joints for a re-detected pose to be usable.
    pub min_joints: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            visual_tracker_confidence: 0.55,
            trajectory_crop_confidence: 0.45,
            secondary_detector_confidence: 0.40,
            human_box_confidence: 0.25,
            tracker_min_confidence: 0.3,
            secondary_max_distance: 0.15,
            human_box_max_distance: 0.12,
            joint_confidence: 0.3,
            min_joints: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct InterpolationConfig {
    pub max_gap: usize,
    pub min_boundary_joints: usize,
    pub joint_confidence: f32,
    pub confidence_decay: f32,
    /// Ceiling on the assignment confidence of an interpolated frame.
    pub max_confidence: f32,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            max_gap: 30,
            min_boundary_joints: 5,
            joint_confidence: 0.3,
            confidence_decay: 0.7,
            max_confidence: 0.3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SmoothingConfig {
    pub joint_confidence: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            joint_confidence: 0.3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PathConfig {
    pub joint_confidence: f32,
    /// Leading path points whose ground contact defines the ground level.
    pub baseline_frames: usize,
    /// Rise above ground level that counts as airborne.
    pub lift_margin: f32,
    pub min_airborne_frames: usize,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            joint_confidence: 0.3,
            baseline_frames: 10,
            lift_margin: 0.02,
            min_airborne_frames: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct TrackingConfig {
    pub identity: IdentityConfig,
    pub trajectory: TrajectoryConfig,
    pub recovery: RecoveryConfig,
    pub interpolation: InterpolationConfig,
    pub smoothing: SmoothingConfig,
    pub path: PathConfig,
}

fn unit(name: &str, v: f32) -> Result<()> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must lie in [0, 1], got {}", name, v)))
    }
}

impl TrackingConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let id = &self.identity;
        unit("identity.high_threshold", id.high_threshold)?;
        unit("identity.low_threshold", id.low_threshold)?;
        unit("identity.velocity_smoothing", id.velocity_smoothing)?;
        if id.low_threshold >= id.high_threshold {
            return Err(Error::Config(format!(
                "identity.low_threshold ({}) must be below high_threshold ({})",
                id.low_threshold, id.high_threshold
            )));
        }
        if id.max_misses == 0 {
            return Err(Error::Config("identity.max_misses must be positive".into()));
        }
        let weights = id.iou_weight + id.displacement_weight + id.motion_weight + id.size_weight;
        if weights <= 0.0 {
            return Err(Error::Config("identity weights must not all be zero".into()));
        }

        if self.trajectory.min_anchors < 3 {
            return Err(Error::Config(
                "trajectory.min_anchors must be at least 3".into(),
            ));
        }
        unit("trajectory.anchor_confidence", self.trajectory.anchor_confidence)?;
        if self.trajectory.base_tolerance <= 0.0 {
            return Err(Error::Config(
                "trajectory.base_tolerance must be positive".into(),
            ));
        }

        let rc = &self.recovery;
        for (name, v) in [
            ("recovery.visual_tracker_confidence", rc.visual_tracker_confidence),
            ("recovery.trajectory_crop_confidence", rc.trajectory_crop_confidence),
            ("recovery.secondary_detector_confidence", rc.secondary_detector_confidence),
            ("recovery.human_box_confidence", rc.human_box_confidence),
        ] {
            unit(name, v)?;
            if v >= id.high_threshold {
                return Err(Error::Config(format!(
                    "{} ({}) must stay below identity.high_threshold ({})",
                    name, v, id.high_threshold
                )));
            }
        }

        if self.interpolation.max_gap == 0 {
            return Err(Error::Config("interpolation.max_gap must be positive".into()));
        }
        unit(
            "interpolation.confidence_decay",
            self.interpolation.confidence_decay,
        )?;
        unit("interpolation.max_confidence", self.interpolation.max_confidence)?;
        if self.interpolation.max_confidence >= id.high_threshold {
            return Err(Error::Config(format!(
                "interpolation.max_confidence ({}) must stay below identity.high_threshold ({})",
                self.interpolation.max_confidence, id.high_threshold
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TrackingConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_overrides_defaults() {
        let config = TrackingConfig::from_json_str(
            r#"{ "interpolation": { "max_gap": 12 }, "identity": { "max_misses": 5 } }"#,
        )
        .unwrap();

        assert_eq!(config.interpolation.max_gap, 12);
        assert_eq!(config.interpolation.min_boundary_joints, 5);
        assert_eq!(config.identity.max_misses, 5);
        assert_eq!(config.identity.high_threshold, 0.6);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let err = TrackingConfig::from_json_str(
            r#"{ "identity": { "high_threshold": 0.3, "low_threshold": 0.5 } }"#,
        )
        .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn recovered_confidence_must_stay_below_direct_matches() {
        let mut config = TrackingConfig::default();
        config.recovery.visual_tracker_confidence = 0.9;
        assert!(config.validate().is_err());

        let mut config = TrackingConfig::default();
        config.interpolation.max_confidence = 0.6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        assert!(matches!(
            TrackingConfig::from_json_str("{ nope"),
            Err(Error::Json(_))
        ));
    }
}
