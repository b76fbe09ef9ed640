pub mod assignment;
pub mod bbox;
pub mod config;
pub mod detector;
pub mod error;
pub mod frame;
pub mod interpolate;
pub mod math;
pub mod path;
pub mod recovery;
pub mod session;
pub mod skeleton;
pub mod smooth;
pub mod track;
pub mod tracker;
pub mod trajectory;

pub use assignment::{AssignmentStore, Correction, FrameAssignment};
pub use bbox::{BBox, Ltrb};
pub use config::TrackingConfig;
pub use detector::{HumanDetector, PoseDetector, VisualTracker};
pub use error::{Error, Result};
pub use frame::{DetectionSet, Frame};
pub use path::AthletePathPoint;
pub use recovery::{CancelToken, Detectors, Priority, RecoveryReport};
pub use session::{Progress, RunControl, Services, Session, Stage};
pub use skeleton::{Joint, JointKind, Skeleton, SkeletonSource};
pub use track::TrackOutcome;
pub use tracker::IdentityTracker;
pub use trajectory::TrajectoryModel;

use nalgebra as na;
use std::fmt;

pub trait Float: num_traits::FromPrimitive + na::RealField + Copy + fmt::Debug + 'static {}

impl<T> Float for T where T: num_traits::FromPrimitive + na::RealField + Copy + fmt::Debug + 'static {}
