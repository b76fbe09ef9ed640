use crate::config::SmoothingConfig;
use crate::skeleton::{Joint, JointKind, Skeleton};

/// 3-frame moving average over the athlete's joints.
pub struct Smoother {
    config: SmoothingConfig,
}

impl Smoother {
    pub fn new(config: SmoothingConfig) -> Self {
        Self { config }
    }

    fn confident<'a>(&self, s: Option<&'a Skeleton>, kind: JointKind) -> Option<&'a Joint> {
        s?.joint(kind)
            .filter(|j| j.confidence > self.config.joint_confidence)
    }

    /// Averages each joint with its neighbours when it is confident in all
    /// three frames. Reads only unsmoothed values, so the result does not
    /// depend on traversal order. The first and last frame pass through.
    pub fn smooth(&self, track: &[Option<Skeleton>]) -> Vec<Option<Skeleton>> {
        let mut out = track.to_vec();

        for i in 1..track.len().saturating_sub(1) {
            let (prev, cur, next) = (track[i - 1].as_ref(), track[i].as_ref(), track[i + 1].as_ref());
            let target = match out[i].as_mut() {
                Some(s) => s,
                None => continue,
            };

            for kind in JointKind::ALL {
                let (a, b, c) = match (
                    self.confident(prev, kind),
                    self.confident(cur, kind),
                    self.confident(next, kind),
                ) {
                    (Some(a), Some(b), Some(c)) => (a, b, c),
                    _ => continue,
                };

                target.set_joint(
                    kind,
                    Some(Joint::new(
                        (a.x + b.x + c.x) / 3.0,
                        (a.y + b.y + c.y) / 3.0,
                        b.confidence,
                    )),
                );
            }
        }

        out
    }
}
