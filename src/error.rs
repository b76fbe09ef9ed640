use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("frame {frame} is out of range ({len} frames)")]
    FrameOutOfRange { frame: usize, len: usize },

    #[error("pose index {index} is invalid for frame {frame} ({len} candidates)")]
    InvalidPoseIndex {
        frame: usize,
        index: usize,
        len: usize,
    },

    #[error("frame {0} is a user anchor and cannot be overwritten")]
    AnchorProtected(usize),

    #[error("no seed box: anchor frame {0} carries no skeleton")]
    MissingSeed(usize),

    #[error("no athlete has been selected")]
    NoAthleteSelected,

    #[error("Service Error: {0}")]
    Service(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Config Error: {0}")]
    Config(String),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[inline]
    pub fn service<E: std::fmt::Display>(err: E) -> Self {
        Error::Service(err.to_string())
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
