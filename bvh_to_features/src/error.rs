use thiserror::Error;

/// Errors produced while reading, converting or reconstructing motion data.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MotionError {
    #[error("Could not parse BVH at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("Unsupported channel count {count} for joint {joint}")]
    UnsupportedChannelCount { joint: String, count: usize },
    #[error("Invalid rotation order: {0}")]
    InvalidRotationOrder(String),
    #[error("Unsupported normalization mode: {0}")]
    UnsupportedNormalizationMode(String),
    #[error("Decode mode {0} needs an inverse kinematics solver")]
    UnsupportedDecodeMode(String),
    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },
    #[error("Stale cache: {0}")]
    StaleCache(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unknown joint: {0}")]
    UnknownJoint(String),
    #[error("Unknown rig: {0}")]
    UnknownRig(String),
    #[error("Could not access file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not write npz: {0}")]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),
    #[error("Could not read npz: {0}")]
    ReadNpz(#[from] ndarray_npy::ReadNpzError),
    #[error("Could not (de)serialize manifest: {0}")]
    Json(#[from] serde_json::Error),
}

impl MotionError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        MotionError::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn shape(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        MotionError::ShapeMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }
}

pub type Result<T, E = MotionError> = std::result::Result<T, E>;
