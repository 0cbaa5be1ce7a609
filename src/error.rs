//! Error type shared by every stage of the simulator.

use crate::data::DataId;
use thiserror::Error;

/// Errors that can occur while declaring data, building steps, scheduling,
/// loading a topology or evaluating a cost model.
#[derive(Error, Debug)]
pub enum SimError {
    /// Two views were combined although they refer to different data blocks
    #[error("views refer to different data blocks ({0:?} and {1:?})")]
    DataMismatch(DataId, DataId),

    /// A handle that is not part of the data space it was resolved against
    #[error("unknown data handle {0:?}")]
    UnknownData(DataId),

    #[error("invalid shape for '{identifier}': {reason}")]
    InvalidShape { identifier: String, reason: String },

    #[error("range {begin}..{end} is out of bounds for extent {extent}")]
    OutOfBounds {
        begin: usize,
        end: usize,
        extent: usize,
    },

    /// Interpolation needs a sample on both sides of the requested index
    #[error("pattern '{pattern}' has no samples bracketing index {index}")]
    InsufficientSamples { pattern: String, index: usize },

    #[error("pattern {0} is not part of step {1}")]
    UnknownPattern(usize, usize),

    #[error("split {0} is not part of step {1}")]
    UnknownSplit(usize, usize),

    #[error("invalid split of pattern '{pattern}': {reason}")]
    InvalidSplit { pattern: String, reason: String },

    /// A scheduler left splits of a step without a team
    #[error("step {index} is incomplete: {assigned} of {splits} splits assigned")]
    IncompleteStep {
        index: usize,
        assigned: usize,
        splits: usize,
    },

    #[error("topology error: {0}")]
    Topology(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, SimError>;

/// Allow SimError to be converted to String for CLI reporting
impl From<SimError> for String {
    fn from(err: SimError) -> Self {
        err.to_string()
    }
}
