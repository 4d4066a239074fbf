use graspalign_3d::io::{npy::NpyError, stl::StlError};

/// Errors raised while configuring or running an alignment.
#[derive(Debug, thiserror::Error)]
pub enum AlignError {
    /// A pose vector or point set does not have the expected dimensionality.
    #[error("input shape mismatch for {what}: expected {expected}, got {got:?}")]
    InputShape {
        /// The offending input.
        what: &'static str,
        /// Human readable expected shape.
        expected: String,
        /// The shape that was provided.
        got: Vec<usize>,
    },

    /// The configuration cannot be run.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A loss or gradient became NaN or infinite.
    #[error("non-finite {stage} at iteration {iteration} for candidate {candidate}")]
    NumericInstability {
        /// Iteration at which the value was produced.
        iteration: usize,
        /// Candidate slot holding the value.
        candidate: usize,
        /// Either `"loss"` or `"gradient"`.
        stage: &'static str,
    },

    /// Constrained selection found no candidate inside the orientation window.
    #[error("no admissible candidate among {num_candidates} within {tolerance} rad of the canonical orientation")]
    NoAdmissibleCandidate {
        /// Number of candidates that were considered.
        num_candidates: usize,
        /// Per-axis Euler tolerance of the window.
        tolerance: f64,
    },

    /// A pose model or descriptor field returned a tensor of the wrong shape.
    #[error("{adapter} returned shape {got:?}, expected {expected}")]
    AdapterContract {
        /// Name of the adapter call.
        adapter: &'static str,
        /// Human readable expected shape.
        expected: String,
        /// The shape that was returned.
        got: Vec<usize>,
    },

    /// The pose model cannot compute a penalty that the configuration enables.
    #[error("pose model does not support the {0:?} penalty")]
    UnsupportedPenalty(crate::adapter::PenaltyKind),

    /// Candle tensor error.
    #[error(transparent)]
    CandleError(#[from] candle_core::Error),

    /// Failed to write an array artifact.
    #[error(transparent)]
    NpyError(#[from] NpyError),

    /// Failed to write a mesh artifact.
    #[error(transparent)]
    StlError(#[from] StlError),

    /// Failed to write the run summary.
    #[error(transparent)]
    SerializationError(#[from] serde_json::Error),

    /// Failed to read a configuration file.
    #[error(transparent)]
    YamlError(#[from] serde_yaml::Error),

    /// Filesystem error.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}
