#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Capability traits for the pose model and the descriptor field.
pub mod adapter;

/// Parallel pose hypotheses and their initialization.
pub mod candidate;

/// Run configuration.
pub mod config;

/// Error types.
pub mod error;

/// Persisting alignment results.
pub mod export;

/// The batched alignment optimizer.
pub mod optimizer;

/// Geometric penalty terms.
pub mod penalty;

/// Pose vectors and their layout.
pub mod pose;

/// Differentiable rotation helpers.
pub mod rotation;

/// Learning rate and perturbation schedules.
pub mod schedule;

/// Best candidate selection policies.
pub mod selection;

/// Per-candidate trajectory buffers.
pub mod trajectory;

pub use adapter::{DescriptorField, PenaltyKind, PoseModel, PoseOptions, PosedModel};
pub use config::AlignConfig;
pub use error::AlignError;
pub use optimizer::{AlignmentOptimizer, AlignmentResult};
pub use pose::{PoseLayout, PoseVector};
