#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Descriptor fields over 3d coordinates.
pub mod fields;

/// Rigid parallel jaw gripper.
pub mod gripper;

/// Articulated five finger hand.
pub mod hand;

pub use fields::{MlpDescriptorField, RbfDescriptorField};
pub use gripper::RigidGripper;
pub use hand::ArticulatedHand;
