//! The optimizer only talks to its collaborators through these traits.
//!
//! A [`PoseModel`] turns a batch of pose vectors into a [`PosedModel`] snapshot
//! holding differentiable surface points; posing never mutates the model, so a
//! single model can serve several runs. A [`DescriptorField`] maps coordinates
//! to learned feature vectors.

use candle_core::{Device, Tensor};
use graspalign_3d::{mesh::TriMesh, transforms::ortho6d_from_rotation};
use serde::{Deserialize, Serialize};

use crate::{
    error::AlignError,
    pose::{PoseLayout, PoseVector},
};

/// Optional penalty terms a pose model may provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PenaltyKind {
    /// Penetration of target points into the posed model.
    TargetPenetration,
    /// Collisions between the links of the model.
    SelfPenetration,
    /// Joint angles outside their limits.
    JointLimits,
}

/// How poses are interpreted when posing or serializing a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoseOptions {
    /// Map the optimizer pose to an execution-ready pose.
    pub retarget: bool,
    /// Rebuild rotations with the symmetric 6D reconstruction.
    pub robust: bool,
}

impl Default for PoseOptions {
    fn default() -> Self {
        Self {
            retarget: false,
            robust: true,
        }
    }
}

impl PoseOptions {
    /// Options used when poses leave the optimizer for replay or storage.
    pub const fn retargeted() -> Self {
        Self {
            retarget: true,
            robust: true,
        }
    }
}

/// A batch of posed model instances.
pub trait PosedModel {
    /// The `(M, dim)` poses this snapshot was built from.
    fn poses(&self) -> &Tensor;

    /// Surface points of every instance, `(M, N, 3)`, attached to the pose graph.
    fn surface_points(&self) -> &Tensor;

    /// Triangle mesh of one instance in world coordinates.
    fn mesh(&self, index: usize) -> Result<TriMesh, AlignError>;

    /// Per-instance penetration energy of `target` points, `(M,)`.
    fn penetration_energy(&self, _target: &Tensor) -> Result<Tensor, AlignError> {
        Err(AlignError::UnsupportedPenalty(PenaltyKind::TargetPenetration))
    }

    /// Per-instance self collision energy, `(M,)`.
    fn self_penetration_energy(&self) -> Result<Tensor, AlignError> {
        Err(AlignError::UnsupportedPenalty(PenaltyKind::SelfPenetration))
    }

    /// Per-instance joint limit violation, `(M,)`.
    fn joint_limit_energy(&self) -> Result<Tensor, AlignError> {
        Err(AlignError::UnsupportedPenalty(PenaltyKind::JointLimits))
    }
}

/// A body (hand or gripper) whose surface can be posed in batch.
pub trait PoseModel {
    /// Snapshot type returned by [`PoseModel::set_parameters`].
    type Posed: PosedModel;

    /// Pose vector layout accepted by the model.
    fn layout(&self) -> PoseLayout;

    /// Number of surface points produced per instance.
    fn num_surface_points(&self) -> usize;

    /// Device holding the model tensors.
    fn device(&self) -> &Device;

    /// Pose a `(M, dim)` batch.
    fn set_parameters(&self, poses: &Tensor, options: PoseOptions)
        -> Result<Self::Posed, AlignError>;

    /// Whether the posed snapshots can compute the given penalty.
    fn supports_penalty(&self, _kind: PenaltyKind) -> bool {
        false
    }

    /// Convert a `(M, dim)` batch into host poses.
    ///
    /// With `retarget` the rotation entries are replaced by the orthonormal
    /// columns they encode. Models with joint limits clamp the joints as well.
    fn save_pose(&self, poses: &Tensor, options: PoseOptions) -> Result<Vec<PoseVector>, AlignError> {
        let mut out = PoseVector::batch_from_tensor(poses, self.layout())?;
        if options.retarget {
            for pose in out.iter_mut() {
                pose.rotation_6d = ortho6d_from_rotation(&pose.rotation_matrix(options.robust));
            }
        }
        Ok(out)
    }

    /// Mesh of the model at a single pose.
    fn mesh_at(&self, pose: &PoseVector) -> Result<TriMesh, AlignError> {
        self.layout().validate_len("pose vector", pose.dim())?;
        let batch = PoseVector::batch_to_tensor(std::slice::from_ref(pose), self.device())?;
        self.set_parameters(&batch, PoseOptions::default())?.mesh(0)
    }
}

/// A trained predictor mapping coordinates to descriptors.
pub trait DescriptorField {
    /// Evaluate the field at `(B, N, 3)` coordinates.
    ///
    /// The output keeps the batch dimension first; the remaining dimensions are
    /// the descriptor layout and must not depend on `B`.
    fn evaluate(&self, coords: &Tensor) -> Result<Tensor, AlignError>;
}
