use candle_core::{DType, Device, Tensor};
use glam::{DMat3, DMat4, DVec3};
use graspalign_3d::transforms::{ortho6d_from_rotation, rotation_from_ortho6d};
use serde::{Deserialize, Serialize};

use crate::error::AlignError;

/// Number of rigid entries in a pose: translation (3) and 6D rotation (6).
pub const RIGID_DIM: usize = 9;

/// Dimensionality of a pose vector.
///
/// A pose is laid out as `[translation(3), rotation_6d(6), joints(num_joints)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoseLayout {
    /// Number of articulated joint angles, zero for a rigid body.
    pub num_joints: usize,
}

impl PoseLayout {
    /// Layout of a rigid body such as a parallel gripper.
    pub const fn rigid() -> Self {
        Self { num_joints: 0 }
    }

    /// Layout of an articulated body with `num_joints` revolute joints.
    pub const fn articulated(num_joints: usize) -> Self {
        Self { num_joints }
    }

    /// Total number of entries in a pose vector.
    pub const fn dim(&self) -> usize {
        RIGID_DIM + self.num_joints
    }

    /// Check that `poses` is a `(M, dim)` batch and return `M`.
    pub fn validate_batch(&self, what: &'static str, poses: &Tensor) -> Result<usize, AlignError> {
        match poses.dims() {
            [m, d] if *d == self.dim() && *m > 0 => Ok(*m),
            dims => Err(AlignError::InputShape {
                what,
                expected: format!("(M, {})", self.dim()),
                got: dims.to_vec(),
            }),
        }
    }

    /// Check the length of a flat pose.
    pub fn validate_len(&self, what: &'static str, len: usize) -> Result<(), AlignError> {
        if len != self.dim() {
            return Err(AlignError::InputShape {
                what,
                expected: format!("({},)", self.dim()),
                got: vec![len],
            });
        }
        Ok(())
    }
}

/// A single pose hypothesis: translation, 6D rotation and joint angles.
///
/// The six rotation entries are the first two columns of the rotation matrix.
/// They are orthonormalized only when a matrix is rebuilt from them.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseVector {
    /// Position of the model root in the world frame.
    pub translation: [f64; 3],
    /// Local x and y axes in the world frame.
    pub rotation_6d: [f64; 6],
    /// Joint angles in radians.
    pub joints: Vec<f64>,
}

impl PoseVector {
    /// Create a pose from its parts.
    pub fn new(translation: [f64; 3], rotation_6d: [f64; 6], joints: Vec<f64>) -> Self {
        Self {
            translation,
            rotation_6d,
            joints,
        }
    }

    /// Identity rotation at the origin with all joints at zero.
    pub fn identity(layout: PoseLayout) -> Self {
        Self::new(
            [0.0; 3],
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            vec![0.0; layout.num_joints],
        )
    }

    /// Parse a flat pose.
    pub fn from_slice(values: &[f64], layout: PoseLayout) -> Result<Self, AlignError> {
        layout.validate_len("pose vector", values.len())?;
        let mut translation = [0.0; 3];
        translation.copy_from_slice(&values[0..3]);
        let mut rotation_6d = [0.0; 6];
        rotation_6d.copy_from_slice(&values[3..RIGID_DIM]);
        Ok(Self::new(
            translation,
            rotation_6d,
            values[RIGID_DIM..].to_vec(),
        ))
    }

    /// Build a pose from a homogeneous transform of the model root.
    pub fn from_world_transform(transform: &DMat4, joints: Vec<f64>) -> Self {
        let rotation = DMat3::from_mat4(*transform);
        Self::new(
            transform.w_axis.truncate().to_array(),
            ortho6d_from_rotation(&rotation),
            joints,
        )
    }

    /// Layout matching this pose.
    pub fn layout(&self) -> PoseLayout {
        PoseLayout::articulated(self.joints.len())
    }

    /// Number of entries in the flat representation.
    pub fn dim(&self) -> usize {
        self.layout().dim()
    }

    /// Flat representation `[translation, rotation_6d, joints]`.
    pub fn to_vec(&self) -> Vec<f64> {
        let mut values = Vec::with_capacity(self.dim());
        values.extend_from_slice(&self.translation);
        values.extend_from_slice(&self.rotation_6d);
        values.extend_from_slice(&self.joints);
        values
    }

    /// Rebuild the rotation matrix from the 6D entries.
    pub fn rotation_matrix(&self, robust: bool) -> DMat3 {
        rotation_from_ortho6d(&self.rotation_6d, robust)
    }

    /// Euclidean distance between the translations of two poses.
    pub fn translation_distance(&self, other: &PoseVector) -> f64 {
        DVec3::from_array(self.translation).distance(DVec3::from_array(other.translation))
    }

    /// Read every row of a `(M, dim)` tensor.
    pub fn batch_from_tensor(poses: &Tensor, layout: PoseLayout) -> Result<Vec<Self>, AlignError> {
        layout.validate_batch("pose batch", poses)?;
        poses
            .to_dtype(DType::F64)?
            .to_vec2::<f64>()?
            .iter()
            .map(|row| Self::from_slice(row, layout))
            .collect()
    }

    /// Stack poses into a `(M, dim)` `f32` tensor.
    pub fn batch_to_tensor(poses: &[PoseVector], device: &Device) -> Result<Tensor, AlignError> {
        let dim = poses.first().map_or(0, |p| p.dim());
        let mut flat = Vec::with_capacity(poses.len() * dim);
        for pose in poses {
            if pose.dim() != dim {
                return Err(AlignError::InputShape {
                    what: "pose batch",
                    expected: format!("({dim},) for every pose"),
                    got: vec![pose.dim()],
                });
            }
            flat.extend(pose.to_vec().into_iter().map(|v| v as f32));
        }
        Ok(Tensor::from_vec(flat, (poses.len(), dim), device)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_layout_dims() {
        assert_eq!(PoseLayout::rigid().dim(), 9);
        assert_eq!(PoseLayout::articulated(22).dim(), 31);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        let layout = PoseLayout::articulated(22);
        let res = PoseVector::from_slice(&[0.0; 30], layout);
        assert!(matches!(res, Err(AlignError::InputShape { .. })));
    }

    #[test]
    fn test_flat_round_trip() -> Result<(), AlignError> {
        let values = (0..31).map(|v| v as f64 * 0.1).collect::<Vec<_>>();
        let pose = PoseVector::from_slice(&values, PoseLayout::articulated(22))?;
        assert_eq!(pose.translation, [0.0, 0.1, 0.2]);
        assert_eq!(pose.joints.len(), 22);
        assert_eq!(pose.to_vec(), values);
        Ok(())
    }

    #[test]
    fn test_tensor_round_trip() -> Result<(), AlignError> {
        let device = Device::Cpu;
        let poses = vec![
            PoseVector::identity(PoseLayout::rigid()),
            PoseVector::new([1.0, 2.0, 3.0], [0.0, -1.0, 0.0, 0.0, 0.0, 1.0], vec![]),
        ];
        let t = PoseVector::batch_to_tensor(&poses, &device)?;
        assert_eq!(t.dims(), &[2, 9]);
        let back = PoseVector::batch_from_tensor(&t, PoseLayout::rigid())?;
        assert_eq!(back, poses);

        let wrong = PoseVector::batch_from_tensor(&t, PoseLayout::articulated(1));
        assert!(matches!(wrong, Err(AlignError::InputShape { .. })));
        Ok(())
    }

    #[test]
    fn test_from_world_transform() {
        let rotation = DMat3::from_rotation_z(0.5);
        let transform = DMat4::from_mat3_translation(rotation, DVec3::new(0.1, 0.2, 0.3));
        let pose = PoseVector::from_world_transform(&transform, vec![0.0; 2]);
        assert_relative_eq!(pose.translation[2], 0.3);
        let rebuilt = pose.rotation_matrix(true);
        assert_relative_eq!(rebuilt.x_axis.x, 0.5f64.cos(), epsilon = 1e-6);
        assert_relative_eq!(rebuilt.x_axis.y, 0.5f64.sin(), epsilon = 1e-6);
    }
}
