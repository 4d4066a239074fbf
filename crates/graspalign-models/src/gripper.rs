use std::{path::Path, sync::Arc};

use candle_core::{Device, Tensor};
use glam::DVec3;
use graspalign::{
    adapter::{PoseModel, PoseOptions, PosedModel},
    error::AlignError,
    pose::{PoseLayout, PoseVector},
    rotation::{robust_rotation_from_ortho6d, rotation_from_ortho6d, transform_points},
};
use graspalign_3d::{io::stl::read_stl_binary, mesh::TriMesh};
use rand::{rngs::StdRng, SeedableRng};

const SAMPLING_SEED: u64 = 0;

/// A rigid gripper posed by translation and 6D rotation only.
pub struct RigidGripper {
    mesh: Arc<TriMesh>,
    local_points: Tensor,
    num_points: usize,
    device: Device,
}

impl RigidGripper {
    /// Sample `num_points` surface points from `mesh`, given in the gripper frame.
    pub fn from_mesh(mesh: TriMesh, num_points: usize, device: &Device) -> Result<Self, AlignError> {
        let mut rng = StdRng::seed_from_u64(SAMPLING_SEED);
        let points = mesh.sample_surface(num_points, &mut rng);
        if num_points == 0 || points.len() != num_points {
            return Err(AlignError::InvalidConfig(format!(
                "cannot sample {num_points} points from a mesh with area {}",
                mesh.area()
            )));
        }
        let flat = points
            .iter()
            .flat_map(|p| p.map(|v| v as f32))
            .collect::<Vec<_>>();
        Ok(Self {
            local_points: Tensor::from_vec(flat, (num_points, 3), device)?,
            num_points,
            mesh: Arc::new(mesh),
            device: device.clone(),
        })
    }

    /// Load the gripper mesh from a binary STL file.
    pub fn from_stl(path: impl AsRef<Path>, num_points: usize, device: &Device) -> Result<Self, AlignError> {
        Self::from_mesh(read_stl_binary(path)?, num_points, device)
    }

    /// Box model of an opened two finger parallel gripper approaching along `+z`.
    pub fn parallel_jaw(num_points: usize, device: &Device) -> Result<Self, AlignError> {
        let mut mesh = TriMesh::cuboid([0.0, 0.0, 0.04], [0.045, 0.03, 0.04]);
        for x in [-0.0425, 0.0425] {
            mesh.append(&TriMesh::cuboid([x, 0.0, 0.11], [0.0075, 0.011, 0.03]));
        }
        Self::from_mesh(mesh, num_points, device)
    }

    /// Mesh in the gripper frame.
    pub fn mesh(&self) -> &TriMesh {
        &self.mesh
    }
}

/// Posed batch of grippers.
pub struct PosedGripper {
    mesh: Arc<TriMesh>,
    poses: Tensor,
    points: Tensor,
    host: Vec<PoseVector>,
    robust: bool,
}

impl PosedModel for PosedGripper {
    fn poses(&self) -> &Tensor {
        &self.poses
    }

    fn surface_points(&self) -> &Tensor {
        &self.points
    }

    fn mesh(&self, index: usize) -> Result<TriMesh, AlignError> {
        let pose = self.host.get(index).ok_or_else(|| AlignError::InputShape {
            what: "gripper mesh index",
            expected: format!("index below {}", self.host.len()),
            got: vec![index],
        })?;
        Ok(self.mesh.transformed(
            &pose.rotation_matrix(self.robust),
            DVec3::from_array(pose.translation),
        ))
    }
}

impl PoseModel for RigidGripper {
    type Posed = PosedGripper;

    fn layout(&self) -> PoseLayout {
        PoseLayout::rigid()
    }

    fn num_surface_points(&self) -> usize {
        self.num_points
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn set_parameters(&self, poses: &Tensor, options: PoseOptions) -> Result<PosedGripper, AlignError> {
        self.layout().validate_batch("gripper pose batch", poses)?;
        let sixd = poses.narrow(1, 3, 6)?;
        let rotations = if options.robust {
            robust_rotation_from_ortho6d(&sixd)?
        } else {
            rotation_from_ortho6d(&sixd)?
        };
        let points = transform_points(&self.local_points, &rotations, &poses.narrow(1, 0, 3)?)?;
        Ok(PosedGripper {
            mesh: self.mesh.clone(),
            poses: poses.clone(),
            points,
            host: PoseVector::batch_from_tensor(poses, self.layout())?,
            robust: options.robust,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use graspalign_3d::io::stl::write_stl_binary;

    #[test]
    fn test_reference_pose_is_identity() -> Result<(), AlignError> {
        let device = Device::Cpu;
        let gripper = RigidGripper::parallel_jaw(64, &device)?;
        assert_eq!(gripper.num_surface_points(), 64);

        let identity = PoseVector::identity(PoseLayout::rigid());
        let mesh = gripper.mesh_at(&identity)?;
        assert_eq!(mesh.faces, gripper.mesh().faces);
        for (a, b) in mesh.vertices.iter().zip(&gripper.mesh().vertices) {
            for k in 0..3 {
                assert_relative_eq!(a[k], b[k], epsilon = 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn test_rotation_about_z() -> Result<(), AlignError> {
        let device = Device::Cpu;
        let gripper = RigidGripper::parallel_jaw(32, &device)?;
        let poses = vec![
            PoseVector::identity(PoseLayout::rigid()),
            // local x along world y
            PoseVector::new([0.0, 0.0, 0.5], [0.0, 1.0, 0.0, -1.0, 0.0, 0.0], vec![]),
        ];
        let batch = PoseVector::batch_to_tensor(&poses, &device)?;
        let posed = gripper.set_parameters(&batch, PoseOptions::default())?;
        assert_eq!(posed.surface_points().dims(), &[2, 32, 3]);

        let pts = posed.surface_points().to_vec3::<f32>()?;
        for (a, b) in pts[0].iter().zip(&pts[1]) {
            assert_relative_eq!(b[0], -a[1], epsilon = 1e-5);
            assert_relative_eq!(b[1], a[0], epsilon = 1e-5);
            assert_relative_eq!(b[2], a[2] + 0.5, epsilon = 1e-5);
        }

        let (lo, _) = posed.mesh(1)?.bounding_box().unwrap();
        assert_relative_eq!(lo.z, 0.5, epsilon = 1e-6);
        assert!(posed.mesh(2).is_err());
        Ok(())
    }

    #[test]
    fn test_from_stl() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("gripper.stl");
        write_stl_binary(&path, &TriMesh::cuboid([0.0; 3], [0.02, 0.02, 0.05]))?;
        let gripper = RigidGripper::from_stl(&path, 16, &Device::Cpu)?;
        assert_eq!(gripper.mesh().num_faces(), 12);

        let empty = RigidGripper::from_mesh(TriMesh::default(), 16, &Device::Cpu);
        assert!(matches!(empty, Err(AlignError::InvalidConfig(_))));
        Ok(())
    }
}
