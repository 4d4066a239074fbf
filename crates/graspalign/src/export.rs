use std::path::{Path, PathBuf};

use graspalign_3d::{
    io::{
        npy::{read_rows_npy, write_points_npy, write_rows_npy},
        stl::write_stl_binary,
    },
    mesh::TriMesh,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::AlignError,
    optimizer::AlignmentResult,
    pose::{PoseLayout, PoseVector},
};

/// Write poses as a `(K, dim)` `.npy` array.
pub fn save_poses(path: impl AsRef<Path>, poses: &[PoseVector]) -> Result<(), AlignError> {
    let rows = poses.iter().map(PoseVector::to_vec).collect::<Vec<_>>();
    write_rows_npy(path, &rows)?;
    Ok(())
}

/// Read poses written by [`save_poses`].
pub fn load_poses(path: impl AsRef<Path>, layout: PoseLayout) -> Result<Vec<PoseVector>, AlignError> {
    read_rows_npy(path)?
        .iter()
        .map(|row| PoseVector::from_slice(row, layout))
        .collect()
}

/// Scalar digest of a run written next to the arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Slot of the winning candidate.
    pub best_index: usize,
    /// Loss of the winner.
    pub best_loss: f64,
    /// Per-candidate losses at the last iteration.
    pub final_losses: Vec<f64>,
    /// Number of iterations run.
    pub iterations: usize,
    /// Number of keyframes of the winner.
    pub keyframes: usize,
    /// Distance travelled by the winner's surface centroid.
    pub path_length: f64,
    /// Flat final pose of the winner.
    pub best_pose: Vec<f64>,
}

impl RunSummary {
    /// Digest of `result`.
    pub fn from_result(result: &AlignmentResult) -> Self {
        Self {
            best_index: result.best_index,
            best_loss: result.best_loss,
            final_losses: result.final_losses.clone(),
            iterations: result.loss_history.len(),
            keyframes: result.trajectory.keyframes().len(),
            path_length: result.trajectory.path_length(),
            best_pose: result.best_pose.to_vec(),
        }
    }
}

/// Writes the artifacts of a run into one directory.
#[derive(Debug, Clone)]
pub struct ResultExporter {
    dir: PathBuf,
    approach_keyframes: Option<usize>,
}

impl ResultExporter {
    /// Export into `dir`, creating it when missing.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            approach_keyframes: None,
        }
    }

    /// Also write the last `n` keyframes as `approach_traj.npy`.
    pub fn with_approach_keyframes(mut self, n: Option<usize>) -> Self {
        self.approach_keyframes = n;
        self
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every artifact of `result`; `reference_mesh` is the model at its known pose.
    pub fn export(&self, result: &AlignmentResult, reference_mesh: &TriMesh) -> Result<(), AlignError> {
        std::fs::create_dir_all(&self.dir)?;

        save_poses(self.dir.join("best_pose.npy"), std::slice::from_ref(&result.best_pose))?;
        save_poses(self.dir.join("execution_traj.npy"), result.trajectory.keyframes())?;
        if let Some(n) = self.approach_keyframes {
            save_poses(
                self.dir.join("approach_traj.npy"),
                result.trajectory.final_approach(n),
            )?;
        }
        write_points_npy(self.dir.join("centroid_traj.npy"), result.trajectory.centroids())?;
        write_points_npy(self.dir.join("best_points.npy"), &result.best_points)?;

        write_stl_binary(self.dir.join("reference_mesh.stl"), reference_mesh)?;
        write_stl_binary(self.dir.join("best_mesh.stl"), &result.mesh)?;

        let summary = serde_json::to_string_pretty(&RunSummary::from_result(result))?;
        std::fs::write(self.dir.join("summary.json"), summary)?;

        log::info!("exported alignment result to {}", self.dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::Trajectory;
    use approx::assert_relative_eq;
    use graspalign_3d::io::stl::read_stl_binary;

    fn hand_pose() -> PoseVector {
        let joints = (0..22).map(|j| j as f64 * 0.05 - 0.3).collect();
        PoseVector::new([0.1, -0.2, 0.35], [0.0, -1.0, 0.0, 0.0, 0.0, 1.0], joints)
    }

    #[test]
    fn test_pose_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;

        let hand = vec![hand_pose()];
        let path = dir.path().join("hand.npy");
        save_poses(&path, &hand)?;
        let loaded = load_poses(&path, PoseLayout::articulated(22))?;
        assert_eq!(loaded.len(), 1);
        for (a, b) in loaded[0].to_vec().iter().zip(hand[0].to_vec()) {
            assert_relative_eq!(*a, b, epsilon = 1e-12);
        }

        let gripper = vec![
            PoseVector::new([0.0, 0.1, 0.2], [1.0, 0.0, 0.0, 0.0, 1.0, 0.0], vec![]),
            PoseVector::new([0.3, 0.1, 0.2], [0.0, 1.0, 0.0, -1.0, 0.0, 0.0], vec![]),
        ];
        let path = dir.path().join("gripper.npy");
        save_poses(&path, &gripper)?;
        assert_eq!(load_poses(&path, PoseLayout::rigid())?, gripper);

        // a gripper file does not parse as hand poses
        assert!(load_poses(&path, PoseLayout::articulated(22)).is_err());
        Ok(())
    }

    #[test]
    fn test_export_writes_all_artifacts() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut trajectory = Trajectory::with_capacity(3, 0.01);
        for x in [0.0, 0.005, 0.05] {
            let pose = PoseVector::new([x, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0, 1.0, 0.0], vec![]);
            trajectory.record([x, 0.0, 0.0], &pose);
        }
        let mesh = TriMesh::cuboid([0.0; 3], [0.1; 3]);
        let result = AlignmentResult {
            best_index: 1,
            best_loss: 0.25,
            final_losses: vec![0.5, 0.25],
            best_pose: trajectory.keyframes()[1].clone(),
            trajectory,
            best_points: vec![[0.0; 3], [1.0; 3]],
            mesh: mesh.clone(),
            loss_history: vec![1.0, 0.5, 0.25],
        };

        let exporter = ResultExporter::new(dir.path().join("run")).with_approach_keyframes(Some(1));
        exporter.export(&result, &mesh)?;

        let out = exporter.dir();
        for name in [
            "best_pose.npy",
            "execution_traj.npy",
            "approach_traj.npy",
            "centroid_traj.npy",
            "best_points.npy",
            "reference_mesh.stl",
            "best_mesh.stl",
            "summary.json",
        ] {
            assert!(out.join(name).exists(), "missing {name}");
        }

        assert_eq!(load_poses(out.join("execution_traj.npy"), PoseLayout::rigid())?.len(), 2);
        let approach = load_poses(out.join("approach_traj.npy"), PoseLayout::rigid())?;
        assert_eq!(approach.len(), 1);
        assert_eq!(approach[0].translation[0], 0.05);
        assert_eq!(read_rows_npy(out.join("centroid_traj.npy"))?.len(), 3);
        assert_eq!(read_stl_binary(out.join("best_mesh.stl"))?.num_faces(), 12);

        let summary: RunSummary =
            serde_json::from_str(&std::fs::read_to_string(out.join("summary.json"))?)?;
        assert_eq!(summary.best_index, 1);
        assert_eq!(summary.keyframes, 2);
        assert_eq!(summary.iterations, 3);
        Ok(())
    }
}
