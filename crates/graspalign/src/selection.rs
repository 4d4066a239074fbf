use serde::{Deserialize, Serialize};

use graspalign_3d::transforms::{euler_zxy_from_rotation, wrap_angle};

use crate::{error::AlignError, pose::PoseVector};

/// Window of admissible orientations around a canonical one.
///
/// Candidates are decomposed into extrinsic `zxy` Euler angles of the matrix
/// whose rows are the two 6D vectors and their cross product. A candidate is
/// admissible when every angle lies within `tolerance` of the canonical angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationWindow {
    /// Canonical `[z, x, y]` Euler angles.
    pub canonical_euler_zxy: [f64; 3],
    /// Per-axis tolerance in radians.
    pub tolerance: f64,
}

impl Default for OrientationWindow {
    fn default() -> Self {
        use std::f64::consts::FRAC_PI_2;
        Self {
            canonical_euler_zxy: [FRAC_PI_2, -FRAC_PI_2, 0.0],
            tolerance: 0.6,
        }
    }
}

impl OrientationWindow {
    /// Euler angles used to test `pose`.
    pub fn euler_angles(pose: &PoseVector) -> [f64; 3] {
        euler_zxy_from_rotation(&pose.rotation_matrix(true).transpose())
    }

    /// Whether `pose` lies inside the window.
    pub fn contains(&self, pose: &PoseVector) -> bool {
        Self::euler_angles(pose)
            .iter()
            .zip(self.canonical_euler_zxy.iter())
            .all(|(angle, canonical)| wrap_angle(angle - canonical).abs() < self.tolerance)
    }
}

/// How the winning candidate is chosen once the loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum SelectionPolicy {
    /// Lowest loss overall.
    #[default]
    Plain,
    /// Lowest loss among candidates inside the orientation window.
    Constrained(OrientationWindow),
}

/// Index of the lowest loss among `admissible` entries.
fn argmin(losses: &[f64], admissible: impl Fn(usize) -> bool) -> Option<usize> {
    losses
        .iter()
        .enumerate()
        .filter(|(i, _)| admissible(*i))
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
}

/// Pick the winning candidate.
pub fn select(
    losses: &[f64],
    poses: &[PoseVector],
    policy: &SelectionPolicy,
) -> Result<usize, AlignError> {
    if losses.len() != poses.len() {
        return Err(AlignError::InputShape {
            what: "candidate losses",
            expected: format!("({},)", poses.len()),
            got: vec![losses.len()],
        });
    }
    match policy {
        SelectionPolicy::Plain => argmin(losses, |_| true).ok_or(AlignError::NoAdmissibleCandidate {
            num_candidates: 0,
            tolerance: f64::INFINITY,
        }),
        SelectionPolicy::Constrained(window) => {
            let admissible = poses.iter().map(|p| window.contains(p)).collect::<Vec<_>>();
            log::debug!(
                "{} of {} candidates inside the orientation window",
                admissible.iter().filter(|a| **a).count(),
                poses.len()
            );
            argmin(losses, |i| admissible[i]).ok_or(AlignError::NoAdmissibleCandidate {
                num_candidates: poses.len(),
                tolerance: window.tolerance,
            })
        }
    }
}
