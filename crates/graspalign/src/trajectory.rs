use glam::DVec3;

use crate::{error::AlignError, pose::PoseVector};

/// Minimum root displacement between two stored keyframes.
pub const DEFAULT_KEYFRAME_THRESHOLD: f64 = 0.01;

/// Path of one candidate through the optimization.
///
/// Surface centroids are logged densely, once per iteration. Full poses are
/// decimated into keyframes spaced at least `threshold` apart.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    centroids: Vec<[f64; 3]>,
    keyframes: Vec<PoseVector>,
    threshold: f64,
}

impl Trajectory {
    /// Empty trajectory with room for `iterations` samples.
    pub fn with_capacity(iterations: usize, threshold: f64) -> Self {
        Self {
            centroids: Vec::with_capacity(iterations),
            keyframes: Vec::with_capacity(iterations),
            threshold,
        }
    }

    /// Log one iteration; returns whether `pose` was stored as a keyframe.
    pub fn record(&mut self, centroid: [f64; 3], pose: &PoseVector) -> bool {
        self.centroids.push(centroid);
        let keep = match self.keyframes.last() {
            Some(last) => pose.translation_distance(last) >= self.threshold,
            None => true,
        };
        if keep {
            self.keyframes.push(pose.clone());
        }
        keep
    }

    /// Per-iteration surface centroids.
    pub fn centroids(&self) -> &[[f64; 3]] {
        &self.centroids
    }

    /// Decimated pose snapshots.
    pub fn keyframes(&self) -> &[PoseVector] {
        &self.keyframes
    }

    /// The last `n` keyframes, or all of them when fewer are stored.
    pub fn final_approach(&self, n: usize) -> &[PoseVector] {
        &self.keyframes[self.keyframes.len().saturating_sub(n)..]
    }

    /// Number of logged iterations.
    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    /// Whether nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    /// Distance travelled by the surface centroid.
    pub fn path_length(&self) -> f64 {
        self.centroids
            .windows(2)
            .map(|w| DVec3::from_array(w[0]).distance(DVec3::from_array(w[1])))
            .sum()
    }
}

/// One trajectory per candidate slot.
#[derive(Debug, Clone)]
pub struct TrajectorySet {
    slots: Vec<Trajectory>,
}

impl TrajectorySet {
    /// Allocate `num_candidates` trajectories.
    pub fn new(num_candidates: usize, iterations: usize, threshold: f64) -> Self {
        Self {
            slots: (0..num_candidates)
                .map(|_| Trajectory::with_capacity(iterations, threshold))
                .collect(),
        }
    }

    /// Number of candidate slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Log one iteration for every candidate.
    pub fn record_batch(
        &mut self,
        centroids: &[[f64; 3]],
        poses: &[PoseVector],
    ) -> Result<(), AlignError> {
        for (what, len) in [("centroid batch", centroids.len()), ("pose batch", poses.len())] {
            if len != self.slots.len() {
                return Err(AlignError::InputShape {
                    what,
                    expected: format!("({},)", self.slots.len()),
                    got: vec![len],
                });
            }
        }
        for ((slot, centroid), pose) in self.slots.iter_mut().zip(centroids).zip(poses) {
            slot.record(*centroid, pose);
        }
        Ok(())
    }

    /// Trajectory of one candidate.
    pub fn get(&self, index: usize) -> Option<&Trajectory> {
        self.slots.get(index)
    }

    /// Take ownership of one candidate's trajectory.
    pub fn into_slot(mut self, index: usize) -> Option<Trajectory> {
        if index < self.slots.len() {
            Some(self.slots.swap_remove(index))
        } else {
            None
        }
    }
}
