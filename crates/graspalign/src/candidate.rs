use candle_core::{Device, Tensor, Var};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    error::AlignError,
    pose::{PoseLayout, PoseVector},
};

/// Bounded random initialization of the candidate poses.
///
/// Every entry starts as `U[0, jitter)`. The x and y translations are then
/// redrawn from `U[xy_low, xy_high)`, z is placed `U[z_margin_low, z_margin_high)`
/// above the highest target point, and the rotation is overwritten when a
/// canonical 6D rotation is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitConfig {
    /// Upper bound of the uniform noise on every entry.
    pub jitter: f64,
    /// Lower bound of the x and y translations.
    pub xy_low: f64,
    /// Upper bound of the x and y translations.
    pub xy_high: f64,
    /// Minimum height above the target cloud.
    pub z_margin_low: f64,
    /// Maximum height above the target cloud.
    pub z_margin_high: f64,
    /// Canonical 6D rotation shared by all candidates.
    pub rotation: Option<[f64; 6]>,
}

impl InitConfig {
    /// Hands start palm-down in the canonical orientation with joints near zero.
    pub fn hand() -> Self {
        Self {
            jitter: 0.03,
            xy_low: 0.0,
            xy_high: 0.2,
            z_margin_low: 0.2,
            z_margin_high: 0.3,
            rotation: Some([0.0, -1.0, 0.0, 0.0, 0.0, 1.0]),
        }
    }

    /// Grippers start with a random rotation.
    pub fn gripper() -> Self {
        Self {
            jitter: 0.3,
            xy_low: -0.2,
            xy_high: 0.2,
            z_margin_low: 0.0,
            z_margin_high: 0.1,
            rotation: None,
        }
    }

    fn uniform<R: Rng>(rng: &mut R, low: f64, high: f64) -> f64 {
        low + (high - low) * rng.random::<f64>()
    }

    /// Draw one pose.
    pub fn sample<R: Rng>(&self, layout: PoseLayout, target_zmax: f64, rng: &mut R) -> PoseVector {
        let mut values = (0..layout.dim())
            .map(|_| Self::uniform(rng, 0.0, self.jitter))
            .collect::<Vec<_>>();
        values[0] = Self::uniform(rng, self.xy_low, self.xy_high);
        values[1] = Self::uniform(rng, self.xy_low, self.xy_high);
        values[2] = target_zmax + Self::uniform(rng, self.z_margin_low, self.z_margin_high);
        if let Some(rotation) = self.rotation {
            values[3..9].copy_from_slice(&rotation);
        }
        // the layout is the one the values were generated for
        PoseVector::new(
            [values[0], values[1], values[2]],
            [values[3], values[4], values[5], values[6], values[7], values[8]],
            values[9..].to_vec(),
        )
    }
}

impl Default for InitConfig {
    fn default() -> Self {
        Self::hand()
    }
}

/// The `M` pose hypotheses optimized jointly as one gradient-tracked tensor.
pub struct CandidateBatch {
    var: Var,
    layout: PoseLayout,
}

impl CandidateBatch {
    /// Draw `num_candidates` poses above a target cloud whose highest point is `target_zmax`.
    pub fn initialize<R: Rng>(
        layout: PoseLayout,
        init: &InitConfig,
        num_candidates: usize,
        target_zmax: f64,
        rng: &mut R,
        device: &Device,
    ) -> Result<Self, AlignError> {
        let poses = (0..num_candidates)
            .map(|_| init.sample(layout, target_zmax, rng))
            .collect::<Vec<_>>();
        Self::from_poses(&poses, layout, device)
    }

    /// Start from explicit poses.
    pub fn from_poses(
        poses: &[PoseVector],
        layout: PoseLayout,
        device: &Device,
    ) -> Result<Self, AlignError> {
        if poses.is_empty() {
            return Err(AlignError::InvalidConfig(
                "at least one candidate is required".to_string(),
            ));
        }
        for pose in poses {
            layout.validate_len("candidate pose", pose.dim())?;
        }
        let tensor = PoseVector::batch_to_tensor(poses, device)?;
        Ok(Self {
            var: Var::from_tensor(&tensor)?,
            layout,
        })
    }

    /// The optimized variable.
    pub fn var(&self) -> &Var {
        &self.var
    }

    /// Current `(M, dim)` parameters.
    pub fn as_tensor(&self) -> &Tensor {
        self.var.as_tensor()
    }

    /// Pose layout of every candidate.
    pub fn layout(&self) -> PoseLayout {
        self.layout
    }

    /// Number of candidates `M`.
    pub fn num_candidates(&self) -> usize {
        self.as_tensor().dims()[0]
    }

    /// Current poses copied to the host.
    pub fn poses(&self) -> Result<Vec<PoseVector>, AlignError> {
        PoseVector::batch_from_tensor(self.as_tensor(), self.layout)
    }

    /// Current root translations.
    pub fn translations(&self) -> Result<Vec<[f64; 3]>, AlignError> {
        Ok(self
            .as_tensor()
            .narrow(1, 0, 3)?
            .to_dtype(candle_core::DType::F64)?
            .to_vec2::<f64>()?
            .into_iter()
            .map(|t| [t[0], t[1], t[2]])
            .collect())
    }
}
