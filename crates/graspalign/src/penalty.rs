use candle_core::{Tensor, D};
use serde::{Deserialize, Serialize};

use crate::{
    adapter::{PenaltyKind, PosedModel},
    error::AlignError,
    rotation::{acos, dot, normalize, robust_rotation_from_ortho6d},
};

/// Clamp applied before `acos` to keep its gradient finite.
const ACOS_MARGIN: f64 = 1e-4;

/// Dead-zone penalty on the tilt of the model's local z axis.
///
/// The tilt is measured as two signed angles relative to a canonical frame:
/// roll about the canonical x axis and pitch about the canonical y axis. Pitch
/// is free within `pitch_threshold` either way. Roll is only penalized on the
/// positive side, above `roll_threshold`. Beyond the thresholds the cost grows
/// linearly with `weight`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationPenalty {
    /// Canonical rotation in row-major order; its columns are the canonical axes.
    pub canonical: [[f64; 3]; 3],
    /// Signed roll below this angle is free.
    pub roll_threshold: f64,
    /// Pitch below this angle is free.
    pub pitch_threshold: f64,
    /// Slope of the penalty beyond the thresholds.
    pub weight: f64,
}

impl Default for OrientationPenalty {
    fn default() -> Self {
        use std::f64::consts::PI;
        Self {
            canonical: [[0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            roll_threshold: PI / 6.0 * 0.8,
            pitch_threshold: PI / 6.0,
            weight: 1e-1,
        }
    }
}

impl OrientationPenalty {
    fn axis(&self, column: usize, like: &Tensor) -> Result<Tensor, AlignError> {
        let c = &self.canonical;
        let axis = [c[0][column], c[1][column], c[2][column]].map(|v| v as f32);
        Ok(Tensor::new(&[axis], like.device())?.to_dtype(like.dtype())?)
    }

    /// Signed angle between `z` projected onto the plane orthogonal to `normal`
    /// and the canonical z axis, signed by the side of `side`.
    fn signed_angle(
        z: &Tensor,
        normal: &Tensor,
        canonical_z: &Tensor,
        side: &Tensor,
    ) -> Result<Tensor, AlignError> {
        let along = dot(z, normal)?.unsqueeze(1)?;
        let projected = normalize(&z.broadcast_sub(&along.broadcast_mul(normal)?)?)?;
        let cos = dot(&projected, canonical_z)?.clamp(-1.0 + ACOS_MARGIN, 1.0 - ACOS_MARGIN)?;
        let angle = acos(&cos)?;

        let side = dot(&projected, side)?.detach();
        let sign = side
            .ge(&side.zeros_like()?)?
            .to_dtype(angle.dtype())?
            .affine(2.0, -1.0)?;
        Ok(angle.mul(&sign)?)
    }

    /// Signed `(roll, pitch)` of `(M, 3, 3)` rotations, each `(M,)`.
    pub fn signed_angles(&self, rotations: &Tensor) -> Result<(Tensor, Tensor), AlignError> {
        let z = rotations.narrow(D::Minus1, 2, 1)?.squeeze(D::Minus1)?;
        let ox = self.axis(0, &z)?;
        let oy = self.axis(1, &z)?;
        let oz = self.axis(2, &z)?;

        let roll = Self::signed_angle(&z, &ox, &oz, &oy)?;
        let pitch = Self::signed_angle(&z, &oy, &oz, &ox)?;
        Ok((roll, pitch))
    }

    /// Penalty of `(M, 3, 3)` rotations, `(M,)`.
    pub fn energy(&self, rotations: &Tensor) -> Result<Tensor, AlignError> {
        let (roll, pitch) = self.signed_angles(rotations)?;
        let roll = one_sided_dead_zone(&roll, self.roll_threshold)?;
        let pitch = dead_zone(&pitch, self.pitch_threshold)?;
        Ok((roll + pitch)?.affine(self.weight, 0.0)?)
    }
}

/// `max(|angle| - threshold, 0)`.
pub fn dead_zone(angle: &Tensor, threshold: f64) -> Result<Tensor, AlignError> {
    Ok(angle.abs()?.affine(1.0, -threshold)?.relu()?)
}

/// `max(angle - threshold, 0)` on the signed angle.
pub fn one_sided_dead_zone(angle: &Tensor, threshold: f64) -> Result<Tensor, AlignError> {
    Ok(angle.affine(1.0, -threshold)?.relu()?)
}

/// Penetration of target points into the posed model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenetrationPenalty {
    /// Weight of the summed penetration depth.
    pub weight: f64,
    /// Target points are subsampled to at most this many.
    pub max_points: usize,
}

impl Default for PenetrationPenalty {
    fn default() -> Self {
        Self {
            weight: 1e-1,
            max_points: 512,
        }
    }
}

/// Penalty terms enabled for a run.
///
/// Every field is opt-in; the pose model must support the adapter-backed ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Tilt penalty on the model orientation.
    pub orientation: Option<OrientationPenalty>,
    /// Target point penetration.
    pub penetration: Option<PenetrationPenalty>,
    /// Weight of the self collision energy.
    pub self_penetration: Option<f64>,
    /// Weight of the joint limit energy.
    pub joint_limits: Option<f64>,
}

impl PenaltyConfig {
    /// Penalties used for articulated hands.
    pub fn hand() -> Self {
        Self {
            orientation: Some(OrientationPenalty::default()),
            ..Default::default()
        }
    }

    /// Adapter penalties the pose model has to provide.
    pub fn required_kinds(&self) -> Vec<PenaltyKind> {
        let mut kinds = Vec::new();
        if self.penetration.is_some() {
            kinds.push(PenaltyKind::TargetPenetration);
        }
        if self.self_penetration.is_some() {
            kinds.push(PenaltyKind::SelfPenetration);
        }
        if self.joint_limits.is_some() {
            kinds.push(PenaltyKind::JointLimits);
        }
        kinds
    }

    /// Add the enabled penalties to the `(M,)` descriptor losses.
    ///
    /// `target` is the subsampled target cloud, required when penetration is enabled.
    pub fn apply<P: PosedModel>(
        &self,
        losses: Tensor,
        posed: &P,
        target: Option<&Tensor>,
    ) -> Result<Tensor, AlignError> {
        let mut losses = losses;
        if let Some(orientation) = &self.orientation {
            let rotations = robust_rotation_from_ortho6d(&posed.poses().narrow(1, 3, 6)?)?;
            losses = (losses + orientation.energy(&rotations)?)?;
        }
        if let Some(penetration) = &self.penetration {
            let target = target.ok_or_else(|| {
                AlignError::InvalidConfig("penetration penalty needs target points".to_string())
            })?;
            let energy = posed.penetration_energy(target)?;
            losses = (losses + energy.affine(penetration.weight, 0.0)?)?;
        }
        if let Some(weight) = self.self_penetration {
            let energy = posed.self_penetration_energy()?;
            losses = (losses + energy.affine(weight, 0.0)?)?;
        }
        if let Some(weight) = self.joint_limits {
            let energy = posed.joint_limit_energy()?;
            losses = (losses + energy.affine(weight, 0.0)?)?;
        }
        Ok(losses)
    }
}
