use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use graspalign_3d::{mesh::TriMesh, pointcloud::PointCloud};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    adapter::{DescriptorField, PoseModel, PoseOptions, PosedModel},
    candidate::CandidateBatch,
    config::AlignConfig,
    error::AlignError,
    pose::PoseVector,
    schedule::{CosineAnnealing, PerturbationSchedule},
    selection::select,
    trajectory::{Trajectory, TrajectorySet},
};

/// Outcome of an alignment run.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    /// Slot of the winning candidate.
    pub best_index: usize,
    /// Loss of the winning candidate at the last iteration.
    pub best_loss: f64,
    /// Per-candidate losses at the last iteration.
    pub final_losses: Vec<f64>,
    /// Final pose of the winner, retargeted for execution.
    pub best_pose: PoseVector,
    /// Path of the winner.
    pub trajectory: Trajectory,
    /// Perturbed surface points of the winner at the last iteration.
    pub best_points: Vec<[f64; 3]>,
    /// Mesh of the winner at its final pose.
    pub mesh: TriMesh,
    /// Mean loss over the candidates at every iteration.
    pub loss_history: Vec<f64>,
}

/// Multi-start gradient alignment of a pose model to a descriptor field.
///
/// The reference field describes the frame in which the model pose is known,
/// the target field the frame in which it is searched for.
pub struct AlignmentOptimizer<'a, P: PoseModel> {
    model: &'a P,
    reference_field: &'a dyn DescriptorField,
    target_field: &'a dyn DescriptorField,
    config: AlignConfig,
    device: Device,
}

impl<'a, P: PoseModel> AlignmentOptimizer<'a, P> {
    /// Validate the configuration against the model and build the optimizer.
    pub fn new(
        model: &'a P,
        reference_field: &'a dyn DescriptorField,
        target_field: &'a dyn DescriptorField,
        config: AlignConfig,
        device: Device,
    ) -> Result<Self, AlignError> {
        config.validate()?;
        if let Some(kind) = config
            .penalties
            .required_kinds()
            .into_iter()
            .find(|kind| !model.supports_penalty(*kind))
        {
            return Err(AlignError::UnsupportedPenalty(kind));
        }
        Ok(Self {
            model,
            reference_field,
            target_field,
            config,
            device,
        })
    }

    /// The run configuration.
    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    /// Pose the model at a known pose and return its `(N, 3)` surface points and mesh.
    pub fn reference_points(&self, pose: &PoseVector) -> Result<(Tensor, TriMesh), AlignError> {
        self.model.layout().validate_len("reference pose", pose.dim())?;
        let batch = PoseVector::batch_to_tensor(std::slice::from_ref(pose), &self.device)?;
        let posed = self.model.set_parameters(&batch, PoseOptions::default())?;
        self.check_surface(posed.surface_points(), 1)?;
        let points = posed.surface_points().get(0)?.detach();
        Ok((points, posed.mesh(0)?))
    }

    fn check_surface(&self, points: &Tensor, num_candidates: usize) -> Result<(), AlignError> {
        let expected = [num_candidates, self.model.num_surface_points(), 3];
        if points.dims() != expected {
            return Err(AlignError::AdapterContract {
                adapter: "PoseModel::surface_points",
                expected: format!("{expected:?}"),
                got: points.dims().to_vec(),
            });
        }
        Ok(())
    }

    /// Reference descriptor as a `(1, K)` row.
    fn reference_descriptor(&self, reference_points: &Tensor) -> Result<Tensor, AlignError> {
        let coords = match reference_points.dims() {
            [_, 3] => reference_points.unsqueeze(0)?,
            [1, _, 3] => reference_points.clone(),
            dims => {
                return Err(AlignError::InputShape {
                    what: "reference points",
                    expected: "(N, 3)".to_string(),
                    got: dims.to_vec(),
                })
            }
        };
        let descriptor = self
            .reference_field
            .evaluate(&coords.to_dtype(DType::F32)?)?
            .detach();
        if descriptor.rank() < 2 || descriptor.dim(0)? != 1 {
            return Err(AlignError::AdapterContract {
                adapter: "DescriptorField::evaluate (reference)",
                expected: "(1, ...)".to_string(),
                got: descriptor.dims().to_vec(),
            });
        }
        Ok(descriptor.flatten_from(1)?)
    }

    /// Per-candidate mean absolute descriptor difference, `(M,)`.
    fn descriptor_losses(&self, points: &Tensor, reference: &Tensor) -> Result<Tensor, AlignError> {
        let num_candidates = points.dim(0)?;
        let descriptor = self.target_field.evaluate(points)?;
        let per_candidate = reference.dim(1)?;
        if descriptor.rank() < 2
            || descriptor.dim(0)? != num_candidates
            || descriptor.elem_count() != num_candidates * per_candidate
        {
            return Err(AlignError::AdapterContract {
                adapter: "DescriptorField::evaluate (target)",
                expected: format!("({num_candidates}, ...) with {per_candidate} values per candidate"),
                got: descriptor.dims().to_vec(),
            });
        }
        let descriptor = descriptor.flatten_from(1)?;
        Ok(descriptor.broadcast_sub(reference)?.abs()?.mean(1)?)
    }

    fn perturb<R: Rng>(points: &Tensor, scale: f64, rng: &mut R) -> Result<Tensor, AlignError> {
        let noise = (0..points.elem_count())
            .map(|_| (rng.random::<f64>() * scale) as f32)
            .collect::<Vec<_>>();
        let noise = Tensor::from_vec(noise, points.shape(), points.device())?;
        Ok(points.add(&noise)?)
    }

    fn centroids(points: &Tensor) -> Result<Vec<[f64; 3]>, AlignError> {
        Ok(points
            .detach()
            .mean(1)?
            .to_dtype(DType::F64)?
            .to_vec2::<f64>()?
            .into_iter()
            .map(|c| [c[0], c[1], c[2]])
            .collect())
    }

    /// First non-finite entry of `values` as a numeric instability error.
    fn check_finite(
        values: &[f64],
        iteration: usize,
        stage: &'static str,
        candidate_of: impl Fn(usize) -> usize,
    ) -> Result<(), AlignError> {
        match values.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(AlignError::NumericInstability {
                iteration,
                candidate: candidate_of(index),
                stage,
            }),
            None => Ok(()),
        }
    }

    /// Align the model to the target frame.
    ///
    /// `reference_points` are the `(N, 3)` surface points of the model at its
    /// known pose; `target` is the observed cloud of the target frame, used to
    /// place the candidates above it and for the penetration penalty.
    pub fn run(&self, reference_points: &Tensor, target: &PointCloud) -> Result<AlignmentResult, AlignError> {
        let config = &self.config;
        let target_zmax = target
            .max_bound()
            .ok_or(AlignError::InputShape {
                what: "target cloud",
                expected: "(K, 3) with K > 0".to_string(),
                got: vec![0, 3],
            })?
            .z;
        let reference = self.reference_descriptor(reference_points)?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let num_candidates = config.num_candidates;
        let candidates = CandidateBatch::initialize(
            self.model.layout(),
            &config.init,
            num_candidates,
            target_zmax,
            &mut rng,
            &self.device,
        )?;
        log::debug!("initial translations: {:?}", candidates.translations()?);

        let mut opt = AdamW::new(
            vec![candidates.var().clone()],
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;
        let mut lr_schedule =
            CosineAnnealing::new(config.learning_rate, config.eta_min, config.schedule_period());
        let mut perturbation = PerturbationSchedule::new(config.perturb_scale, config.perturb_decay);
        let mut trajectories =
            TrajectorySet::new(num_candidates, config.iterations, config.keyframe_threshold);

        let penetration_target = match &config.penalties.penetration {
            Some(penetration) => {
                let rows = target
                    .subsample(penetration.max_points)
                    .into_iter()
                    .flat_map(|p| p.map(|v| v as f32))
                    .collect::<Vec<_>>();
                let len = rows.len() / 3;
                Some(Tensor::from_vec(rows, (len, 3), &self.device)?)
            }
            None => None,
        };

        log::info!(
            "aligning {} candidates of dim {} over {} iterations",
            num_candidates,
            self.model.layout().dim(),
            config.iterations
        );

        let mut loss_history = Vec::with_capacity(config.iterations);
        let mut final_losses = Vec::new();
        let mut final_points = None;
        for iteration in 0..config.iterations {
            let posed = self
                .model
                .set_parameters(candidates.as_tensor(), PoseOptions::default())?;
            self.check_surface(posed.surface_points(), num_candidates)?;

            let points = Self::perturb(posed.surface_points(), perturbation.current(), &mut rng)?;
            perturbation.advance();

            let saved = self
                .model
                .save_pose(candidates.as_tensor(), PoseOptions::retargeted())?;
            trajectories.record_batch(&Self::centroids(&points)?, &saved)?;

            let losses = self.descriptor_losses(&points, &reference)?;
            let losses = config
                .penalties
                .apply(losses, &posed, penetration_target.as_ref())?;

            let host_losses = losses.to_dtype(DType::F64)?.to_vec1::<f64>()?;
            Self::check_finite(&host_losses, iteration, "loss", |i| i)?;

            let loss = losses.mean_all()?;
            let mean = host_losses.iter().sum::<f64>() / host_losses.len() as f64;
            loss_history.push(mean);
            if iteration % config.log_period == 0 {
                let listed = host_losses
                    .iter()
                    .map(|l| format!("{l:.6}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                log::info!("iteration {iteration}: losses {listed}");
            }

            let grads = loss.backward()?;
            if let Some(grad) = grads.get(candidates.as_tensor()) {
                let dim = grad.dim(1)?;
                let host_grad = grad.flatten_all()?.to_dtype(DType::F64)?.to_vec1::<f64>()?;
                Self::check_finite(&host_grad, iteration, "gradient", |i| i / dim)?;
            }
            opt.step(&grads)?;
            if iteration % config.lr_decay_period == 0 {
                let lr = lr_schedule.step();
                opt.set_learning_rate(lr);
                log::debug!("iteration {iteration}: learning rate {lr:.6}");
            }

            final_losses = host_losses;
            final_points = Some(points.detach());
        }

        let final_poses = self
            .model
            .save_pose(candidates.as_tensor(), PoseOptions::retargeted())?;
        let best_index = select(&final_losses, &final_poses, &config.selection)?;
        let best_loss = final_losses[best_index];
        log::info!("best loss: {best_loss:.6}, best index: {best_index}");

        let best_points = match final_points {
            Some(points) => points
                .get(best_index)?
                .to_dtype(DType::F64)?
                .to_vec2::<f64>()?
                .into_iter()
                .map(|p| [p[0], p[1], p[2]])
                .collect(),
            None => Vec::new(),
        };
        let mesh = self
            .model
            .set_parameters(candidates.as_tensor(), PoseOptions::default())?
            .mesh(best_index)?;
        let trajectory = trajectories
            .into_slot(best_index)
            .unwrap_or_else(|| Trajectory::with_capacity(0, config.keyframe_threshold));

        Ok(AlignmentResult {
            best_index,
            best_loss,
            final_losses,
            best_pose: final_poses[best_index].clone(),
            trajectory,
            best_points,
            mesh,
            loss_history,
        })
    }
}
