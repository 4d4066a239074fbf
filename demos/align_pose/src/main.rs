use argh::FromArgs;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use graspalign::{
    export::ResultExporter, AlignConfig, AlignmentOptimizer, DescriptorField, PoseLayout,
    PoseModel, PoseVector,
};
use graspalign_3d::{
    io::{calibration::Calibration, npy::read_rows_npy},
    pointcloud::PointCloud,
};
use graspalign_models::{ArticulatedHand, MlpDescriptorField, RbfDescriptorField, RigidGripper};

#[derive(FromArgs)]
/// Align a hand or gripper to a descriptor field and export the best pose
struct Args {
    /// model to align: hand or gripper
    #[argh(option, short = 'm', default = "String::from(\"hand\")")]
    model: String,

    /// optional YAML run configuration
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// override the number of iterations
    #[argh(option, short = 'n')]
    iterations: Option<usize>,

    /// override the number of candidates
    #[argh(option)]
    candidates: Option<usize>,

    /// seed for initialization and perturbation noise
    #[argh(option, short = 's')]
    seed: Option<u64>,

    /// number of surface points per candidate
    #[argh(option, default = "256")]
    num_points: usize,

    /// directory receiving the exported artifacts
    #[argh(option, short = 'o', default = "PathBuf::from(\"output\")")]
    output: PathBuf,

    /// binary STL of the gripper, a parallel jaw model is used otherwise
    #[argh(option)]
    gripper_stl: Option<PathBuf>,

    /// camera calibration YAML used together with --arm-pose
    #[argh(option)]
    calibration: Option<PathBuf>,

    /// recorded arm pose "x,y,z,rx,ry,rz" giving the known hand pose
    #[argh(option)]
    arm_pose: Option<String>,

    /// safetensors weights of the reference frame field
    #[argh(option)]
    reference_weights: Option<PathBuf>,

    /// safetensors weights of the target frame field
    #[argh(option)]
    target_weights: Option<PathBuf>,

    /// hidden layer widths of the field network, comma separated
    #[argh(option, default = "String::from(\"256,256\")")]
    hidden: String,

    /// descriptor length of the field network
    #[argh(option, default = "64")]
    descriptor_dim: usize,

    /// (K, 3) .npy cloud of the target frame, required with field weights
    #[argh(option)]
    target_cloud: Option<PathBuf>,
}

/// Joint angles of the recorded reference grasp.
const REFERENCE_JOINTS: [f64; 22] = [
    0.0, 0.0, -0.1515, 0.0, 0.8957, 0.8957, -0.0885, 0.1447, 0.7893, 0.7893, 0.1347, 0.0136,
    0.8194, 0.8194, 0.0926, -0.1597, 0.0, 0.7502, 0.7502, 0.4235, 0.7379, 0.0714,
];

/// Offset of the synthetic target frame with respect to the reference frame.
const SYNTHETIC_OFFSET: [f64; 3] = [0.08, -0.04, 0.35];

fn parse_floats(text: &str) -> Result<Vec<f64>, std::num::ParseFloatError> {
    text.split(',').map(|v| v.trim().parse::<f64>()).collect()
}

fn parse_widths(text: &str) -> Result<Vec<usize>, std::num::ParseIntError> {
    text.split(',').map(|v| v.trim().parse::<usize>()).collect()
}

fn known_hand_pose(args: &Args) -> Result<PoseVector, Box<dyn std::error::Error>> {
    let joints = REFERENCE_JOINTS.to_vec();
    match (&args.calibration, &args.arm_pose) {
        (Some(path), Some(arm)) => {
            let calibration = Calibration::from_yaml_file(path)?;
            let arm: [f64; 6] = parse_floats(arm)?
                .try_into()
                .map_err(|v: Vec<f64>| format!("--arm-pose needs 6 values, got {}", v.len()))?;
            let hand_in_world = calibration.arm_to_hand_world(arm);
            Ok(PoseVector::from_world_transform(&hand_in_world, joints))
        }
        (None, None) => Ok(PoseVector::new(
            [0.0; 3],
            [-0.4526, 0.0825, 0.3768, -1.3436, -1.2123, 1.2338],
            joints,
        )),
        _ => Err("--calibration and --arm-pose must be given together".into()),
    }
}

/// Table patch below the target frame.
fn synthetic_table(z: f64) -> PointCloud {
    let points = (0..20)
        .flat_map(|i| (0..20).map(move |j| [i as f64 * 0.02 - 0.2, j as f64 * 0.02 - 0.2, 0.0]))
        .collect();
    let mut table = PointCloud::new(points, None);
    table.translate([0.0, 0.0, z]);
    table
}

/// Observed cloud of the target frame.
///
/// The synthetic table is only used with the synthetic fields; real field
/// weights need the matching recorded cloud.
fn load_target(
    target_cloud: Option<&Path>,
    with_weights: bool,
) -> Result<PointCloud, Box<dyn std::error::Error>> {
    match (target_cloud, with_weights) {
        (Some(path), _) => {
            let points = read_rows_npy(path)?
                .into_iter()
                .map(|row| match row.as_slice() {
                    [x, y, z, ..] => Ok([*x, *y, *z]),
                    _ => Err(format!("{} has rows of {} values, expected 3", path.display(), row.len())),
                })
                .collect::<Result<Vec<_>, _>>()?;
            log::info!("loaded {} target points from {}", points.len(), path.display());
            Ok(PointCloud::new(points, None))
        }
        (None, false) => Ok(synthetic_table(SYNTHETIC_OFFSET[2] - 0.05)),
        (None, true) => Err("--target-cloud is required together with field weights".into()),
    }
}

fn load_fields(
    args: &Args,
    reference_points: &candle_core::Tensor,
    device: &Device,
) -> Result<(Box<dyn DescriptorField>, Box<dyn DescriptorField>), Box<dyn std::error::Error>> {
    match (&args.reference_weights, &args.target_weights) {
        (Some(reference), Some(target)) => {
            let hidden = parse_widths(&args.hidden)?;
            log::info!("loading field networks with hidden layers {hidden:?}");
            let reference = MlpDescriptorField::load(reference, &hidden, args.descriptor_dim, device)?;
            let target = MlpDescriptorField::load(target, &hidden, args.descriptor_dim, device)?;
            Ok((Box::new(reference), Box::new(target)))
        }
        (None, None) => {
            log::info!("no field weights given, using a synthetic scene offset by {SYNTHETIC_OFFSET:?}");
            let cloud = PointCloud::from_f32_rows(&reference_points.to_dtype(DType::F32)?.to_vec2::<f32>()?);
            let reference = RbfDescriptorField::from_cloud(&cloud, 32, 0.3, device)?;
            log::info!(
                "synthetic field with {} anchors, sigma {}",
                reference.anchors().len(),
                reference.sigma()
            );
            let target = reference.translated(SYNTHETIC_OFFSET)?;
            Ok((Box::new(reference), Box::new(target)))
        }
        _ => Err("--reference-weights and --target-weights must be given together".into()),
    }
}

fn align<P: PoseModel>(
    model: &P,
    known_pose: &PoseVector,
    config: AlignConfig,
    args: &Args,
    device: &Device,
) -> Result<(), Box<dyn std::error::Error>> {
    let approach_keyframes = config.approach_keyframes;
    let target = load_target(args.target_cloud.as_deref(), args.reference_weights.is_some())?;

    // posing the reference does not touch the fields
    let placeholder = RbfDescriptorField::new(vec![[0.0; 3]], 1.0, device)?;
    let (reference_points, reference_mesh) =
        AlignmentOptimizer::new(model, &placeholder, &placeholder, config.clone(), device.clone())?
            .reference_points(known_pose)?;

    let (reference_field, target_field) = load_fields(args, &reference_points, device)?;
    let optimizer = AlignmentOptimizer::new(
        model,
        reference_field.as_ref(),
        target_field.as_ref(),
        config,
        device.clone(),
    )?;

    let result = optimizer.run(&reference_points, &target)?;
    log::info!(
        "best candidate {} with loss {:.6}, {} keyframes over {:.3} m",
        result.best_index,
        result.best_loss,
        result.trajectory.keyframes().len(),
        result.trajectory.path_length()
    );
    log::info!("best translation: {:?}", result.best_pose.translation);

    ResultExporter::new(&args.output)
        .with_approach_keyframes(approach_keyframes)
        .export(&result, &reference_mesh)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();
    let device = Device::Cpu;

    let mut config = match (&args.config, args.model.as_str()) {
        (Some(path), _) => AlignConfig::from_yaml_file(path)?,
        (None, "hand") => AlignConfig::hand(),
        (None, "gripper") => AlignConfig::gripper(),
        (None, other) => return Err(format!("unknown model {other}, expected hand or gripper").into()),
    };
    if let Some(iterations) = args.iterations {
        config.iterations = iterations;
    }
    if let Some(candidates) = args.candidates {
        config.num_candidates = candidates;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    match args.model.as_str() {
        "hand" => {
            let hand = ArticulatedHand::shadow_like(args.num_points, &device)?;
            let known_pose = known_hand_pose(&args)?;
            align(&hand, &known_pose, config, &args, &device)
        }
        "gripper" => {
            let gripper = match &args.gripper_stl {
                Some(path) => RigidGripper::from_stl(path, args.num_points, &device)?,
                None => RigidGripper::parallel_jaw(args.num_points, &device)?,
            };
            align(&gripper, &PoseVector::identity(PoseLayout::rigid()), config, &args, &device)
        }
        other => Err(format!("unknown model {other}, expected hand or gripper").into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graspalign_3d::io::npy::{write_points_npy, write_rows_npy};

    #[test]
    fn test_target_cloud_is_read_from_npy() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("target.npy");
        let points = vec![[0.1, 0.2, 0.3], [-0.1, 0.0, 0.25]];
        write_points_npy(&path, &points)?;

        // field weights take the recorded cloud, never the synthetic table
        let target = load_target(Some(path.as_path()), true)?;
        assert_eq!(target.points(), points.as_slice());
        Ok(())
    }

    #[test]
    fn test_weights_without_target_cloud_are_rejected() {
        assert!(load_target(None, true).is_err());
    }

    #[test]
    fn test_synthetic_table_without_weights() -> Result<(), Box<dyn std::error::Error>> {
        let table = load_target(None, false)?;
        assert_eq!(table.len(), 400);
        let z = SYNTHETIC_OFFSET[2] - 0.05;
        assert!(table.points().iter().all(|p| (p[2] - z).abs() < 1e-12));
        Ok(())
    }

    #[test]
    fn test_target_cloud_needs_three_columns() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("flat.npy");
        write_rows_npy(&path, &[vec![0.0, 1.0], vec![2.0, 3.0]])?;
        assert!(load_target(Some(path.as_path()), true).is_err());
        Ok(())
    }
}
