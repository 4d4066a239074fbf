use candle_core::{DType, Device};
use graspalign::{
    export::{load_poses, ResultExporter, RunSummary},
    penalty::PenetrationPenalty,
    selection::{OrientationWindow, SelectionPolicy},
    AlignConfig, AlignError, AlignmentOptimizer, PoseLayout, PoseModel, PoseVector,
};
use graspalign_3d::pointcloud::PointCloud;
use graspalign_models::{ArticulatedHand, RbfDescriptorField, RigidGripper};

const TARGET_OFFSET: [f64; 3] = [0.05, 0.1, 0.4];

fn demo_hand_pose() -> PoseVector {
    let joints = vec![
        0.0, 0.0, -0.151528783, 0.0, 0.895708154, 0.895708154, -0.0884832114, 0.144736418,
        0.78926782, 0.78926782, 0.13470952, 0.0136436849, 0.819381827, 0.819381827,
        0.0925745472, -0.159699768, 0.0, 0.750248799, 0.750248799, 0.423467395, 0.737880718,
        0.0714003058,
    ];
    PoseVector::new(
        [0.0; 3],
        [-0.45260642, 0.08248845, 0.37683634, -1.34357664, -1.21226209, 1.2337978],
        joints,
    )
}

/// Flat table patch below the target frame.
fn table(z: f64) -> PointCloud {
    let mut points = Vec::new();
    for i in 0..10 {
        for j in 0..10 {
            points.push([i as f64 * 0.03 - 0.15, j as f64 * 0.03 - 0.15, z]);
        }
    }
    PointCloud::new(points, None)
}

/// Reference field built from the reference surface, the target field is the
/// same field moved by `TARGET_OFFSET`.
fn fields(
    reference_points: &candle_core::Tensor,
    device: &Device,
) -> Result<(RbfDescriptorField, RbfDescriptorField), AlignError> {
    let cloud = PointCloud::from_f32_rows(&reference_points.to_dtype(DType::F32)?.to_vec2::<f32>()?);
    let reference = RbfDescriptorField::from_cloud(&cloud, 16, 0.3, device)?;
    let target = reference.translated(TARGET_OFFSET)?;
    Ok((reference, target))
}

#[test]
fn test_hand_alignment() -> Result<(), AlignError> {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = Device::Cpu;
    let hand = ArticulatedHand::shadow_like(128, &device)?;

    let mut config = AlignConfig::hand();
    config.seed = Some(11);
    config.penalties.penetration = Some(PenetrationPenalty::default());
    assert_eq!((config.num_candidates, config.iterations), (10, 1500));

    // the fields are only needed for `run`; a placeholder pair builds the reference points
    let placeholder = RbfDescriptorField::new(vec![[0.0; 3]], 1.0, &device)?;
    let poser = AlignmentOptimizer::new(&hand, &placeholder, &placeholder, config.clone(), device.clone())?;
    let (reference_points, reference_mesh) = poser.reference_points(&demo_hand_pose())?;
    assert_eq!(reference_points.dims(), &[128, 3]);
    let (reference_low, _) = reference_mesh.bounding_box().expect("reference mesh has vertices");

    // the table sits well below where the moved reference hand would rest
    let table_z = reference_low.z + TARGET_OFFSET[2] - 0.2;
    let target = table(table_z);

    let (reference_field, target_field) = fields(&reference_points, &device)?;
    let optimizer = AlignmentOptimizer::new(&hand, &reference_field, &target_field, config, device)?;
    let result = optimizer.run(&reference_points, &target)?;

    assert_eq!(result.final_losses.len(), 10);
    assert_eq!(result.loss_history.len(), 1500);
    assert!(result.best_loss >= 0.0);
    assert!(result.final_losses.iter().all(|l| l.is_finite() && *l >= 0.0));
    let min = result
        .final_losses
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);
    assert_eq!(result.best_loss, min);
    assert_eq!(result.final_losses[result.best_index], result.best_loss);

    let (low, _) = result.mesh.bounding_box().expect("best mesh has vertices");
    assert!(low.z >= table_z, "hand ended below the table: {} < {table_z}", low.z);

    assert_eq!(result.best_pose.layout(), PoseLayout::articulated(22));
    for (q, (lo, hi)) in result.best_pose.joints.iter().zip(hand.joint_limits()) {
        assert!(*q >= lo - 1e-9 && *q <= hi + 1e-9);
    }
    assert_eq!(result.trajectory.len(), 1500);
    assert!(!result.trajectory.keyframes().is_empty());
    assert_eq!(result.best_points.len(), 128);
    Ok(())
}

#[test]
fn test_constrained_hand_selection() -> Result<(), AlignError> {
    let device = Device::Cpu;
    let hand = ArticulatedHand::shadow_like(64, &device)?;

    let mut config = AlignConfig::hand();
    config.num_candidates = 4;
    config.iterations = 10;
    config.seed = Some(5);
    config.selection = SelectionPolicy::Constrained(OrientationWindow::default());

    let placeholder = RbfDescriptorField::new(vec![[0.0; 3]], 1.0, &device)?;
    let poser = AlignmentOptimizer::new(&hand, &placeholder, &placeholder, config.clone(), device.clone())?;
    let (reference_points, _) = poser.reference_points(&demo_hand_pose())?;
    let (reference_field, target_field) = fields(&reference_points, &device)?;

    let optimizer = AlignmentOptimizer::new(&hand, &reference_field, &target_field, config, device)?;
    let result = optimizer.run(&reference_points, &table(0.0))?;
    // candidates start at the canonical orientation and barely rotate in ten steps
    assert!(OrientationWindow::default().contains(&result.best_pose));
    Ok(())
}

#[test]
fn test_gripper_alignment_and_export() -> Result<(), Box<dyn std::error::Error>> {
    let device = Device::Cpu;
    let gripper = RigidGripper::parallel_jaw(96, &device)?;

    let mut config = AlignConfig::gripper();
    config.num_candidates = 6;
    config.iterations = 150;
    config.seed = Some(2);

    let placeholder = RbfDescriptorField::new(vec![[0.0; 3]], 1.0, &device)?;
    let poser = AlignmentOptimizer::new(&gripper, &placeholder, &placeholder, config.clone(), device.clone())?;
    let known = PoseVector::identity(PoseLayout::rigid());
    let (reference_points, reference_mesh) = poser.reference_points(&known)?;
    let (reference_field, target_field) = fields(&reference_points, &device)?;

    let optimizer =
        AlignmentOptimizer::new(&gripper, &reference_field, &target_field, config.clone(), device)?;
    let result = optimizer.run(&reference_points, &table(0.2))?;

    let first = result.loss_history[0];
    let last = result.loss_history[result.loss_history.len() - 1];
    assert!(last < first, "mean loss did not decrease: {first} -> {last}");

    let dir = tempfile::tempdir()?;
    let exporter = ResultExporter::new(dir.path()).with_approach_keyframes(config.approach_keyframes);
    exporter.export(&result, &reference_mesh)?;

    let keyframes = load_poses(dir.path().join("execution_traj.npy"), gripper.layout())?;
    assert_eq!(keyframes.len(), result.trajectory.keyframes().len());
    let approach = load_poses(dir.path().join("approach_traj.npy"), gripper.layout())?;
    assert_eq!(approach.len(), keyframes.len().min(40));
    assert_eq!(approach.last(), keyframes.last());

    let best = load_poses(dir.path().join("best_pose.npy"), gripper.layout())?;
    assert_eq!(best, vec![result.best_pose.clone()]);

    let summary: RunSummary =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("summary.json"))?)?;
    assert_eq!(summary.best_index, result.best_index);
    assert_eq!(summary.iterations, 150);
    assert_eq!(summary.keyframes, keyframes.len());
    Ok(())
}

#[test]
fn test_hand_rejects_gripper_poses() -> Result<(), AlignError> {
    let device = Device::Cpu;
    let hand = ArticulatedHand::shadow_like(32, &device)?;
    let field = RbfDescriptorField::new(vec![[0.0; 3]], 1.0, &device)?;
    let optimizer = AlignmentOptimizer::new(&hand, &field, &field, AlignConfig::hand(), device)?;
    let gripper_pose = PoseVector::identity(PoseLayout::rigid());
    assert!(matches!(
        optimizer.reference_points(&gripper_pose),
        Err(AlignError::InputShape { .. })
    ));
    Ok(())
}
