use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use glam::{DMat3, DVec3};
use graspalign::{
    adapter::{PenaltyKind, PoseModel, PoseOptions, PosedModel},
    error::AlignError,
    pose::{PoseLayout, PoseVector},
    rotation::{axis_rotation, robust_rotation_from_ortho6d, rotation_from_ortho6d, transform_points},
};
use graspalign_3d::{
    mesh::TriMesh,
    transforms::{ortho6d_from_rotation, rows_to_mat3},
};
use rand::{rngs::StdRng, SeedableRng};

// keeps the gradient of the pairwise distances finite at zero
const DISTANCE_EPS: f64 = 1e-9;

const SAMPLING_SEED: u64 = 0;

/// Frame a joint or link hangs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Root,
    Joint(usize),
}

#[derive(Debug, Clone)]
struct JointSpec {
    name: String,
    parent: Frame,
    offset: DVec3,
    rest: Option<DMat3>,
    axis: DVec3,
    lower: f64,
    upper: f64,
}

#[derive(Debug, Clone)]
struct LinkSpec {
    frame: Frame,
    mesh: TriMesh,
    spheres: Vec<([f64; 3], f64)>,
}

impl LinkSpec {
    /// Box of `length` along the local z axis with collision spheres on its axis.
    fn segment(frame: Frame, length: f64, half_width: f64) -> Self {
        let mesh = TriMesh::cuboid([0.0, 0.0, length / 2.0], [half_width, half_width, length / 2.0]);
        let count = ((length / (2.0 * half_width)).round() as usize).max(1);
        let spheres = (0..count)
            .map(|i| ([0.0, 0.0, length * (i as f64 + 0.5) / count as f64], half_width))
            .collect();
        Self {
            frame,
            mesh,
            spheres,
        }
    }

    fn palm() -> Self {
        let half = [0.045, 0.011, 0.05];
        let center = [0.0, 0.0, 0.045];
        let mut spheres = Vec::new();
        for ix in 0..4 {
            for iz in 0..4 {
                let x = -0.033 + 0.022 * ix as f64;
                let z = center[2] - 0.036 + 0.024 * iz as f64;
                spheres.push(([x, 0.0, z], half[1]));
            }
        }
        Self {
            frame: Frame::Root,
            mesh: TriMesh::cuboid(center, half),
            spheres,
        }
    }
}

/// Kinematic tree of a five finger hand.
#[derive(Debug, Clone)]
struct Skeleton {
    joints: Vec<JointSpec>,
    links: Vec<LinkSpec>,
}

impl Skeleton {
    fn joint(
        &mut self,
        name: String,
        parent: Frame,
        offset: [f64; 3],
        rest: Option<DMat3>,
        axis: [f64; 3],
        limits: (f64, f64),
    ) -> Frame {
        self.joints.push(JointSpec {
            name,
            parent,
            offset: DVec3::from_array(offset),
            rest,
            axis: DVec3::from_array(axis).normalize(),
            lower: limits.0,
            upper: limits.1,
        });
        Frame::Joint(self.joints.len() - 1)
    }

    /// Proximal, middle and distal phalanges flexing towards the palm.
    fn phalanges(&mut self, prefix: &str, knuckle: Frame, lengths: [f64; 3]) {
        const FLEX: [f64; 3] = [1.0, 0.0, 0.0];
        let j3 = self.joint(format!("{prefix}J3"), knuckle, [0.0; 3], None, FLEX, (-0.262, 1.571));
        self.links.push(LinkSpec::segment(j3, lengths[0], 0.0095));
        let j2 = self.joint(format!("{prefix}J2"), j3, [0.0, 0.0, lengths[0]], None, FLEX, (0.0, 1.571));
        self.links.push(LinkSpec::segment(j2, lengths[1], 0.009));
        let j1 = self.joint(format!("{prefix}J1"), j2, [0.0, 0.0, lengths[1]], None, FLEX, (0.0, 1.571));
        self.links.push(LinkSpec::segment(j1, lengths[2], 0.0085));
    }

    fn shadow_like() -> Self {
        const ABDUCT: [f64; 3] = [0.0, 1.0, 0.0];
        let mut skeleton = Self {
            joints: Vec::new(),
            links: vec![LinkSpec::palm()],
        };

        for (prefix, x) in [("FF", 0.033), ("MF", 0.011), ("RF", -0.011)] {
            let j4 = skeleton.joint(
                format!("{prefix}J4"),
                Frame::Root,
                [x, 0.0, 0.095],
                None,
                ABDUCT,
                (-0.349, 0.349),
            );
            skeleton.phalanges(prefix, j4, [0.045, 0.025, 0.026]);
        }

        let j5 = skeleton.joint(
            "LFJ5".to_string(),
            Frame::Root,
            [-0.033, 0.0, 0.02],
            None,
            [0.573576, 0.0, 0.819152],
            (0.0, 0.785),
        );
        skeleton.links.push(LinkSpec::segment(j5, 0.06, 0.009));
        let j4 = skeleton.joint("LFJ4".to_string(), j5, [0.0, 0.0, 0.075], None, ABDUCT, (-0.349, 0.349));
        skeleton.phalanges("LF", j4, [0.045, 0.025, 0.026]);

        // thumb base sits on the palm side and points diagonally up
        let th5 = skeleton.joint(
            "THJ5".to_string(),
            Frame::Root,
            [0.034, -0.009, 0.029],
            Some(DMat3::from_rotation_y(std::f64::consts::FRAC_PI_4)),
            [0.0, 0.0, 1.0],
            (-1.047, 1.047),
        );
        let th4 = skeleton.joint("THJ4".to_string(), th5, [0.0; 3], None, [1.0, 0.0, 0.0], (0.0, 1.222));
        skeleton.links.push(LinkSpec::segment(th4, 0.038, 0.011));
        let th3 = skeleton.joint("THJ3".to_string(), th4, [0.0, 0.0, 0.038], None, [1.0, 0.0, 0.0], (-0.209, 0.209));
        let th2 = skeleton.joint("THJ2".to_string(), th3, [0.0; 3], None, [0.0, 1.0, 0.0], (-0.698, 0.698));
        skeleton.links.push(LinkSpec::segment(th2, 0.032, 0.01));
        let th1 = skeleton.joint("THJ1".to_string(), th2, [0.0, 0.0, 0.032], None, [1.0, 0.0, 0.0], (-0.262, 1.571));
        skeleton.links.push(LinkSpec::segment(th1, 0.0275, 0.009));

        skeleton
    }

    /// Link attached to `frame` or to its closest ancestor carrying one.
    fn owning_link(&self, mut frame: Frame) -> usize {
        loop {
            if let Some(link) = self.links.iter().position(|l| l.frame == frame) {
                return link;
            }
            frame = match frame {
                Frame::Joint(j) => self.joints[j].parent,
                // the palm is always attached to the root
                Frame::Root => return 0,
            };
        }
    }

    /// Parent link of `link` in the link tree.
    fn parent_link(&self, link: usize) -> Option<usize> {
        match self.links[link].frame {
            Frame::Root => None,
            Frame::Joint(j) => Some(self.owning_link(self.joints[j].parent)),
        }
    }

    fn adjacent(&self, a: usize, b: usize) -> bool {
        a == b || self.parent_link(a) == Some(b) || self.parent_link(b) == Some(a)
    }
}

/// Split `total` points over links proportionally to their area.
fn allocate(total: usize, areas: &[f64]) -> Vec<usize> {
    let sum = areas.iter().sum::<f64>();
    let exact = areas.iter().map(|a| total as f64 * a / sum).collect::<Vec<_>>();
    let mut counts = exact.iter().map(|e| e.floor() as usize).collect::<Vec<_>>();
    let mut order = (0..areas.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.total_cmp(&ra)
    });
    let missing = total - counts.iter().sum::<usize>();
    for &i in order.iter().take(missing) {
        counts[i] += 1;
    }
    counts
}

fn points_tensor(points: &[[f64; 3]], device: &Device) -> Result<Tensor, AlignError> {
    let flat = points
        .iter()
        .flat_map(|p| p.map(|v| v as f32))
        .collect::<Vec<_>>();
    Ok(Tensor::from_vec(flat, (points.len(), 3), device)?)
}

fn mat3_tensor(m: &DMat3, device: &Device) -> Result<Tensor, AlignError> {
    let rows = graspalign_3d::transforms::mat3_to_rows(m).map(|r| r.map(|v| v as f32));
    Ok(Tensor::new(&rows, device)?)
}

/// Skeleton with its constant tensors.
struct HandData {
    skeleton: Skeleton,
    joint_offsets: Vec<Tensor>,
    joint_rests: Vec<Option<Tensor>>,
    surface: Vec<(usize, Tensor)>,
    spheres: Vec<(usize, Tensor)>,
    sphere_radii: Tensor,
    pair_radii: Tensor,
    pair_mask: Tensor,
    lower: Tensor,
    upper: Tensor,
}

impl HandData {
    fn new(skeleton: Skeleton, num_points: usize, device: &Device) -> Result<Self, AlignError> {
        let joint_offsets = skeleton
            .joints
            .iter()
            .map(|j| points_tensor(&[j.offset.to_array()], device))
            .collect::<Result<Vec<_>, _>>()?;
        let joint_rests = skeleton
            .joints
            .iter()
            .map(|j| j.rest.as_ref().map(|r| mat3_tensor(r, device)).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        let areas = skeleton.links.iter().map(|l| l.mesh.area()).collect::<Vec<_>>();
        let mut rng = StdRng::seed_from_u64(SAMPLING_SEED);
        let mut surface = Vec::new();
        for (link, count) in allocate(num_points, &areas).into_iter().enumerate() {
            if count > 0 {
                let points = skeleton.links[link].mesh.sample_surface(count, &mut rng);
                surface.push((link, points_tensor(&points, device)?));
            }
        }

        let mut spheres = Vec::new();
        let mut owners = Vec::new();
        let mut radii = Vec::new();
        for (link, spec) in skeleton.links.iter().enumerate() {
            let centers = spec.spheres.iter().map(|(c, _)| *c).collect::<Vec<_>>();
            spheres.push((link, points_tensor(&centers, device)?));
            for (_, r) in &spec.spheres {
                owners.push(link);
                radii.push(*r as f32);
            }
        }
        let s = radii.len();
        let mut pair_radii = Vec::with_capacity(s * s);
        let mut pair_mask = Vec::with_capacity(s * s);
        for i in 0..s {
            for j in 0..s {
                pair_radii.push(radii[i] + radii[j]);
                let counted = i < j && !skeleton.adjacent(owners[i], owners[j]);
                pair_mask.push(if counted { 1.0f32 } else { 0.0 });
            }
        }

        let lower = skeleton.joints.iter().map(|j| j.lower as f32).collect::<Vec<_>>();
        let upper = skeleton.joints.iter().map(|j| j.upper as f32).collect::<Vec<_>>();
        let num_joints = skeleton.joints.len();

        Ok(Self {
            joint_offsets,
            joint_rests,
            surface,
            spheres,
            sphere_radii: Tensor::from_vec(radii, s, device)?,
            pair_radii: Tensor::from_vec(pair_radii, (s, s), device)?,
            pair_mask: Tensor::from_vec(pair_mask, (s, s), device)?,
            lower: Tensor::from_vec(lower, (1, num_joints), device)?,
            upper: Tensor::from_vec(upper, (1, num_joints), device)?,
            skeleton,
        })
    }
}

/// Box-link model of a 22 joint five finger hand.
///
/// The pose is the palm root transform followed by the joint angles of the
/// first, middle and ring fingers (`J4..J1`), the little finger (`J5..J1`) and
/// the thumb (`J5..J1`). Fingers extend along local `+z` and flex towards the
/// palm side, local `-y`.
pub struct ArticulatedHand {
    data: Arc<HandData>,
    num_points: usize,
    device: Device,
}

impl ArticulatedHand {
    /// Build the hand with `num_points` surface samples per instance.
    pub fn shadow_like(num_points: usize, device: &Device) -> Result<Self, AlignError> {
        if num_points == 0 {
            return Err(AlignError::InvalidConfig(
                "the hand needs at least one surface point".to_string(),
            ));
        }
        let data = HandData::new(Skeleton::shadow_like(), num_points, device)?;
        log::debug!(
            "hand model with {} joints, {} links and {} collision spheres",
            data.skeleton.joints.len(),
            data.skeleton.links.len(),
            data.sphere_radii.dim(0)?
        );
        Ok(Self {
            data: Arc::new(data),
            num_points,
            device: device.clone(),
        })
    }

    /// Number of actuated joints.
    pub fn num_joints(&self) -> usize {
        self.data.skeleton.joints.len()
    }

    /// Joint names in pose order.
    pub fn joint_names(&self) -> Vec<&str> {
        self.data.skeleton.joints.iter().map(|j| j.name.as_str()).collect()
    }

    /// `(lower, upper)` limits in pose order.
    pub fn joint_limits(&self) -> Vec<(f64, f64)> {
        self.data
            .skeleton
            .joints
            .iter()
            .map(|j| (j.lower, j.upper))
            .collect()
    }
}

/// Posed batch of hands.
pub struct PosedHand {
    data: Arc<HandData>,
    poses: Tensor,
    joints: Tensor,
    points: Tensor,
    link_frames: Vec<(Tensor, Tensor)>,
}

impl PosedHand {
    /// World sphere centers, `(M, S, 3)`.
    fn sphere_centers(&self) -> Result<Tensor, AlignError> {
        let centers = self
            .data
            .spheres
            .iter()
            .map(|(link, local)| {
                let (r, t) = &self.link_frames[*link];
                transform_points(local, r, t)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Tensor::cat(&centers, 1)?)
    }
}

impl PosedModel for PosedHand {
    fn poses(&self) -> &Tensor {
        &self.poses
    }

    fn surface_points(&self) -> &Tensor {
        &self.points
    }

    fn mesh(&self, index: usize) -> Result<TriMesh, AlignError> {
        let mut mesh = TriMesh::default();
        for ((r, t), link) in self.link_frames.iter().zip(&self.data.skeleton.links) {
            let rows = r.get(index)?.to_dtype(DType::F64)?.to_vec2::<f64>()?;
            let rows = [
                [rows[0][0], rows[0][1], rows[0][2]],
                [rows[1][0], rows[1][1], rows[1][2]],
                [rows[2][0], rows[2][1], rows[2][2]],
            ];
            let t = t.get(index)?.to_dtype(DType::F64)?.to_vec1::<f64>()?;
            mesh.append(&link.mesh.transformed(&rows_to_mat3(&rows), DVec3::new(t[0], t[1], t[2])));
        }
        Ok(mesh)
    }

    fn penetration_energy(&self, target: &Tensor) -> Result<Tensor, AlignError> {
        let centers = self.sphere_centers()?;
        let target = target.unsqueeze(0)?.unsqueeze(0)?;
        let distances = centers
            .unsqueeze(2)?
            .broadcast_sub(&target)?
            .sqr()?
            .sum(3)?
            .affine(1.0, DISTANCE_EPS)?
            .sqrt()?;
        let s = self.data.sphere_radii.dim(0)?;
        let radii = self.data.sphere_radii.reshape((1, s, 1))?;
        let depth = radii.broadcast_sub(&distances)?.relu()?;
        Ok(depth.sum(2)?.sum(1)?)
    }

    fn self_penetration_energy(&self) -> Result<Tensor, AlignError> {
        let centers = self.sphere_centers()?;
        let distances = centers
            .unsqueeze(2)?
            .broadcast_sub(&centers.unsqueeze(1)?)?
            .sqr()?
            .sum(3)?
            .affine(1.0, DISTANCE_EPS)?
            .sqrt()?;
        let overlap = self
            .data
            .pair_radii
            .unsqueeze(0)?
            .broadcast_sub(&distances)?
            .relu()?
            .broadcast_mul(&self.data.pair_mask.unsqueeze(0)?)?;
        Ok(overlap.sum(2)?.sum(1)?)
    }

    fn joint_limit_energy(&self) -> Result<Tensor, AlignError> {
        let above = self.joints.broadcast_sub(&self.data.upper)?.relu()?;
        let below = self.data.lower.broadcast_sub(&self.joints)?.relu()?;
        Ok((above + below)?.sum(1)?)
    }
}

impl PoseModel for ArticulatedHand {
    type Posed = PosedHand;

    fn layout(&self) -> PoseLayout {
        PoseLayout::articulated(self.num_joints())
    }

    fn num_surface_points(&self) -> usize {
        self.num_points
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn set_parameters(&self, poses: &Tensor, options: PoseOptions) -> Result<PosedHand, AlignError> {
        self.layout().validate_batch("hand pose batch", poses)?;
        let data = &self.data;
        let sixd = poses.narrow(1, 3, 6)?;
        let root_rotation = if options.robust {
            robust_rotation_from_ortho6d(&sixd)?
        } else {
            rotation_from_ortho6d(&sixd)?
        };
        let root_translation = poses.narrow(1, 0, 3)?;
        let mut joints = poses.narrow(1, 9, self.num_joints())?;
        if options.retarget {
            joints = joints
                .broadcast_maximum(&data.lower)?
                .broadcast_minimum(&data.upper)?;
        }

        let mut frames: Vec<(Tensor, Tensor)> = Vec::with_capacity(self.num_joints());
        for (j, spec) in data.skeleton.joints.iter().enumerate() {
            let (parent_r, parent_t) = match spec.parent {
                Frame::Root => (&root_rotation, &root_translation),
                Frame::Joint(p) => (&frames[p].0, &frames[p].1),
            };
            let t = transform_points(&data.joint_offsets[j], parent_r, parent_t)?.squeeze(1)?;
            let r = match &data.joint_rests[j] {
                Some(rest) => parent_r.broadcast_matmul(rest)?,
                None => parent_r.clone(),
            };
            let angle = joints.narrow(1, j, 1)?.squeeze(1)?;
            let r = r.matmul(&axis_rotation(spec.axis.to_array(), &angle)?)?;
            frames.push((r, t));
        }

        let link_frames = data
            .skeleton
            .links
            .iter()
            .map(|link| match link.frame {
                Frame::Root => (root_rotation.clone(), root_translation.clone()),
                Frame::Joint(j) => frames[j].clone(),
            })
            .collect::<Vec<_>>();

        let points = data
            .surface
            .iter()
            .map(|(link, local)| {
                let (r, t) = &link_frames[*link];
                transform_points(local, r, t)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PosedHand {
            data: data.clone(),
            poses: poses.clone(),
            joints,
            points: Tensor::cat(&points, 1)?,
            link_frames,
        })
    }

    fn supports_penalty(&self, _kind: PenaltyKind) -> bool {
        true
    }

    fn save_pose(&self, poses: &Tensor, options: PoseOptions) -> Result<Vec<PoseVector>, AlignError> {
        let mut out = PoseVector::batch_from_tensor(poses, self.layout())?;
        if options.retarget {
            let limits = self.joint_limits();
            for pose in out.iter_mut() {
                pose.rotation_6d = ortho6d_from_rotation(&pose.rotation_matrix(options.robust));
                for (q, (lower, upper)) in pose.joints.iter_mut().zip(&limits) {
                    *q = q.clamp(*lower, *upper);
                }
            }
        }
        Ok(out)
    }
}
