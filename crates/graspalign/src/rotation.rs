use candle_core::{DType, Result, Tensor, D};
use glam::{DMat3, DVec3};

const EPS: f64 = 1e-8;

// Abramowitz & Stegun 4.4.46, acos(x) = sqrt(1 - x) * P(x) on [0, 1], |error| <= 2e-8.
const ACOS_COEFFS: [f64; 8] = [
    1.570_796_305_0,
    -0.214_598_801_6,
    0.088_978_987_4,
    -0.050_174_304_6,
    0.030_891_881_0,
    -0.017_088_125_6,
    0.006_670_090_1,
    -0.001_262_491_1,
];

/// Scale vectors along the last dimension to unit length.
pub fn normalize(v: &Tensor) -> Result<Tensor> {
    let norm = v.sqr()?.sum_keepdim(D::Minus1)?.affine(1.0, EPS * EPS)?.sqrt()?;
    v.broadcast_div(&norm)
}

/// Dot product along the last dimension.
pub fn dot(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    a.broadcast_mul(b)?.sum(D::Minus1)
}

/// Cross product of 3-vectors stored along the last dimension.
pub fn cross(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let a0 = a.narrow(D::Minus1, 0, 1)?;
    let a1 = a.narrow(D::Minus1, 1, 1)?;
    let a2 = a.narrow(D::Minus1, 2, 1)?;
    let b0 = b.narrow(D::Minus1, 0, 1)?;
    let b1 = b.narrow(D::Minus1, 1, 1)?;
    let b2 = b.narrow(D::Minus1, 2, 1)?;
    let c0 = (a1.mul(&b2)? - a2.mul(&b1)?)?;
    let c1 = (a2.mul(&b0)? - a0.mul(&b2)?)?;
    let c2 = (a0.mul(&b1)? - a1.mul(&b0)?)?;
    Tensor::cat(&[&c0, &c1, &c2], D::Minus1)
}

fn split_ortho6d(sixd: &Tensor) -> Result<(Tensor, Tensor)> {
    Ok((sixd.narrow(1, 0, 3)?, sixd.narrow(1, 3, 3)?))
}

/// Gram-Schmidt reconstruction of `(M, 3, 3)` rotations from `(M, 6)` inputs.
///
/// The result has the local x, y and z axes as columns.
pub fn rotation_from_ortho6d(sixd: &Tensor) -> Result<Tensor> {
    let (a, b) = split_ortho6d(sixd)?;
    let x = normalize(&a)?;
    let z = normalize(&cross(&x, &b)?)?;
    let y = cross(&z, &x)?;
    Tensor::stack(&[&x, &y, &z], 2)
}

/// Symmetric reconstruction of `(M, 3, 3)` rotations from `(M, 6)` inputs.
///
/// Both input axes contribute equally, which keeps gradients balanced when the
/// two vectors drift apart during optimization.
pub fn robust_rotation_from_ortho6d(sixd: &Tensor) -> Result<Tensor> {
    let (a, b) = split_ortho6d(sixd)?;
    let x_raw = normalize(&a)?;
    let y_raw = normalize(&b)?;
    let middle = normalize(&(&x_raw + &y_raw)?)?;
    let orthmid = normalize(&(&x_raw - &y_raw)?)?;
    let x = normalize(&(&middle + &orthmid)?)?;
    let y = normalize(&(&middle - &orthmid)?)?;
    let z = normalize(&cross(&x, &y)?)?;
    Tensor::stack(&[&x, &y, &z], 2)
}

/// Differentiable arc cosine built from elementary ops.
///
/// Inputs must lie in `[-1, 1]`; keep them away from the end points when
/// gradients are needed since the derivative diverges there.
pub fn acos(x: &Tensor) -> Result<Tensor> {
    let a = x.abs()?;
    let mut poly = a.affine(ACOS_COEFFS[7], ACOS_COEFFS[6])?;
    for coeff in ACOS_COEFFS[..6].iter().rev() {
        poly = poly.mul(&a)?.affine(1.0, *coeff)?;
    }
    let positive = a.affine(-1.0, 1.0)?.sqrt()?.mul(&poly)?;
    let negative = positive.affine(-1.0, std::f64::consts::PI)?;
    x.ge(&x.zeros_like()?)?.where_cond(&positive, &negative)
}

/// Batched Rodrigues rotation about a fixed unit `axis` by `(M,)` angles.
pub fn axis_rotation(axis: [f64; 3], angles: &Tensor) -> Result<Tensor> {
    let device = angles.device();
    let [x, y, z] = axis;
    let k = Tensor::new(
        &[
            [0.0f32, -z as f32, y as f32],
            [z as f32, 0.0, -x as f32],
            [-y as f32, x as f32, 0.0],
        ],
        device,
    )?;
    let k2 = k.matmul(&k)?;
    let eye = Tensor::eye(3, DType::F32, device)?;

    let m = angles.dim(0)?;
    let angles = angles.reshape((m, 1, 1))?;
    let sin = angles.sin()?;
    let one_minus_cos = angles.cos()?.affine(-1.0, 1.0)?;

    let r = k.unsqueeze(0)?.broadcast_mul(&sin)?;
    let r = r.broadcast_add(&k2.unsqueeze(0)?.broadcast_mul(&one_minus_cos)?)?;
    r.broadcast_add(&eye)
}

/// Transform `(M, N, 3)` points, or shared `(N, 3)` points, by `(M, 3, 3)`
/// rotations and `(M, 3)` translations.
pub fn transform_points(points: &Tensor, rotations: &Tensor, translations: &Tensor) -> Result<Tensor> {
    let m = rotations.dim(0)?;
    let points = match points.rank() {
        2 => {
            let n = points.dim(0)?;
            points.unsqueeze(0)?.broadcast_as((m, n, 3))?.contiguous()?
        }
        _ => points.clone(),
    };
    let rotated = points.matmul(&rotations.t()?.contiguous()?)?;
    rotated.broadcast_add(&translations.unsqueeze(1)?)
}

/// Copy `(M, 3, 3)` rotations to the host.
pub fn rotations_to_host(rotations: &Tensor) -> Result<Vec<DMat3>> {
    let rows = rotations.to_dtype(DType::F64)?.to_vec3::<f64>()?;
    Ok(rows
        .iter()
        .map(|r| {
            DMat3::from_cols(
                DVec3::new(r[0][0], r[1][0], r[2][0]),
                DVec3::new(r[0][1], r[1][1], r[2][1]),
                DVec3::new(r[0][2], r[1][2], r[2][2]),
            )
        })
        .collect())
}
