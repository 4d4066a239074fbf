use glam::{DMat3, DQuat, DVec3};

const EPS: f64 = 1e-8;

// `|sin x|` within this of one is treated as gimbal lock
const GIMBAL_EPS: f64 = 1e-6;

/// Compute the rotation matrix from an axis and angle.
///
/// # Arguments
///
/// * `axis` - The axis of rotation.
/// * `angle` - The angle of rotation.
///
/// # Returns
///
/// The rotation matrix in row-major order.
///
/// Example:
///
/// ```
/// use graspalign_3d::transforms::axis_angle_to_rotation_matrix;
///
/// let axis = [1.0, 0.0, 0.0];
/// let angle = std::f64::consts::PI / 2.0;
/// let rotation = axis_angle_to_rotation_matrix(&axis, angle).unwrap();
/// assert!((rotation[1][2] + 1.0).abs() < 1e-12);
/// ```
pub fn axis_angle_to_rotation_matrix(
    axis: &[f64; 3],
    angle: f64,
) -> Result<[[f64; 3]; 3], &'static str> {
    let axis = DVec3::from_array(*axis);
    if axis.length() < 1e-10 {
        return Err("cannot compute rotation matrix from a zero vector");
    }
    Ok(mat3_to_rows(&DMat3::from_axis_angle(axis.normalize(), angle)))
}

/// Convert a rotation vector (axis scaled by angle) into a rotation matrix.
pub fn rotation_vector_to_matrix(rotvec: [f64; 3]) -> DMat3 {
    let v = DVec3::from_array(rotvec);
    let angle = v.length();
    if angle < 1e-12 {
        return DMat3::IDENTITY;
    }
    DMat3::from_axis_angle(v / angle, angle)
}

/// Convert a quaternion given as `[x, y, z, w]` into a rotation matrix.
pub fn quaternion_to_matrix(xyzw: [f64; 4]) -> DMat3 {
    let q = DQuat::from_xyzw(xyzw[0], xyzw[1], xyzw[2], xyzw[3]).normalize();
    DMat3::from_quat(q)
}

/// Build a matrix from row-major nested arrays.
pub fn rows_to_mat3(rows: &[[f64; 3]; 3]) -> DMat3 {
    DMat3::from_cols_array_2d(rows).transpose()
}

/// Export a matrix as row-major nested arrays.
pub fn mat3_to_rows(m: &DMat3) -> [[f64; 3]; 3] {
    m.transpose().to_cols_array_2d()
}

fn normalize_eps(v: DVec3) -> DVec3 {
    v / (v.length() + EPS)
}

/// Rebuild a rotation matrix from its 6D representation.
///
/// The first three entries are the local x axis and the next three the local y
/// axis, both expressed in the world frame; they need not be unit or orthogonal.
/// With `robust` the two axes are treated symmetrically instead of giving
/// priority to the x axis.
pub fn rotation_from_ortho6d(sixd: &[f64; 6], robust: bool) -> DMat3 {
    let a = DVec3::new(sixd[0], sixd[1], sixd[2]);
    let b = DVec3::new(sixd[3], sixd[4], sixd[5]);
    let (x, y) = if robust {
        let x_raw = normalize_eps(a);
        let y_raw = normalize_eps(b);
        let middle = normalize_eps(x_raw + y_raw);
        let orthmid = normalize_eps(x_raw - y_raw);
        (
            normalize_eps(middle + orthmid),
            normalize_eps(middle - orthmid),
        )
    } else {
        let x = normalize_eps(a);
        let z = normalize_eps(x.cross(b));
        (x, z.cross(x))
    };
    let z = normalize_eps(x.cross(y));
    DMat3::from_cols(x, y, z)
}

/// The 6D representation of a rotation matrix: its first two columns.
pub fn ortho6d_from_rotation(m: &DMat3) -> [f64; 6] {
    [
        m.x_axis.x, m.x_axis.y, m.x_axis.z, m.y_axis.x, m.y_axis.y, m.y_axis.z,
    ]
}

/// Wrap an angle into `(-pi, pi]`.
pub fn wrap_angle(angle: f64) -> f64 {
    use std::f64::consts::PI;
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// Rotation for extrinsic `zxy` Euler angles `[z, x, y]`, i.e. `Ry * Rx * Rz`.
pub fn rotation_from_euler_zxy(angles: [f64; 3]) -> DMat3 {
    DMat3::from_rotation_y(angles[2]) * DMat3::from_rotation_x(angles[1]) * DMat3::from_rotation_z(angles[0])
}

/// Decompose a rotation into extrinsic `zxy` Euler angles `[z, x, y]`.
///
/// The middle angle lies in `[-pi/2, pi/2]`. At gimbal lock the last angle is
/// set to zero and the first one absorbs the remaining rotation.
pub fn euler_zxy_from_rotation(m: &DMat3) -> [f64; 3] {
    // r(i, j) is row i, column j
    let r = |i: usize, j: usize| m.col(j)[i];
    let sin_x = (-r(1, 2)).clamp(-1.0, 1.0);
    let x = sin_x.asin();
    if sin_x.abs() < 1.0 - GIMBAL_EPS {
        let z = r(1, 0).atan2(r(1, 1));
        let y = r(0, 2).atan2(r(2, 2));
        [z, x, y]
    } else {
        let z = (-r(0, 1)).atan2(r(0, 0));
        [z, x, 0.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn assert_mat_eq(a: &DMat3, b: &DMat3, eps: f64) {
        for j in 0..3 {
            for i in 0..3 {
                assert_relative_eq!(a.col(j)[i], b.col(j)[i], epsilon = eps);
            }
        }
    }

    #[test]
    fn test_axis_angle_to_rotation_matrix() -> Result<(), Box<dyn std::error::Error>> {
        let axis = [1.0, 0.0, 0.0];
        let rotation = axis_angle_to_rotation_matrix(&axis, FRAC_PI_2)?;
        let expected = [[1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]];
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(rotation[i][j], expected[i][j], epsilon = 1e-12);
            }
        }
        assert!(axis_angle_to_rotation_matrix(&[0.0; 3], 1.0).is_err());
        Ok(())
    }

    #[test]
    fn test_rotation_vector_and_quaternion_agree() {
        let rotvec = [0.0, 0.0, PI / 3.0];
        let from_rotvec = rotation_vector_to_matrix(rotvec);
        let half = PI / 6.0;
        let from_quat = quaternion_to_matrix([0.0, 0.0, half.sin(), half.cos()]);
        assert_mat_eq(&from_rotvec, &from_quat, 1e-12);
        assert_eq!(rotation_vector_to_matrix([0.0; 3]), DMat3::IDENTITY);
    }

    #[test]
    fn test_ortho6d_round_trip() {
        let m = rotation_from_euler_zxy([0.3, -0.4, 1.1]);
        let sixd = ortho6d_from_rotation(&m);
        assert_mat_eq(&rotation_from_ortho6d(&sixd, true), &m, 1e-6);
        assert_mat_eq(&rotation_from_ortho6d(&sixd, false), &m, 1e-6);
    }

    #[test]
    fn test_ortho6d_orthonormalizes() {
        let m = rotation_from_ortho6d(&[2.0, 0.1, 0.0, 0.3, 3.0, 0.0], true);
        assert_relative_eq!(m.determinant(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(m.x_axis.dot(m.y_axis), 0.0, epsilon = 1e-6);
        assert_relative_eq!(m.z_axis.z, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_euler_zxy_round_trip() {
        let angles = [0.7, 0.2, -1.3];
        let m = rotation_from_euler_zxy(angles);
        let decomposed = euler_zxy_from_rotation(&m);
        for k in 0..3 {
            assert_relative_eq!(decomposed[k], angles[k], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_euler_zxy_gimbal_lock() {
        // rows [0,-1,0], [0,0,1], [-1,0,0] sit exactly at x = -pi/2
        let m = rows_to_mat3(&[[0.0, -1.0, 0.0], [0.0, 0.0, 1.0], [-1.0, 0.0, 0.0]]);
        let angles = euler_zxy_from_rotation(&m);
        assert_relative_eq!(angles[0], FRAC_PI_2, epsilon = 1e-9);
        assert_relative_eq!(angles[1], -FRAC_PI_2, epsilon = 1e-9);
        assert_relative_eq!(angles[2], 0.0, epsilon = 1e-9);
        assert_mat_eq(&rotation_from_euler_zxy(angles), &m, 1e-9);
    }

    #[test]
    fn test_wrap_angle() {
        assert_relative_eq!(wrap_angle(3.0 * PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-0.5), -0.5, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(2.0 * PI + 0.25), 0.25, epsilon = 1e-12);
    }
}
