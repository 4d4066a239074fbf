use std::{fs::File, io::BufReader, path::Path};

use glam::{DMat3, DMat4, DVec3};
use serde::Deserialize;

use crate::transforms::{quaternion_to_matrix, rotation_vector_to_matrix};

/// Offset of the hand frame relative to the arm end effector, in meters.
const HAND_TO_EE_TRANSLATION: [f64; 3] = [0.0, -0.01, 0.247];

/// Error types for the calibration module.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    /// Error reading the file
    #[error("error reading calibration file")]
    Io(#[from] std::io::Error),

    /// Malformed YAML document
    #[error("failed to parse calibration yaml")]
    Yaml(#[from] serde_yaml::Error),

    /// The camera-to-base transform does not hold 16 numbers
    #[error("cam2base must hold 16 values, got {0}")]
    InvalidMatrixLength(usize),

    /// A matrix entry could not be parsed
    #[error("invalid number in cam2base: {0}")]
    InvalidNumber(String),
}

#[derive(Debug, Deserialize)]
struct Position {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Debug, Deserialize)]
struct Orientation {
    x: f64,
    y: f64,
    z: f64,
    w: f64,
}

#[derive(Debug, Deserialize)]
struct CameraPose {
    position: Position,
    orientation: Orientation,
}

/// The matrix is stored either as a numpy-printed string or as plain numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MatrixField {
    Text(String),
    Flat(Vec<f64>),
    Nested(Vec<Vec<f64>>),
}

#[derive(Debug, Deserialize)]
struct CalibrationYaml {
    pose: CameraPose,
    cam2base: MatrixField,
}

/// Camera-to-robot calibration.
///
/// Everything downstream of this record lives in the table (world) frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Pose of the table frame seen from the camera.
    pub table_to_camera: DMat4,
    /// Transform from the camera to the robot base.
    pub camera_to_base: DMat4,
}

impl Calibration {
    /// Read a calibration record from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let file = File::open(path)?;
        let raw: CalibrationYaml = serde_yaml::from_reader(BufReader::new(file))?;
        Self::from_raw(raw)
    }

    /// Parse a calibration record from a YAML string.
    pub fn from_yaml_str(text: &str) -> Result<Self, CalibrationError> {
        let raw: CalibrationYaml = serde_yaml::from_str(text)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: CalibrationYaml) -> Result<Self, CalibrationError> {
        let p = raw.pose.position;
        let q = raw.pose.orientation;
        let rotation = quaternion_to_matrix([q.x, q.y, q.z, q.w]);
        let table_to_camera = DMat4::from_mat3_translation(rotation, DVec3::new(p.x, p.y, p.z));

        let values = match raw.cam2base {
            MatrixField::Text(text) => parse_matrix_text(&text)?,
            MatrixField::Flat(values) => values,
            MatrixField::Nested(rows) => rows.into_iter().flatten().collect(),
        };
        let values: [f64; 16] = values
            .as_slice()
            .try_into()
            .map_err(|_| CalibrationError::InvalidMatrixLength(values.len()))?;
        // stored row-major, glam is column-major
        let camera_to_base = DMat4::from_cols_array(&values).transpose();

        Ok(Self {
            table_to_camera,
            camera_to_base,
        })
    }

    /// Transform from the robot base frame into the world frame.
    pub fn base_to_world(&self) -> DMat4 {
        self.table_to_camera.inverse() * self.camera_to_base.inverse()
    }

    /// Hand frame in world coordinates for a recorded arm pose.
    ///
    /// `arm` holds the tool position followed by its rotation vector, both in
    /// the base-link frame reported by the arm controller.
    pub fn arm_to_hand_world(&self, arm: [f64; 6]) -> DMat4 {
        let tool_in_base_link = DMat4::from_mat3_translation(
            rotation_vector_to_matrix([arm[3], arm[4], arm[5]]),
            DVec3::new(arm[0], arm[1], arm[2]),
        );
        let base_link_to_base = DMat4::from_mat3(DMat3::from_rotation_z(std::f64::consts::PI));
        let hand_to_ee = DMat4::from_mat3_translation(
            DMat3::from_rotation_z(std::f64::consts::PI),
            DVec3::from_array(HAND_TO_EE_TRANSLATION),
        );
        self.base_to_world() * base_link_to_base * tool_in_base_link * hand_to_ee
    }
}

fn parse_matrix_text(text: &str) -> Result<Vec<f64>, CalibrationError> {
    text.replace(['[', ']', ','], " ")
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| CalibrationError::InvalidNumber(token.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const IDENTITY_YAML: &str = r#"
pose:
  position: {x: 0.0, y: 0.0, z: 0.0}
  orientation: {x: 0.0, y: 0.0, z: 0.0, w: 1.0}
cam2base: "[[1. 0. 0. 0.]\n [0. 1. 0. 0.]\n [0. 0. 1. 0.]\n [0. 0. 0. 1.]]"
"#;

    #[test]
    fn test_parse_text_matrix() -> Result<(), CalibrationError> {
        let calib = Calibration::from_yaml_str(IDENTITY_YAML)?;
        assert_eq!(calib.camera_to_base, DMat4::IDENTITY);
        assert_eq!(calib.base_to_world(), DMat4::IDENTITY);
        Ok(())
    }

    #[test]
    fn test_parse_flat_matrix_row_major() -> Result<(), CalibrationError> {
        let yaml = r#"
pose:
  position: {x: 1.0, y: 2.0, z: 3.0}
  orientation: {x: 0.0, y: 0.0, z: 0.0, w: 1.0}
cam2base: [1, 0, 0, 0.5, 0, 1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1]
"#;
        let calib = Calibration::from_yaml_str(yaml)?;
        assert_relative_eq!(calib.camera_to_base.w_axis.x, 0.5);
        assert_relative_eq!(calib.table_to_camera.w_axis.z, 3.0);

        let world = calib.base_to_world();
        let origin = world.transform_point3(DVec3::ZERO);
        assert_relative_eq!(origin.x, -1.5, epsilon = 1e-12);
        assert_relative_eq!(origin.y, -2.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_invalid_matrix() {
        let yaml = IDENTITY_YAML.replace("[0. 0. 0. 1.]]", "]");
        assert!(matches!(
            Calibration::from_yaml_str(&yaml),
            Err(CalibrationError::InvalidMatrixLength(12))
        ));
    }

    #[test]
    fn test_arm_to_hand_world_identity_calibration() -> Result<(), CalibrationError> {
        let calib = Calibration::from_yaml_str(IDENTITY_YAML)?;
        let hand = calib.arm_to_hand_world([0.1, 0.2, 0.3, 0.0, 0.0, 0.0]);
        // both z flips cancel in rotation, the offset is applied in the flipped tool frame
        let t = hand.w_axis.truncate();
        assert_relative_eq!(t.x, -0.1, epsilon = 1e-12);
        assert_relative_eq!(t.y, -0.2 + 0.01, epsilon = 1e-12);
        assert_relative_eq!(t.z, 0.3 + 0.247, epsilon = 1e-12);
        assert_relative_eq!(hand.x_axis.x, 1.0, epsilon = 1e-12);
        Ok(())
    }
}
