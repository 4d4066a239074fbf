use std::path::Path;

use ndarray::Array2;
use ndarray_npy::{read_npy, write_npy};

/// Error types for the npy module.
#[derive(Debug, thiserror::Error)]
pub enum NpyError {
    /// Failed to write the array
    #[error("failed to write npy file")]
    Write(#[from] ndarray_npy::WriteNpyError),

    /// Failed to read the array
    #[error("failed to read npy file")]
    Read(#[from] ndarray_npy::ReadNpyError),

    /// Rows of different lengths cannot form a matrix
    #[error("row {row} has {got} columns, expected {expected}")]
    RaggedRows {
        /// Index of the offending row.
        row: usize,
        /// Columns of the first row.
        expected: usize,
        /// Columns of the offending row.
        got: usize,
    },

    /// Invalid array shape
    #[error("invalid array shape")]
    Shape(#[from] ndarray::ShapeError),
}

/// Write equally sized rows as a 2D `float64` array.
pub fn write_rows_npy(path: impl AsRef<Path>, rows: &[Vec<f64>]) -> Result<(), NpyError> {
    let cols = rows.first().map_or(0, |r| r.len());
    let mut flat = Vec::with_capacity(rows.len() * cols);
    for (row, values) in rows.iter().enumerate() {
        if values.len() != cols {
            return Err(NpyError::RaggedRows {
                row,
                expected: cols,
                got: values.len(),
            });
        }
        flat.extend_from_slice(values);
    }
    let array = Array2::from_shape_vec((rows.len(), cols), flat)?;
    write_npy(path, &array)?;
    Ok(())
}

/// Read a 2D `float64` array back as rows.
pub fn read_rows_npy(path: impl AsRef<Path>) -> Result<Vec<Vec<f64>>, NpyError> {
    let array: Array2<f64> = read_npy(path)?;
    Ok(array.rows().into_iter().map(|r| r.to_vec()).collect())
}

/// Write 3D points as an `N x 3` array.
pub fn write_points_npy(path: impl AsRef<Path>, points: &[[f64; 3]]) -> Result<(), NpyError> {
    let flat = points.iter().flatten().copied().collect::<Vec<_>>();
    let array = Array2::from_shape_vec((points.len(), 3), flat)?;
    write_npy(path, &array)?;
    Ok(())
}
