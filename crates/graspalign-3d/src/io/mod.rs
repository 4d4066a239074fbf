/// Camera-to-robot calibration records.
pub mod calibration;

/// Flat binary numeric arrays in the `.npy` format.
pub mod npy;

/// STL mesh reader and writer.
pub mod stl;
