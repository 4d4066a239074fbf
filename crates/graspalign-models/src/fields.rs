use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use graspalign::{adapter::DescriptorField, error::AlignError};
use graspalign_3d::pointcloud::PointCloud;

fn check_coords(coords: &Tensor) -> Result<(usize, usize), AlignError> {
    match coords.dims() {
        [b, n, 3] => Ok((*b, *n)),
        dims => Err(AlignError::InputShape {
            what: "descriptor coordinates",
            expected: "(B, N, 3)".to_string(),
            got: dims.to_vec(),
        }),
    }
}

/// Gaussian radial basis responses to a set of anchor points.
///
/// The descriptor of a point `x` has one entry per anchor `a_k`:
/// `exp(-|x - a_k|^2 / (2 sigma^2))`.
#[derive(Debug, Clone)]
pub struct RbfDescriptorField {
    anchors: Vec<[f64; 3]>,
    sigma: f64,
    anchors_tensor: Tensor,
}

impl RbfDescriptorField {
    /// Create a field from explicit anchors.
    pub fn new(anchors: Vec<[f64; 3]>, sigma: f64, device: &Device) -> Result<Self, AlignError> {
        if anchors.is_empty() || sigma <= 0.0 || !sigma.is_finite() {
            return Err(AlignError::InvalidConfig(format!(
                "rbf field needs anchors and a positive sigma, got {} anchors and sigma {sigma}",
                anchors.len()
            )));
        }
        let flat = anchors
            .iter()
            .flat_map(|a| a.map(|v| v as f32))
            .collect::<Vec<_>>();
        let k = anchors.len();
        Ok(Self {
            anchors_tensor: Tensor::from_vec(flat, (1, 1, k, 3), device)?,
            anchors,
            sigma,
        })
    }

    /// Use up to `max_anchors` points of a cloud as anchors.
    pub fn from_cloud(
        cloud: &PointCloud,
        max_anchors: usize,
        sigma: f64,
        device: &Device,
    ) -> Result<Self, AlignError> {
        Self::new(cloud.subsample(max_anchors), sigma, device)
    }

    /// The same field with every anchor shifted by `offset`.
    pub fn translated(&self, offset: [f64; 3]) -> Result<Self, AlignError> {
        let anchors = self
            .anchors
            .iter()
            .map(|a| [a[0] + offset[0], a[1] + offset[1], a[2] + offset[2]])
            .collect();
        Self::new(anchors, self.sigma, self.anchors_tensor.device())
    }

    /// Anchor points.
    pub fn anchors(&self) -> &[[f64; 3]] {
        &self.anchors
    }

    /// Kernel width.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl DescriptorField for RbfDescriptorField {
    fn evaluate(&self, coords: &Tensor) -> Result<Tensor, AlignError> {
        check_coords(coords)?;
        let squared = coords
            .unsqueeze(2)?
            .broadcast_sub(&self.anchors_tensor)?
            .sqr()?
            .sum(3)?;
        let scale = -1.0 / (2.0 * self.sigma * self.sigma);
        Ok(squared.affine(scale, 0.0)?.exp()?)
    }
}

/// Multi layer perceptron mapping coordinates to descriptors.
pub struct MlpDescriptorField {
    layers: Vec<Linear>,
    output_dim: usize,
}

impl MlpDescriptorField {
    /// Build the layers `3 -> hidden.. -> output_dim` from `vb` with ReLU in between.
    pub fn new(vb: VarBuilder, hidden: &[usize], output_dim: usize) -> Result<Self, AlignError> {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut input_dim = 3;
        for (i, &dim) in hidden.iter().chain(std::iter::once(&output_dim)).enumerate() {
            layers.push(candle_nn::linear(input_dim, dim, vb.pp(format!("layers.{i}")))?);
            input_dim = dim;
        }
        Ok(Self { layers, output_dim })
    }

    /// Load trained weights from a safetensors file.
    pub fn load(
        path: impl AsRef<Path>,
        hidden: &[usize],
        output_dim: usize,
        device: &Device,
    ) -> Result<Self, AlignError> {
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path.as_ref()], DType::F32, device)? };
        Self::new(vb, hidden, output_dim)
    }

    /// Descriptor length.
    pub fn output_dim(&self) -> usize {
        self.output_dim
    }
}

impl DescriptorField for MlpDescriptorField {
    fn evaluate(&self, coords: &Tensor) -> Result<Tensor, AlignError> {
        check_coords(coords)?;
        let last = self.layers.len() - 1;
        let mut x = coords.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x)?;
            if i < last {
                x = x.relu()?;
            }
        }
        Ok(x)
    }
}
