use glam::DVec3;

/// A point cloud with points and optional per-point colors.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    // The points in the point cloud.
    points: Vec<[f64; 3]>,
    // The colors of the points.
    colors: Option<Vec<[u8; 3]>>,
}

impl PointCloud {
    /// Create a new point cloud from points and colors (optional).
    pub fn new(points: Vec<[f64; 3]>, colors: Option<Vec<[u8; 3]>>) -> Self {
        Self { points, colors }
    }

    /// Create a point cloud from single precision rows, as produced by tensor readbacks.
    pub fn from_f32_rows(rows: &[Vec<f32>]) -> Self {
        let points = rows
            .iter()
            .filter(|row| row.len() >= 3)
            .map(|row| [row[0] as f64, row[1] as f64, row[2] as f64])
            .collect();
        Self::new(points, None)
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Get as reference the colors of the points in the point cloud.
    pub fn colors(&self) -> Option<&[[u8; 3]]> {
        self.colors.as_deref()
    }

    /// Get the minimum bound of the point cloud, `None` when empty.
    pub fn min_bound(&self) -> Option<DVec3> {
        self.points
            .iter()
            .map(|p| DVec3::from_array(*p))
            .reduce(|a, b| a.min(b))
    }

    /// Get the maximum bound of the point cloud, `None` when empty.
    pub fn max_bound(&self) -> Option<DVec3> {
        self.points
            .iter()
            .map(|p| DVec3::from_array(*p))
            .reduce(|a, b| a.max(b))
    }

    /// Mean of all points, `None` when empty.
    pub fn centroid(&self) -> Option<DVec3> {
        if self.points.is_empty() {
            return None;
        }
        let sum = self
            .points
            .iter()
            .fold(DVec3::ZERO, |acc, p| acc + DVec3::from_array(*p));
        Some(sum / self.points.len() as f64)
    }

    /// Return at most `max_points` points taken with a uniform stride.
    pub fn subsample(&self, max_points: usize) -> Vec<[f64; 3]> {
        if max_points == 0 || self.points.len() <= max_points {
            return self.points.clone();
        }
        let stride = self.points.len().div_ceil(max_points);
        self.points.iter().step_by(stride).copied().collect()
    }

    /// Apply a translation to every point in place.
    pub fn translate(&mut self, offset: [f64; 3]) {
        for p in self.points.iter_mut() {
            p[0] += offset[0];
            p[1] += offset[1];
            p[2] += offset[2];
        }
    }
}
