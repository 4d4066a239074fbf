use glam::{DMat3, DVec3};
use rand::Rng;

/// An indexed triangle mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriMesh {
    /// Vertex positions.
    pub vertices: Vec<[f64; 3]>,
    /// Triangles as indices into `vertices`, counter-clockwise winding.
    pub faces: Vec<[u32; 3]>,
}

impl TriMesh {
    /// Create a mesh from vertices and faces.
    pub fn new(vertices: Vec<[f64; 3]>, faces: Vec<[u32; 3]>) -> Self {
        Self { vertices, faces }
    }

    /// Axis aligned box with the given center and half extents.
    pub fn cuboid(center: [f64; 3], half_extents: [f64; 3]) -> Self {
        let [cx, cy, cz] = center;
        let [hx, hy, hz] = half_extents;
        let mut vertices = Vec::with_capacity(8);
        for i in 0..8 {
            let sx = if i & 1 == 0 { -hx } else { hx };
            let sy = if i & 2 == 0 { -hy } else { hy };
            let sz = if i & 4 == 0 { -hz } else { hz };
            vertices.push([cx + sx, cy + sy, cz + sz]);
        }
        let faces = vec![
            // -z / +z
            [0, 2, 1],
            [1, 2, 3],
            [4, 5, 6],
            [5, 7, 6],
            // -y / +y
            [0, 1, 4],
            [1, 5, 4],
            [2, 6, 3],
            [3, 6, 7],
            // -x / +x
            [0, 4, 2],
            [2, 4, 6],
            [1, 3, 5],
            [3, 7, 5],
        ];
        Self { vertices, faces }
    }

    /// Number of triangles.
    #[inline]
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Check if the mesh has no triangles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Corners of a triangle.
    pub fn triangle(&self, index: usize) -> [DVec3; 3] {
        let [a, b, c] = self.faces[index];
        [
            DVec3::from_array(self.vertices[a as usize]),
            DVec3::from_array(self.vertices[b as usize]),
            DVec3::from_array(self.vertices[c as usize]),
        ]
    }

    /// Area of a triangle.
    pub fn triangle_area(&self, index: usize) -> f64 {
        let [a, b, c] = self.triangle(index);
        0.5 * (b - a).cross(c - a).length()
    }

    /// Total surface area.
    pub fn area(&self) -> f64 {
        (0..self.faces.len()).map(|i| self.triangle_area(i)).sum()
    }

    /// Unit normal of a triangle, zero for degenerate triangles.
    pub fn triangle_normal(&self, index: usize) -> DVec3 {
        let [a, b, c] = self.triangle(index);
        (b - a).cross(c - a).normalize_or_zero()
    }

    /// Axis aligned bounds `(min, max)`, `None` for a mesh without vertices.
    pub fn bounding_box(&self) -> Option<(DVec3, DVec3)> {
        let first = DVec3::from_array(*self.vertices.first()?);
        Some(self.vertices.iter().fold((first, first), |(lo, hi), v| {
            let v = DVec3::from_array(*v);
            (lo.min(v), hi.max(v))
        }))
    }

    /// Return a copy with every vertex mapped by `rotation * v + translation`.
    pub fn transformed(&self, rotation: &DMat3, translation: DVec3) -> Self {
        let vertices = self
            .vertices
            .iter()
            .map(|v| (*rotation * DVec3::from_array(*v) + translation).to_array())
            .collect();
        Self {
            vertices,
            faces: self.faces.clone(),
        }
    }

    /// Append another mesh, re-indexing its faces.
    pub fn append(&mut self, other: &TriMesh) {
        let offset = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.faces.extend(
            other
                .faces
                .iter()
                .map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]),
        );
    }

    /// Draw `num_points` points uniformly over the surface, weighting triangles by area.
    ///
    /// Returns an empty vector when the mesh has no area.
    pub fn sample_surface<R: Rng>(&self, num_points: usize, rng: &mut R) -> Vec<[f64; 3]> {
        let mut cumulative = Vec::with_capacity(self.faces.len());
        let mut total = 0.0;
        for i in 0..self.faces.len() {
            total += self.triangle_area(i);
            cumulative.push(total);
        }
        if total <= 0.0 {
            log::warn!("cannot sample a mesh with zero surface area ({} faces)", self.faces.len());
            return Vec::new();
        }

        (0..num_points)
            .map(|_| {
                let target = rng.random::<f64>() * total;
                let face = cumulative
                    .partition_point(|&c| c < target)
                    .min(self.faces.len() - 1);
                let [a, b, c] = self.triangle(face);
                let (mut r1, mut r2) = (rng.random::<f64>(), rng.random::<f64>());
                if r1 + r2 > 1.0 {
                    r1 = 1.0 - r1;
                    r2 = 1.0 - r2;
                }
                (a + (b - a) * r1 + (c - a) * r2).to_array()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_cuboid_area_and_bounds() {
        let mesh = TriMesh::cuboid([0.0, 0.0, 1.0], [0.5, 1.0, 0.25]);
        assert_eq!(mesh.num_faces(), 12);
        // 2 * (1*2 + 1*0.5 + 2*0.5)
        assert_relative_eq!(mesh.area(), 7.0, epsilon = 1e-12);

        let (lo, hi) = mesh.bounding_box().unwrap();
        assert_relative_eq!(lo.z, 0.75);
        assert_relative_eq!(hi.y, 1.0);
    }

    #[test]
    fn test_cuboid_normals_point_outwards() {
        let mesh = TriMesh::cuboid([0.0; 3], [1.0; 3]);
        for i in 0..mesh.num_faces() {
            let [a, b, c] = mesh.triangle(i);
            let center = (a + b + c) / 3.0;
            assert!(mesh.triangle_normal(i).dot(center) > 0.0, "face {i}");
        }
    }

    #[test]
    fn test_transform_and_append() {
        let mut mesh = TriMesh::cuboid([0.0; 3], [1.0; 3]);
        let moved = mesh.transformed(&DMat3::IDENTITY, DVec3::new(0.0, 0.0, 5.0));
        let (lo, _) = moved.bounding_box().unwrap();
        assert_relative_eq!(lo.z, 4.0);

        mesh.append(&moved);
        assert_eq!(mesh.vertices.len(), 16);
        assert_eq!(mesh.faces.last().unwrap()[0], 8 + 3);
    }

    #[test]
    fn test_sample_surface_on_mesh() {
        let mesh = TriMesh::cuboid([0.0; 3], [0.5; 3]);
        let mut rng = StdRng::seed_from_u64(7);
        let samples = mesh.sample_surface(200, &mut rng);
        assert_eq!(samples.len(), 200);
        for p in samples {
            let on_face = p.iter().any(|v| (v.abs() - 0.5).abs() < 1e-9);
            assert!(on_face, "{p:?} is not on the surface");
        }
        assert!(TriMesh::default().sample_surface(3, &mut rng).is_empty());
    }
}
