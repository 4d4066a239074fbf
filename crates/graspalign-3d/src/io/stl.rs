use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::mesh::TriMesh;

/// STL binary header size in bytes.
const HEADER_SIZE: usize = 80;

/// Size of one triangle in binary STL (normal + 3 vertices + attribute).
const TRIANGLE_SIZE: usize = 50;

/// Error types for the STL module.
#[derive(Debug, thiserror::Error)]
pub enum StlError {
    /// Error reading or writing file
    #[error("error reading or writing STL file")]
    Io(#[from] std::io::Error),

    /// The file ended before all announced triangles were read
    #[error("truncated STL file: expected {expected} triangles, got {got}")]
    Truncated {
        /// Triangle count announced in the header.
        expected: u32,
        /// Triangles actually present.
        got: u32,
    },

    /// The mesh has more triangles than the format can index
    #[error("mesh has too many triangles for STL: {0}")]
    TooManyTriangles(usize),
}

/// Write a mesh as a binary STL file.
///
/// Facet normals are recomputed from the winding of each triangle.
pub fn write_stl_binary(path: impl AsRef<Path>, mesh: &TriMesh) -> Result<(), StlError> {
    let count =
        u32::try_from(mesh.num_faces()).map_err(|_| StlError::TooManyTriangles(mesh.num_faces()))?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let mut header = [0u8; HEADER_SIZE];
    let tag = b"graspalign binary stl";
    header[..tag.len()].copy_from_slice(tag);
    writer.write_all(&header)?;
    writer.write_all(&count.to_le_bytes())?;

    for i in 0..mesh.num_faces() {
        let normal = mesh.triangle_normal(i);
        write_vec3(&mut writer, normal.to_array())?;
        for corner in mesh.triangle(i) {
            write_vec3(&mut writer, corner.to_array())?;
        }
        writer.write_all(&0u16.to_le_bytes())?;
    }
    writer.flush()?;

    Ok(())
}

fn write_vec3<W: Write>(writer: &mut W, v: [f64; 3]) -> Result<(), StlError> {
    for c in v {
        writer.write_all(&(c as f32).to_le_bytes())?;
    }
    Ok(())
}

/// Read a binary STL file.
///
/// STL stores a triangle soup, so the returned mesh has three vertices per face.
pub fn read_stl_binary(path: impl AsRef<Path>) -> Result<TriMesh, StlError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; HEADER_SIZE + 4];
    reader.read_exact(&mut header)?;
    let face_count = u32::from_le_bytes([
        header[HEADER_SIZE],
        header[HEADER_SIZE + 1],
        header[HEADER_SIZE + 2],
        header[HEADER_SIZE + 3],
    ]);

    let mut mesh = TriMesh::new(
        Vec::with_capacity(face_count as usize * 3),
        Vec::with_capacity(face_count as usize),
    );

    let mut buffer = [0u8; TRIANGLE_SIZE];
    for i in 0..face_count {
        if reader.read_exact(&mut buffer).is_err() {
            return Err(StlError::Truncated {
                expected: face_count,
                got: i,
            });
        }
        // skip the stored normal, it is recomputed on demand
        let base = mesh.vertices.len() as u32;
        for k in 0..3 {
            let offset = 12 + 12 * k;
            mesh.vertices.push(read_vec3(&buffer[offset..offset + 12]));
        }
        mesh.faces.push([base, base + 1, base + 2]);
    }

    Ok(mesh)
}

fn read_vec3(buf: &[u8]) -> [f64; 3] {
    let read = |o: usize| f32::from_le_bytes([buf[o], buf[o + 1], buf[o + 2], buf[o + 3]]) as f64;
    [read(0), read(4), read(8)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_write_read_stl() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("box.stl");

        let mesh = TriMesh::cuboid([0.0, 0.0, 0.5], [0.25, 0.5, 0.5]);
        write_stl_binary(&path, &mesh)?;

        let size = std::fs::metadata(&path)?.len() as usize;
        assert_eq!(size, HEADER_SIZE + 4 + TRIANGLE_SIZE * mesh.num_faces());

        let loaded = read_stl_binary(&path)?;
        assert_eq!(loaded.num_faces(), 12);
        assert_eq!(loaded.vertices.len(), 36);
        assert_relative_eq!(loaded.area(), mesh.area(), epsilon = 1e-6);

        let (lo, hi) = loaded.bounding_box().unwrap();
        assert_relative_eq!(lo.z, 0.0, epsilon = 1e-6);
        assert_relative_eq!(hi.z, 1.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_truncated_stl() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("short.stl");

        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; TRIANGLE_SIZE]);
        std::fs::write(&path, bytes)?;

        match read_stl_binary(&path) {
            Err(StlError::Truncated { expected, got }) => {
                assert_eq!(expected, 2);
                assert_eq!(got, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }
}
