//! Final assembly of extracted triangles into an [`IsosurfaceMesh`]
//!
//! Normals are generated from the triangle soup: coincident vertices are
//! welded, and every triangle corner averages the angle-weighted normals of
//! the incident faces that lie within the crease angle of its own face.

use crate::parallel;
use neurodensity_core::{IsosurfaceMesh, Point3f, Vector3f};
use std::collections::HashMap;

/// Default crease angle in degrees
pub const DEFAULT_CREASE_ANGLE: f32 = 44.0;

/// Attaches vertex normals to extracted triangles
#[derive(Debug, Clone)]
pub struct MeshAssembler {
    crease_angle: f32,
}

impl MeshAssembler {
    pub fn new() -> Self {
        Self {
            crease_angle: DEFAULT_CREASE_ANGLE,
        }
    }

    /// Faces meeting at more than `degrees` keep separate normals
    pub fn with_crease_angle(mut self, degrees: f32) -> Self {
        self.crease_angle = degrees;
        self
    }

    pub fn crease_angle(&self) -> f32 {
        self.crease_angle
    }

    /// Replace the normals of `mesh`; an empty mesh is left untouched
    pub fn apply(&self, mesh: &mut IsosurfaceMesh) {
        if mesh.is_empty() {
            return;
        }
        let normals = generate_vertex_normals(&mesh.vertices, self.crease_angle);
        mesh.set_normals(normals);
    }
}

impl Default for MeshAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Bit pattern of a position with negative zero folded into zero
fn weld_key(p: &Point3f) -> [u32; 3] {
    [p.x, p.y, p.z].map(|c| (c + 0.0).to_bits())
}

/// Interior angle of a triangle at `corner`
fn corner_angle(triangle: &[Point3f], corner: usize) -> f32 {
    let p = triangle[corner];
    let a = (triangle[(corner + 1) % 3] - p).try_normalize(1e-12);
    let b = (triangle[(corner + 2) % 3] - p).try_normalize(1e-12);
    match (a, b) {
        (Some(a), Some(b)) => a.dot(&b).clamp(-1.0, 1.0).acos(),
        _ => 0.0,
    }
}

/// Per-vertex normals for a triangle soup, parallel to `vertices`.
///
/// A trailing partial triangle gets no normals.
pub fn generate_vertex_normals(vertices: &[Point3f], crease_angle: f32) -> Vec<Vector3f> {
    let triangles: Vec<&[Point3f]> = vertices.chunks_exact(3).collect();

    let face_normals: Vec<Option<Vector3f>> = parallel::parallel_map(&triangles, |t| {
        (t[1] - t[0]).cross(&(t[2] - t[0])).try_normalize(1e-12)
    });
    let angles: Vec<[f32; 3]> = parallel::parallel_map(&triangles, |t| {
        [corner_angle(t, 0), corner_angle(t, 1), corner_angle(t, 2)]
    });

    // Weld coincident corners and record the faces around each position
    let mut welded: HashMap<[u32; 3], usize> = HashMap::new();
    let mut incident: Vec<Vec<(usize, usize)>> = Vec::new();
    let mut corner_ids = Vec::with_capacity(triangles.len() * 3);
    for (face, triangle) in triangles.iter().enumerate() {
        for (corner, p) in triangle.iter().enumerate() {
            let next = welded.len();
            let id = *welded.entry(weld_key(p)).or_insert(next);
            if id == incident.len() {
                incident.push(Vec::new());
            }
            incident[id].push((face, corner));
            corner_ids.push(id);
        }
    }

    let cos_crease = crease_angle.to_radians().cos();
    parallel::parallel_map_indexed(&corner_ids, |i, id| {
        let face = i / 3;
        let around = &incident[*id];

        let Some(own) = face_normals[face] else {
            // Degenerate face: borrow the mean of the faces around it
            let mean: Vector3f = around
                .iter()
                .filter_map(|(f, c)| face_normals[*f].map(|n| n * angles[*f][*c]))
                .sum();
            return mean.try_normalize(1e-12).unwrap_or_else(Vector3f::z);
        };

        let smooth: Vector3f = around
            .iter()
            .filter_map(|(f, c)| {
                face_normals[*f]
                    .filter(|n| n.dot(&own) >= cos_crease)
                    .map(|n| n * angles[*f][*c])
            })
            .sum();
        smooth.try_normalize(1e-12).unwrap_or(own)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quad() -> Vec<Point3f> {
        vec![
            Point3f::new(0.0, 0.0, 0.5),
            Point3f::new(1.0, 0.0, 0.5),
            Point3f::new(1.0, 1.0, 0.5),
            Point3f::new(0.0, 0.0, 0.5),
            Point3f::new(1.0, 1.0, 0.5),
            Point3f::new(0.0, 1.0, 0.5),
        ]
    }

    /// Two faces sharing the edge (0,0,0)-(0,1,0) with the given dihedral opening
    fn hinge(fold: f32) -> Vec<Point3f> {
        let (s, c) = fold.to_radians().sin_cos();
        vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
            Point3f::new(-c, 0.0, s),
        ]
    }

    #[test]
    fn test_flat_quad_normals() {
        let mut mesh = IsosurfaceMesh::from_vertices(quad());
        MeshAssembler::new().apply(&mut mesh);
        assert!(mesh.has_normals());
        for n in &mesh.normals {
            assert_relative_eq!(*n, Vector3f::z(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_sharp_edge_keeps_face_normals() {
        // Faces meet at 90 degrees
        let normals = generate_vertex_normals(&hinge(90.0), DEFAULT_CREASE_ANGLE);
        assert_relative_eq!(normals[0], Vector3f::z(), epsilon = 1e-6);
        assert_relative_eq!(normals[3], Vector3f::new(1.0, 0.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_gentle_edge_is_smoothed() {
        // Faces meet at 20 degrees
        let normals = generate_vertex_normals(&hinge(20.0), DEFAULT_CREASE_ANGLE);
        assert_relative_eq!(normals[0], normals[3], epsilon = 1e-6);
        assert_relative_eq!(normals[2], normals[4], epsilon = 1e-6);
        assert_relative_eq!(normals[0].magnitude(), 1.0, epsilon = 1e-6);
        assert!(normals[0].x > 0.0 && normals[0].z > 0.0);
        // Unshared corners keep their face normal
        assert_relative_eq!(normals[1], Vector3f::z(), epsilon = 1e-6);
    }

    #[test]
    fn test_degenerate_triangle_gets_unit_normal() {
        let mut vertices = quad();
        vertices.extend([Point3f::new(5.0, 5.0, 5.0); 3]);
        let normals = generate_vertex_normals(&vertices, DEFAULT_CREASE_ANGLE);
        assert_eq!(normals.len(), 9);
        assert_relative_eq!(normals[8], Vector3f::z(), epsilon = 1e-6);
    }

    #[test]
    fn test_crease_angle_and_empty_mesh() {
        let assembler = MeshAssembler::new().with_crease_angle(100.0);
        assert_eq!(assembler.crease_angle(), 100.0);

        // A 90 degree fold is smoothed once the crease angle exceeds it
        let mut mesh = IsosurfaceMesh::from_vertices(hinge(90.0));
        assembler.apply(&mut mesh);
        assert_relative_eq!(mesh.normals[0], mesh.normals[3], epsilon = 1e-6);

        let mut empty = IsosurfaceMesh::new();
        assembler.apply(&mut empty);
        assert!(!empty.has_normals());
    }
}
