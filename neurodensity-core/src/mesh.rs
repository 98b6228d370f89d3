//! Isosurface mesh data structures

use crate::point::*;
use serde::{Deserialize, Serialize};

/// A triangle soup with per-vertex normals.
///
/// Every three consecutive vertices form one triangle; `normals` is either
/// empty or parallel to `vertices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsosurfaceMesh {
    pub vertices: Vec<Point3f>,
    pub normals: Vec<Vector3f>,
    pub color: Option<[u8; 3]>,
}

impl IsosurfaceMesh {
    /// Create a new empty mesh
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            normals: Vec::new(),
            color: None,
        }
    }

    /// Create a mesh from triangle-ordered vertices.
    ///
    /// A trailing partial triangle is dropped.
    pub fn from_vertices(mut vertices: Vec<Point3f>) -> Self {
        let whole = vertices.len() - vertices.len() % 3;
        vertices.truncate(whole);
        Self {
            vertices,
            normals: Vec::new(),
            color: None,
        }
    }

    /// Get the number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Get the number of triangles
    pub fn triangle_count(&self) -> usize {
        self.vertices.len() / 3
    }

    /// Check if the mesh is empty
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Check whether a normal is attached to every vertex
    pub fn has_normals(&self) -> bool {
        !self.vertices.is_empty() && self.normals.len() == self.vertices.len()
    }

    /// Set vertex normals
    pub fn set_normals(&mut self, normals: Vec<Vector3f>) {
        if normals.len() == self.vertices.len() {
            self.normals = normals;
        }
    }

    /// Set a uniform color
    pub fn set_color(&mut self, color: Option<[u8; 3]>) {
        self.color = color;
    }
}

impl Default for IsosurfaceMesh {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> IsosurfaceMesh {
        IsosurfaceMesh::from_vertices(vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
        ])
    }

    #[test]
    fn test_triangle_soup_counts() {
        let mesh = quad();
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.triangle_count(), 2);
        assert!(!mesh.has_normals());
    }

    #[test]
    fn test_partial_triangle_dropped() {
        let mesh = IsosurfaceMesh::from_vertices(vec![Point3f::origin(); 4]);
        assert_eq!(mesh.vertex_count(), 3);
    }

    #[test]
    fn test_set_normals_requires_matching_length() {
        let mut mesh = quad();
        mesh.set_normals(vec![Vector3f::z(); 2]);
        assert!(!mesh.has_normals());
        mesh.set_normals(vec![Vector3f::z(); 6]);
        assert!(mesh.has_normals());
    }
}
