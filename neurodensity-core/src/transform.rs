//! 3D transformation utilities

use nalgebra::{Matrix4, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// An affine transformation applied to mesh vertices and morphology samples.
///
/// Conversions between world and working coordinates are always a uniform
/// scale followed by a translation, so the constructors are limited to those.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub matrix: Matrix4<f32>,
}

impl Transform3D {
    /// Create an identity transformation
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Create a translation transformation
    pub fn translation(translation: Vector3<f32>) -> Self {
        Self {
            matrix: Matrix4::new_translation(&translation),
        }
    }

    /// Create a uniform scaling transformation
    pub fn uniform_scaling(scale: f32) -> Self {
        Self {
            matrix: Matrix4::new_scaling(scale),
        }
    }

    /// Apply the transformation to a point
    pub fn transform_point(&self, point: &Point3<f32>) -> Point3<f32> {
        let homogeneous = self.matrix * point.to_homogeneous();
        Point3::from_homogeneous(homogeneous).unwrap_or(*point)
    }

    /// Apply the linear part of the transformation to a vector
    pub fn transform_vector(&self, vector: &Vector3<f32>) -> Vector3<f32> {
        self.matrix.fixed_view::<3, 3>(0, 0) * vector
    }

    /// Compose this transformation with another (`other` is applied first)
    pub fn compose(self, other: Self) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
        }
    }

    /// Get the inverse transformation
    pub fn inverse(self) -> Option<Self> {
        self.matrix.try_inverse().map(|inv_matrix| Self {
            matrix: inv_matrix,
        })
    }

    /// Check if this is approximately the identity transformation
    pub fn is_identity(&self, epsilon: f32) -> bool {
        let identity = Matrix4::identity();
        (self.matrix - identity).norm() < epsilon
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for Transform3D {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        self.compose(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scale_then_translate() {
        let scale = Transform3D::uniform_scaling(0.01);
        let shift = Transform3D::translation(Vector3::new(1.0, -2.0, 0.5));
        let combined = shift * scale;

        let p = combined.transform_point(&Point3::new(100.0, 200.0, 300.0));
        assert_relative_eq!(p.x, 2.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(p.z, 3.5, epsilon = 1e-5);
    }

    #[test]
    fn test_inverse_round_trip() {
        let t = Transform3D::translation(Vector3::new(3.0, 4.0, 5.0)) * Transform3D::uniform_scaling(2.0);
        let inv = t.inverse().unwrap();
        assert!((t * inv).is_identity(1e-5));
    }

    #[test]
    fn test_vector_ignores_translation() {
        let t = Transform3D::translation(Vector3::new(3.0, 4.0, 5.0));
        let v = t.transform_vector(&Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(v, Vector3::new(0.0, 0.0, 1.0));
    }
}
