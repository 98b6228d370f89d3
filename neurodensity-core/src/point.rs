//! Point types and related functionality

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// A 3D point with floating point coordinates
pub type Point3f = Point3<f32>;

/// A 3D vector with floating point components
pub type Vector3f = Vector3<f32>;

/// A morphology sample: a position with the local branch radius.
///
/// This is the (x, y, z, radius) tuple used for both edge endpoints and
/// contour points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub position: Point3f,
    pub radius: f32,
}

impl SamplePoint {
    /// Create a sample from its four components
    pub fn new(x: f32, y: f32, z: f32, radius: f32) -> Self {
        Self {
            position: Point3f::new(x, y, z),
            radius,
        }
    }

    /// Create a sample from a position and radius
    pub fn from_position(position: Point3f, radius: f32) -> Self {
        Self { position, radius }
    }

    /// The sample as `[x, y, z, radius]`
    pub fn to_array(&self) -> [f32; 4] {
        [self.position.x, self.position.y, self.position.z, self.radius]
    }

    /// Linear interpolation between two samples, position and radius alike
    pub fn lerp(&self, other: &SamplePoint, t: f32) -> SamplePoint {
        SamplePoint {
            position: self.position + (other.position - self.position) * t,
            radius: self.radius + (other.radius - self.radius) * t,
        }
    }
}

impl Default for SamplePoint {
    fn default() -> Self {
        Self {
            position: Point3f::origin(),
            radius: 0.0,
        }
    }
}

impl From<[f32; 4]> for SamplePoint {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}
