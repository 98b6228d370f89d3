//! Axis-aligned bounding boxes

use crate::point::*;
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box given by its minimum and maximum corner.
///
/// An empty box has `min > max` on every axis, so that extending it with a
/// point yields exactly that point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point3f,
    pub max: Point3f,
}

impl BoundingBox {
    /// Create a box from two corners
    pub fn new(min: Point3f, max: Point3f) -> Self {
        Self { min, max }
    }

    /// An empty box which contains no point
    pub fn empty() -> Self {
        Self {
            min: Point3f::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Point3f::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    /// The degenerate box located at the origin
    pub fn zero() -> Self {
        Self {
            min: Point3f::origin(),
            max: Point3f::origin(),
        }
    }

    /// Smallest box containing all points, `None` for an empty iterator
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point3f>,
    {
        let mut bb = Self::empty();
        for p in points {
            bb.extend(p);
        }
        if bb.is_empty() {
            None
        } else {
            Some(bb)
        }
    }

    /// Check if the box contains no point
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grow the box to contain `point`
    pub fn extend(&mut self, point: &Point3f) {
        self.min.x = self.min.x.min(point.x);
        self.min.y = self.min.y.min(point.y);
        self.min.z = self.min.z.min(point.z);

        self.max.x = self.max.x.max(point.x);
        self.max.y = self.max.y.max(point.y);
        self.max.z = self.max.z.max(point.z);
    }

    /// Smallest box containing both boxes
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let mut bb = *self;
        bb.extend(&other.min);
        bb.extend(&other.max);
        bb
    }

    /// Midpoint of the box
    pub fn center(&self) -> Point3f {
        Point3f::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
            (self.min.z + self.max.z) / 2.0,
        )
    }

    /// Edge lengths of the box along each axis
    pub fn extent(&self) -> Vector3f {
        if self.is_empty() {
            return Vector3f::zeros();
        }
        self.max - self.min
    }

    /// Largest edge length, e.g. for a bounding cube
    pub fn max_extent(&self) -> f32 {
        self.extent().max()
    }

    /// Box with both corners multiplied by `factor`
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            min: Point3f::from(self.min.coords * factor),
            max: Point3f::from(self.max.coords * factor),
        }
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}
