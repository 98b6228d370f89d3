//! Flat scalar field handed to isosurface extraction

use crate::density::Density;
use itertools::iproduct;
use neurodensity_core::{BoundingBox, Error, Point3f, Result, Vector3f};

/// Dense scalar samples on a regular grid.
///
/// Values are stored with x varying fastest, then y, then z.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    values: Vec<f32>,
    dimensions: [usize; 3],
    voxel_size: Vector3f,
    bounding_box: BoundingBox,
    center: Point3f,
    dimension: Vector3f,
}

impl ScalarField {
    /// Create a field, checking that `values` covers the whole grid
    pub fn new(
        values: Vec<f32>,
        dimensions: [usize; 3],
        voxel_size: Vector3f,
        bounding_box: BoundingBox,
    ) -> Result<Self> {
        let expected = dimensions.iter().product::<usize>();
        if values.len() != expected {
            return Err(Error::GridSizeMismatch {
                dimensions,
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            values,
            dimensions,
            voxel_size,
            center: bounding_box.center(),
            dimension: bounding_box.extent(),
            bounding_box,
        })
    }

    /// Flatten a density grid, keeping its geometry descriptors
    pub fn from_density(density: &Density) -> Result<Self> {
        let [nx, ny, nz] = density.dimensions();
        let grid = density.values();
        let values = iproduct!(0..nz, 0..ny, 0..nx)
            .map(|(z, y, x)| grid[[x, y, z]])
            .collect();

        let mut field = Self::new(values, [nx, ny, nz], density.voxel_size(), density.bounding_box())?;
        field.center = density.center();
        field.dimension = density.dimension();
        Ok(field)
    }

    /// Sample `f` at every grid node
    pub fn from_fn<F>(
        dimensions: [usize; 3],
        voxel_size: Vector3f,
        origin: Point3f,
        f: F,
    ) -> Self
    where
        F: Fn(usize, usize, usize) -> f32,
    {
        let [nx, ny, nz] = dimensions;
        let values = iproduct!(0..nz, 0..ny, 0..nx)
            .map(|(z, y, x)| f(x, y, z))
            .collect::<Vec<_>>();
        let max = origin
            + Vector3f::new(
                nx.saturating_sub(1) as f32 * voxel_size.x,
                ny.saturating_sub(1) as f32 * voxel_size.y,
                nz.saturating_sub(1) as f32 * voxel_size.z,
            );
        let bounding_box = BoundingBox::new(origin, max);
        Self {
            values,
            dimensions,
            voxel_size,
            center: bounding_box.center(),
            dimension: bounding_box.extent(),
            bounding_box,
        }
    }

    /// Flat index of grid node `(x, y, z)`
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.dimensions[0] * (y + self.dimensions[1] * z)
    }

    /// Value at a grid node; panics outside the grid
    #[inline]
    pub fn value(&self, x: usize, y: usize, z: usize) -> f32 {
        self.values[self.index(x, y, z)]
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        let [nx, ny, nz] = self.dimensions;
        if x < nx && y < ny && z < nz {
            Some(self.value(x, y, z))
        } else {
            None
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimensions(&self) -> [usize; 3] {
        self.dimensions
    }

    pub fn voxel_size(&self) -> Vector3f {
        self.voxel_size
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    pub fn center(&self) -> Point3f {
        self.center
    }

    pub fn dimension(&self) -> Vector3f {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of grid cubes along each axis
    pub fn cube_counts(&self) -> [usize; 3] {
        self.dimensions.map(|n| n.saturating_sub(1))
    }
}
