//! Configuration for density construction and isosurface extraction

use crate::density::Normalization;
use nalgebra::Vector3;
use neurodensity_core::{Compartment, Error, Result};
use serde::{Deserialize, Serialize};

/// Default working-to-world scale factor
pub const DEFAULT_SCALE: f32 = 0.01;

/// Edge lengths of one voxel in working units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelSize {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl VoxelSize {
    /// Smallest accepted edge length
    pub const MIN: u32 = 1;
    /// Largest accepted edge length
    pub const MAX: u32 = 100;

    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Cubic voxels
    pub fn cube(edge: u32) -> Self {
        Self::new(edge, edge, edge)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("width", self.width), ("height", self.height), ("depth", self.depth)] {
            if !(Self::MIN..=Self::MAX).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "Voxel {} must be in [{}, {}], got {}",
                    name,
                    Self::MIN,
                    Self::MAX,
                    value
                )));
            }
        }
        Ok(())
    }

    /// The edge lengths as a vector
    pub fn to_vector(&self) -> Vector3<f32> {
        Vector3::new(self.width as f32, self.height as f32, self.depth as f32)
    }
}

impl Default for VoxelSize {
    fn default() -> Self {
        Self::cube(10)
    }
}

fn validate_scale(scale: f32) -> Result<()> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(Error::InvalidConfig(format!(
            "Scale factor must be finite and positive, got {}",
            scale
        )));
    }
    Ok(())
}

/// Configuration of the density field builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityConfig {
    /// Voxel edge lengths in working units
    pub voxel_size: VoxelSize,
    /// Only trees of this compartment contribute
    pub compartment: Compartment,
    /// Representation key resolved through the strategy registry
    pub strategy: String,
    /// Working coordinates are world coordinates divided by this factor
    pub scale: f32,
    /// Post-processing applied to the raw accumulated values
    pub normalization: Normalization,
}

impl DensityConfig {
    pub fn with_voxel_size(mut self, voxel_size: VoxelSize) -> Self {
        self.voxel_size = voxel_size;
        self
    }

    pub fn with_compartment(mut self, compartment: Compartment) -> Self {
        self.compartment = compartment;
        self
    }

    pub fn with_strategy(mut self, key: impl Into<String>) -> Self {
        self.strategy = key.into();
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.voxel_size.validate()?;
        validate_scale(self.scale)?;
        if self.strategy.trim().is_empty() {
            return Err(Error::InvalidConfig("Strategy key must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            voxel_size: VoxelSize::default(),
            compartment: Compartment::All,
            strategy: "schematic".to_string(),
            scale: DEFAULT_SCALE,
            normalization: Normalization::None,
        }
    }
}

/// Configuration for Marching Cubes algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarchingCubesConfig {
    /// Isosurface level (scalar value to extract)
    pub iso_level: f32,
    /// Working-to-world scale factor applied to the extracted vertices
    pub scale: f32,
    /// Number of z-segments extracted in parallel (None = one per logical CPU)
    pub num_threads: Option<usize>,
    /// Whether to compute vertex normals
    pub compute_normals: bool,
    /// Maximum angle in degrees between face and vertex normal for smoothing
    pub crease_angle: f32,
}

impl MarchingCubesConfig {
    pub fn with_iso_level(mut self, iso_level: f32) -> Self {
        self.iso_level = iso_level;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn with_normals(mut self, compute_normals: bool) -> Self {
        self.compute_normals = compute_normals;
        self
    }

    pub fn with_crease_angle(mut self, degrees: f32) -> Self {
        self.crease_angle = degrees;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.iso_level.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "Iso level must be finite, got {}",
                self.iso_level
            )));
        }
        validate_scale(self.scale)?;
        if self.num_threads == Some(0) {
            return Err(Error::InvalidConfig("Thread count must be positive".to_string()));
        }
        if !(0.0..=180.0).contains(&self.crease_angle) {
            return Err(Error::InvalidConfig(format!(
                "Crease angle must be in [0, 180] degrees, got {}",
                self.crease_angle
            )));
        }
        Ok(())
    }
}

impl Default for MarchingCubesConfig {
    fn default() -> Self {
        Self {
            iso_level: 0.0,
            scale: DEFAULT_SCALE,
            num_threads: None,
            compute_normals: true,
            crease_angle: 44.0,
        }
    }
}

/// Configuration of the complete density and isosurface pipeline
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub density: DensityConfig,
    pub isosurface: MarchingCubesConfig,
}

impl PipelineConfig {
    /// Set the scale factor of both stages
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.density.scale = scale;
        self.isosurface.scale = scale;
        self
    }

    pub fn with_density(mut self, density: DensityConfig) -> Self {
        self.density = density;
        self
    }

    pub fn with_isosurface(mut self, isosurface: MarchingCubesConfig) -> Self {
        self.isosurface = isosurface;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.density.validate()?;
        self.isosurface.validate()?;
        if self.density.scale != self.isosurface.scale {
            return Err(Error::InvalidConfig(format!(
                "Density scale {} differs from isosurface scale {}",
                self.density.scale, self.isosurface.scale
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marching_cubes_config_default() {
        let config = MarchingCubesConfig::default();
        assert_eq!(config.iso_level, 0.0);
        assert_eq!(config.scale, 0.01);
        assert!(config.compute_normals);
        assert!(config.num_threads.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_density_config_default() {
        let config = DensityConfig::default();
        assert_eq!(config.compartment, Compartment::All);
        assert_eq!(config.strategy, "schematic");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_voxel_size_range() {
        assert!(VoxelSize::cube(1).validate().is_ok());
        assert!(VoxelSize::cube(100).validate().is_ok());
        assert!(VoxelSize::new(0, 10, 10).validate().is_err());
        assert!(VoxelSize::new(10, 101, 10).validate().is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(DensityConfig::default().with_scale(0.0).validate().is_err());
        assert!(DensityConfig::default().with_scale(f32::NAN).validate().is_err());
        assert!(DensityConfig::default().with_strategy(" ").validate().is_err());
        assert!(MarchingCubesConfig::default().with_threads(0).validate().is_err());
        assert!(MarchingCubesConfig::default().with_iso_level(f32::INFINITY).validate().is_err());
        assert!(MarchingCubesConfig::default().with_crease_angle(200.0).validate().is_err());
    }

    #[test]
    fn test_pipeline_scale_consistency() {
        let config = PipelineConfig::default().with_scale(0.5);
        assert_eq!(config.density.scale, 0.5);
        assert_eq!(config.isosurface.scale, 0.5);
        assert!(config.validate().is_ok());

        let mut mismatched = PipelineConfig::default();
        mismatched.isosurface.scale = 1.0;
        assert!(matches!(mismatched.validate(), Err(Error::InvalidConfig(_))));
    }
}
