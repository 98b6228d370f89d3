//! # Neurodensity Reconstruction
//!
//! Density fields and isosurfaces for neuron morphologies.
//!
//! This crate bins the edges of morphology trees into a voxel density,
//! flattens it into a scalar field, and extracts an isosurface with a
//! z-partitioned parallel Marching Cubes. [`DensityVisualizer`] ties the
//! stages together and memoizes their results.

pub mod config;
pub mod density;
pub mod scalar_field;
pub mod parallel;
pub mod marching_cubes;
pub mod mesh_assembly;
pub mod pipeline;

// Re-export commonly used items
pub use config::*;
pub use density::*;
pub use scalar_field::*;
pub use marching_cubes::*;
pub use mesh_assembly::*;
pub use pipeline::*;
