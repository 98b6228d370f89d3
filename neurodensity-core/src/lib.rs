//! Core data structures and traits for neurodensity
//!
//! This crate provides the value types shared by the density and isosurface
//! pipeline: morphology samples, edges, trees and contours, immutable geometry
//! snapshots, bounding boxes, the isosurface mesh, and the error types.

pub mod point;
pub mod bounds;
pub mod morphology;
pub mod mesh;
pub mod traits;
pub mod transform;
pub mod error;

pub use point::*;
pub use bounds::*;
pub use morphology::*;
pub use mesh::*;
pub use traits::*;
pub use transform::*;
pub use error::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Point3, Vector3};
