//! Voxel density fields built from neuron morphology
//!
//! A density is a regular 3D grid over the bounding box of all selected
//! edges. Each edge is split at the voxel planes it crosses and every piece
//! adds its weighted length to the voxel it lies in. Source coordinates are
//! binned as they are; world coordinates are those multiplied by the
//! configured scale factor.

use crate::config::DensityConfig;
use itertools::Itertools;
use log::{debug, info, warn};
use ndarray::Array3;
use neurodensity_core::{
    BoundingBox, Compartment, Diagnostic, Edge, Error, GeometrySource, Point3f, Result, Vector3f,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_DENSITY_VERSION: AtomicU64 = AtomicU64::new(1);

/// Largest grid a density may allocate, 2^26 voxels (256 MiB of `f32`).
///
/// Larger grids are rejected with [`Error::InvalidConfig`]; pick a bigger
/// voxel size for such geometry.
pub const MAX_GRID_VOXELS: usize = 1 << 26;

/// Per-unit-length contribution of an edge to the voxels it passes
pub trait BinningStrategy: Send + Sync + fmt::Debug {
    /// Short name used in log output
    fn name(&self) -> &'static str;

    /// Weight per unit length at parameter `t` along `edge`
    fn weight(&self, edge: &Edge, t: f32) -> f32;
}

/// Counts the length of the schematic skeleton inside each voxel
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeBased;

impl BinningStrategy for TreeBased {
    fn name(&self) -> &'static str {
        "tree"
    }

    fn weight(&self, _edge: &Edge, _t: f32) -> f32 {
        1.0
    }
}

/// Weights the covered length by the interpolated sample radius
#[derive(Debug, Clone, Copy, Default)]
pub struct DiameterWeighted;

impl BinningStrategy for DiameterWeighted {
    fn name(&self) -> &'static str {
        "diameter"
    }

    fn weight(&self, edge: &Edge, t: f32) -> f32 {
        edge.sample(t).radius
    }
}

pub type StrategyConstructor = fn() -> Box<dyn BinningStrategy>;

/// Maps representation keys to binning strategies.
///
/// Keys are matched case-insensitively.
#[derive(Clone)]
pub struct StrategyRegistry {
    constructors: HashMap<String, StrategyConstructor>,
}

impl StrategyRegistry {
    /// Create a registry without any strategies
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register(&mut self, key: &str, constructor: StrategyConstructor) {
        self.constructors.insert(key.trim().to_lowercase(), constructor);
    }

    pub fn with(mut self, key: &str, constructor: StrategyConstructor) -> Self {
        self.register(key, constructor);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.constructors.contains_key(&key.trim().to_lowercase())
    }

    /// Instantiate the strategy registered for `key`
    pub fn resolve(&self, key: &str) -> Result<Box<dyn BinningStrategy>> {
        self.constructors
            .get(&key.trim().to_lowercase())
            .map(|constructor| constructor())
            .ok_or_else(|| Error::UnknownStrategy(key.to_string()))
    }

    /// Registered keys in sorted order
    pub fn keys(&self) -> Vec<String> {
        self.constructors.keys().cloned().sorted().collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        fn tree() -> Box<dyn BinningStrategy> {
            Box::new(TreeBased)
        }
        fn diameter() -> Box<dyn BinningStrategy> {
            Box::new(DiameterWeighted)
        }

        let mut registry = Self::new();
        for key in ["schematic", "tree", "xml", "swc", "asc"] {
            registry.register(key, tree);
        }
        for key in ["cylinder", "diameter", "edge"] {
            registry.register(key, diameter);
        }
        registry
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

/// Post-processing of the accumulated voxel values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Normalization {
    /// Keep raw weighted lengths
    #[default]
    None,
    /// Divide by the summed length of all contributing edges
    TotalLength,
    /// Divide by the largest voxel value
    MaxValue,
}

impl Normalization {
    pub fn apply(&self, values: &mut Array3<f32>, total_length: f32) {
        let divisor = match self {
            Normalization::None => return,
            Normalization::TotalLength => total_length,
            Normalization::MaxValue => values.iter().copied().fold(0.0f32, f32::max),
        };
        if divisor > 0.0 {
            values.mapv_inplace(|v| v / divisor);
        }
    }
}

/// A voxel above a visibility threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleVoxel {
    pub index: [usize; 3],
    /// Lower corner in world coordinates
    pub min: Point3f,
    /// Edge lengths in world coordinates
    pub size: Vector3f,
    pub value: f32,
    /// Value relative to the largest voxel value, in [0, 1]
    pub relative: f32,
}

/// Scalar grid over the working-coordinate bounding box of a geometry
#[derive(Debug, Clone)]
pub struct Density {
    /// Values indexed as `[x, y, z]`
    values: Array3<f32>,
    voxel_size: Vector3f,
    bounding_box: BoundingBox,
    scale: f32,
    total_length: f32,
    version: u64,
}

impl Density {
    /// Wrap precomputed voxel values.
    ///
    /// `bounding_box` is in working coordinates and anchors voxel `[0, 0, 0]`.
    pub fn from_values(
        values: Array3<f32>,
        voxel_size: Vector3f,
        bounding_box: BoundingBox,
        scale: f32,
    ) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::InvalidData("Density grid has no voxels".to_string()));
        }
        if voxel_size.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(Error::InvalidData(format!(
                "Voxel size must be positive, got {:?}",
                voxel_size
            )));
        }
        let total_length = values.sum();
        Ok(Self {
            values,
            voxel_size,
            bounding_box,
            scale,
            total_length,
            version: NEXT_DENSITY_VERSION.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Grid size as `[nx, ny, nz]`
    pub fn dimensions(&self) -> [usize; 3] {
        let (nx, ny, nz) = self.values.dim();
        [nx, ny, nz]
    }

    pub fn values(&self) -> &Array3<f32> {
        &self.values
    }

    pub fn value(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        self.values.get([x, y, z]).copied()
    }

    pub fn voxel_size(&self) -> Vector3f {
        self.voxel_size
    }

    /// Bounding box of the binned geometry in working coordinates
    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    pub fn world_bounding_box(&self) -> BoundingBox {
        self.bounding_box.scaled(self.scale)
    }

    pub fn center(&self) -> Point3f {
        self.bounding_box.center()
    }

    /// Extent of the binned geometry in working coordinates
    pub fn dimension(&self) -> Vector3f {
        self.bounding_box.extent()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Summed length of all edges that contributed
    pub fn total_length(&self) -> f32 {
        self.total_length
    }

    /// Identifier unique to this build
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn max_value(&self) -> f32 {
        self.values.iter().copied().fold(0.0f32, f32::max)
    }

    /// Lower corner of a voxel in working coordinates
    pub fn voxel_origin(&self, x: usize, y: usize, z: usize) -> Point3f {
        Point3f::new(
            self.bounding_box.min.x + x as f32 * self.voxel_size.x,
            self.bounding_box.min.y + y as f32 * self.voxel_size.y,
            self.bounding_box.min.z + z as f32 * self.voxel_size.z,
        )
    }

    /// Voxels whose value reaches `min_percent` of the largest value.
    ///
    /// Zero-valued voxels are never reported.
    pub fn visible_voxels(&self, min_percent: f32) -> Vec<VisibleVoxel> {
        let max = self.max_value();
        if max <= 0.0 {
            return Vec::new();
        }
        let threshold = max * min_percent.clamp(0.0, 100.0) / 100.0;
        let size = self.voxel_size * self.scale;

        self.values
            .indexed_iter()
            .filter(|(_, value)| **value > 0.0 && **value >= threshold)
            .map(|((x, y, z), value)| VisibleVoxel {
                index: [x, y, z],
                min: self.voxel_origin(x, y, z) * self.scale,
                size,
                value: *value,
                relative: *value / max,
            })
            .collect()
    }
}

/// A density together with the anomalies seen while building it
#[derive(Debug, Clone)]
pub struct DensityBuild {
    pub density: Density,
    pub diagnostics: Vec<Diagnostic>,
}

/// Builds a [`Density`] from a [`GeometrySource`]
#[derive(Debug)]
pub struct DensityFieldBuilder {
    config: DensityConfig,
    strategy: Box<dyn BinningStrategy>,
}

impl DensityFieldBuilder {
    /// Validate `config` and resolve its strategy key in `registry`
    pub fn new(config: DensityConfig, registry: &StrategyRegistry) -> Result<Self> {
        config.validate()?;
        let strategy = registry.resolve(&config.strategy)?;
        Ok(Self { config, strategy })
    }

    /// Use an explicit strategy, ignoring the configured key
    pub fn with_strategy(config: DensityConfig, strategy: Box<dyn BinningStrategy>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, strategy })
    }

    pub fn config(&self) -> &DensityConfig {
        &self.config
    }

    pub fn strategy(&self) -> &dyn BinningStrategy {
        self.strategy.as_ref()
    }

    /// Bin every selected edge of every cell of `source`
    pub fn build<S: GeometrySource + ?Sized>(&self, source: &S) -> Result<DensityBuild> {
        let mut diagnostics = Vec::new();
        let mut edges = Vec::new();

        for cell_id in source.list_cells() {
            let cell_edges = source.edges(&cell_id, self.config.compartment);
            if cell_edges.is_empty() {
                warn!("Cell '{}' has no edges for compartment {}", cell_id, self.config.compartment);
                diagnostics.push(Diagnostic::EmptyCell { cell_id });
                continue;
            }
            edges.extend(cell_edges);
        }

        let density = self.build_from_edges(&edges)?;
        Ok(DensityBuild {
            density,
            diagnostics,
        })
    }

    /// Bin edges given in working coordinates
    pub fn build_from_edges(&self, edges: &[Edge]) -> Result<Density> {
        let voxel_size = self.config.voxel_size.to_vector();

        let bounding_box = edges
            .iter()
            .fold(BoundingBox::empty(), |bb, e| bb.union(&e.bounding_box()));
        if bounding_box.is_empty() {
            info!("No edges selected, producing an empty density");
            return Density::from_values(
                Array3::zeros((1, 1, 1)),
                voxel_size,
                BoundingBox::zero(),
                self.config.scale,
            );
        }

        let extent = bounding_box.extent();
        let dims = [0, 1, 2].map(|axis| ((extent[axis] / voxel_size[axis]).ceil() as usize).max(1));
        let voxels = grid_voxel_count(dims)?;
        info!(
            "Binning {} edges into a {}x{}x{} grid ({} voxels) with the {} strategy",
            edges.len(),
            dims[0],
            dims[1],
            dims[2],
            voxels,
            self.strategy.name()
        );

        let mut values = Array3::zeros((dims[0], dims[1], dims[2]));
        let mut total_length = 0.0;
        for edge in edges {
            total_length += self.accumulate_edge(&mut values, &bounding_box.min, &voxel_size, edge);
        }
        self.config.normalization.apply(&mut values, total_length);
        debug!("Accumulated total length {}", total_length);

        let mut density = Density::from_values(values, voxel_size, bounding_box, self.config.scale)?;
        density.total_length = total_length;
        Ok(density)
    }

    /// Add the weighted length of `edge` to the voxels it crosses and
    /// return its length
    fn accumulate_edge(
        &self,
        values: &mut Array3<f32>,
        origin: &Point3f,
        voxel_size: &Vector3f,
        edge: &Edge,
    ) -> f32 {
        let length = edge.length();
        if length <= f32::EPSILON {
            return 0.0;
        }
        let start = edge.from().position - origin;
        let direction = edge.direction();

        // Split parameters where the edge crosses a voxel plane
        let mut splits = vec![0.0f32, 1.0];
        for axis in 0..3 {
            if direction[axis].abs() <= f32::EPSILON {
                continue;
            }
            let a = start[axis] / voxel_size[axis];
            let b = (start[axis] + direction[axis]) / voxel_size[axis];
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            for plane in (lo.floor() as i64 + 1)..=(hi.ceil() as i64 - 1) {
                let t = (plane as f32 * voxel_size[axis] - start[axis]) / direction[axis];
                if t > 0.0 && t < 1.0 {
                    splits.push(t);
                }
            }
        }
        splits.sort_by(f32::total_cmp);
        splits.dedup();

        let (nx, ny, nz) = values.dim();
        let dims = [nx, ny, nz];
        for (t0, t1) in splits.into_iter().tuple_windows() {
            let piece = (t1 - t0) * length;
            if piece <= 0.0 {
                continue;
            }
            let t = 0.5 * (t0 + t1);
            let mid = start + direction * t;
            let index = [0, 1, 2].map(|axis| {
                let i = (mid[axis] / voxel_size[axis]).floor() as i64;
                i.clamp(0, dims[axis] as i64 - 1) as usize
            });
            values[index] += self.strategy.weight(edge, t) * piece;
        }
        length
    }
}

/// Voxel count of a grid, rejecting grids above [`MAX_GRID_VOXELS`]
fn grid_voxel_count(dims: [usize; 3]) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |count, n| count.checked_mul(*n))
        .filter(|count| *count <= MAX_GRID_VOXELS)
        .ok_or_else(|| {
            Error::InvalidConfig(format!(
                "Density grid {}x{}x{} exceeds {} voxels; increase the voxel size",
                dims[0], dims[1], dims[2], MAX_GRID_VOXELS
            ))
        })
}

/// Build a density from `source` with the default strategy registry
pub fn build_density<S: GeometrySource + ?Sized>(
    source: &S,
    config: &DensityConfig,
) -> Result<DensityBuild> {
    DensityFieldBuilder::new(config.clone(), &StrategyRegistry::default())?.build(source)
}

/// Density restricted to one compartment, with every other option of `config`
pub fn build_compartment_density<S: GeometrySource + ?Sized>(
    source: &S,
    config: &DensityConfig,
    compartment: Compartment,
) -> Result<DensityBuild> {
    build_density(source, &config.clone().with_compartment(compartment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VoxelSize;
    use approx::assert_relative_eq;
    use neurodensity_core::{CellGeometry, GeometrySnapshot, SamplePoint, Tree};

    fn unit_config() -> DensityConfig {
        DensityConfig::default()
            .with_scale(1.0)
            .with_voxel_size(VoxelSize::cube(10))
    }

    fn straight_cell(from: [f32; 3], to: [f32; 3], radius: f32, compartment: Compartment) -> CellGeometry {
        let tree = Tree::from_polyline(
            "Tree",
            compartment,
            &[
                SamplePoint::new(from[0], from[1], from[2], radius),
                SamplePoint::new(to[0], to[1], to[2], radius),
            ],
        );
        CellGeometry::new().with_tree(tree)
    }

    #[test]
    fn test_registry_resolution() {
        let registry = StrategyRegistry::default();
        assert_eq!(registry.resolve("schematic").unwrap().name(), "tree");
        assert_eq!(registry.resolve("SWC").unwrap().name(), "tree");
        assert_eq!(registry.resolve("Cylinder").unwrap().name(), "diameter");
        assert!(matches!(
            registry.resolve("voronoi"),
            Err(Error::UnknownStrategy(key)) if key == "voronoi"
        ));
        assert!(registry.keys().contains(&"edge".to_string()));
    }

    #[test]
    fn test_unknown_strategy_rejected_by_builder() {
        let config = unit_config().with_strategy("voronoi");
        assert!(matches!(
            DensityFieldBuilder::new(config, &StrategyRegistry::default()),
            Err(Error::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_length_split_across_voxels() {
        let snapshot = GeometrySnapshot::empty().with_cell(
            "cell",
            straight_cell([0.0, 0.0, 0.0], [25.0, 0.0, 0.0], 1.0, Compartment::Axon),
        );
        let build = build_density(&snapshot, &unit_config()).unwrap();
        let density = &build.density;

        assert_eq!(density.dimensions(), [3, 1, 1]);
        assert_relative_eq!(density.value(0, 0, 0).unwrap(), 10.0, epsilon = 1e-4);
        assert_relative_eq!(density.value(1, 0, 0).unwrap(), 10.0, epsilon = 1e-4);
        assert_relative_eq!(density.value(2, 0, 0).unwrap(), 5.0, epsilon = 1e-4);
        assert_relative_eq!(density.total_length(), 25.0, epsilon = 1e-4);
        assert!(build.diagnostics.is_empty());
    }

    #[test]
    fn test_diameter_weighting() {
        let snapshot = GeometrySnapshot::empty().with_cell(
            "cell",
            straight_cell([0.0, 0.0, 0.0], [20.0, 0.0, 0.0], 2.0, Compartment::Axon),
        );
        let config = unit_config().with_strategy("cylinder");
        let density = build_density(&snapshot, &config).unwrap().density;

        assert_relative_eq!(density.value(0, 0, 0).unwrap(), 20.0, epsilon = 1e-4);
        assert_relative_eq!(density.value(1, 0, 0).unwrap(), 20.0, epsilon = 1e-4);
    }

    #[test]
    fn test_diagonal_edge_conserves_length() {
        let snapshot = GeometrySnapshot::empty().with_cell(
            "cell",
            straight_cell([0.0, 0.0, 0.0], [30.0, 17.0, 42.0], 1.0, Compartment::Axon),
        );
        let density = build_density(&snapshot, &unit_config()).unwrap().density;
        let length = Vector3f::new(30.0, 17.0, 42.0).magnitude();

        assert_eq!(density.dimensions(), [3, 2, 5]);
        assert_relative_eq!(density.values().sum(), length, epsilon = 1e-3);
    }

    #[test]
    fn test_compartment_filter_and_empty_cells() {
        let snapshot = GeometrySnapshot::empty()
            .with_cell("axon", straight_cell([0.0; 3], [10.0, 0.0, 0.0], 1.0, Compartment::Axon))
            .with_cell(
                "dendrite",
                straight_cell([0.0; 3], [0.0, 10.0, 0.0], 1.0, Compartment::BasalDendrite),
            );

        let build = build_compartment_density(&snapshot, &unit_config(), Compartment::Axon).unwrap();
        assert_eq!(
            build.diagnostics,
            vec![Diagnostic::EmptyCell {
                cell_id: "dendrite".to_string()
            }]
        );
        assert_relative_eq!(build.density.total_length(), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn test_empty_geometry_gives_zero_grid() {
        let build = build_density(&GeometrySnapshot::empty(), &unit_config()).unwrap();
        assert_eq!(build.density.dimensions(), [1, 1, 1]);
        assert_eq!(build.density.value(0, 0, 0), Some(0.0));
        assert_eq!(build.density.bounding_box(), BoundingBox::zero());
        assert!(build.density.visible_voxels(0.0).is_empty());
    }

    #[test]
    fn test_source_coordinates_are_binned_unscaled() {
        // 20 micrometre diagonal at the default 0.01 scale
        let snapshot = GeometrySnapshot::empty().with_cell(
            "cell",
            straight_cell([0.0; 3], [20.0, 20.0, 20.0], 1.0, Compartment::BasalDendrite),
        );
        let density = build_density(&snapshot, &DensityConfig::default()).unwrap().density;

        assert_eq!(density.dimensions(), [2, 2, 2]);
        assert_eq!(density.bounding_box().max, Point3f::new(20.0, 20.0, 20.0));
        assert_relative_eq!(
            density.world_bounding_box().max,
            Point3f::new(0.2, 0.2, 0.2),
            epsilon = 1e-6
        );
        assert_relative_eq!(density.total_length(), 20.0 * 3f32.sqrt(), epsilon = 1e-3);
    }

    #[test]
    fn test_world_coordinates_scale_the_grid_box() {
        let snapshot = GeometrySnapshot::empty().with_cell(
            "cell",
            straight_cell([100.0, 200.0, 300.0], [115.0, 200.0, 300.0], 1.0, Compartment::Axon),
        );
        let config = unit_config().with_scale(0.01);
        let density = build_density(&snapshot, &config).unwrap().density;

        assert_relative_eq!(density.bounding_box().min.x, 100.0, epsilon = 1e-3);
        assert_relative_eq!(density.world_bounding_box().min.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(density.world_bounding_box().max.x, 1.15, epsilon = 1e-5);
        assert_eq!(density.dimensions(), [2, 1, 1]);

        let visible = density.visible_voxels(0.0);
        assert_relative_eq!(visible[0].min.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(visible[0].size.x, 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_oversized_grid_rejected() {
        let snapshot = GeometrySnapshot::empty().with_cell(
            "cell",
            straight_cell([0.0; 3], [5000.0, 5000.0, 5000.0], 1.0, Compartment::Axon),
        );
        let config = unit_config().with_voxel_size(VoxelSize::cube(1));
        assert!(matches!(
            build_density(&snapshot, &config),
            Err(Error::InvalidConfig(_))
        ));

        assert_eq!(grid_voxel_count([64, 1024, 1024]).unwrap(), MAX_GRID_VOXELS);
        assert!(grid_voxel_count([usize::MAX, 2, 1]).is_err());
    }

    #[test]
    fn test_normalization() {
        let snapshot = GeometrySnapshot::empty().with_cell(
            "cell",
            straight_cell([0.0; 3], [25.0, 0.0, 0.0], 1.0, Compartment::Axon),
        );
        let by_max = build_density(&snapshot, &unit_config().with_normalization(Normalization::MaxValue))
            .unwrap()
            .density;
        assert_relative_eq!(by_max.max_value(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(by_max.value(2, 0, 0).unwrap(), 0.5, epsilon = 1e-4);

        let by_length =
            build_density(&snapshot, &unit_config().with_normalization(Normalization::TotalLength))
                .unwrap()
                .density;
        assert_relative_eq!(by_length.values().sum(), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_visible_voxels_threshold() {
        let snapshot = GeometrySnapshot::empty().with_cell(
            "cell",
            straight_cell([0.0; 3], [25.0, 0.0, 0.0], 1.0, Compartment::Axon),
        );
        let density = build_density(&snapshot, &unit_config()).unwrap().density;

        assert_eq!(density.visible_voxels(0.0).len(), 3);
        let visible = density.visible_voxels(75.0);
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].index, [0, 0, 0]);
        assert_relative_eq!(visible[0].relative, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_versions_are_unique() {
        let snapshot = GeometrySnapshot::empty().with_cell(
            "cell",
            straight_cell([0.0; 3], [5.0, 0.0, 0.0], 1.0, Compartment::Axon),
        );
        let a = build_density(&snapshot, &unit_config()).unwrap().density;
        let b = build_density(&snapshot, &unit_config()).unwrap().density;
        assert_ne!(a.version(), b.version());
    }
}
