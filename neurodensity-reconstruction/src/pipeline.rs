//! Memoizing density and isosurface pipeline
//!
//! [`DensityVisualizer`] owns the current geometry snapshot and caches the
//! density and the extracted isosurface. A cached density is reused while the
//! snapshot version and the density configuration are unchanged; a cached
//! isosurface is reused while the density version and the extraction
//! configuration are unchanged.

use crate::config::{DensityConfig, MarchingCubesConfig, PipelineConfig};
use crate::density::{Density, DensityFieldBuilder, StrategyRegistry};
use crate::marching_cubes::{IsosurfaceOutput, MarchingCubes};
use crate::scalar_field::ScalarField;
use log::{debug, info};
use neurodensity_core::{BoundingBox, Diagnostic, GeometrySnapshot, Point3f, Result, Vector3f};
use std::sync::Arc;

#[derive(Debug)]
struct CachedDensity {
    snapshot_version: u64,
    config: DensityConfig,
    density: Arc<Density>,
    diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
struct CachedIsosurface {
    density_version: u64,
    config: MarchingCubesConfig,
    color: Option<[u8; 3]>,
    output: Arc<IsosurfaceOutput>,
}

/// Density and isosurface computation over a replaceable geometry snapshot
#[derive(Debug)]
pub struct DensityVisualizer {
    config: PipelineConfig,
    registry: StrategyRegistry,
    snapshot: Arc<GeometrySnapshot>,
    color: Option<[u8; 3]>,
    density: Option<CachedDensity>,
    isosurface: Option<CachedIsosurface>,
}

impl DensityVisualizer {
    /// Create a visualizer over an empty snapshot
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: StrategyRegistry::default(),
            snapshot: Arc::new(GeometrySnapshot::empty()),
            color: None,
            density: None,
            isosurface: None,
        })
    }

    /// Resolve strategy keys in `registry` instead of the default one
    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self.density = None;
        self.isosurface = None;
        self
    }

    /// Color attached to extracted meshes
    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = Some(color);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Replace the configuration; cached results stay valid for the stages
    /// whose settings did not change
    pub fn set_config(&mut self, config: PipelineConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn snapshot(&self) -> &Arc<GeometrySnapshot> {
        &self.snapshot
    }

    /// Replace the geometry; subsequent requests recompute
    pub fn register_geometry(&mut self, snapshot: GeometrySnapshot) {
        debug!(
            "Registering geometry snapshot {} with {} cells",
            snapshot.version(),
            snapshot.len()
        );
        self.snapshot = Arc::new(snapshot);
    }

    /// Whether the next density request would recompute
    pub fn is_dirty(&self) -> bool {
        !self.density.as_ref().is_some_and(|cached| {
            cached.snapshot_version == self.snapshot.version() && cached.config == self.config.density
        })
    }

    /// Density of the current snapshot, computed at most once per snapshot
    /// and configuration
    pub fn compute_density(&mut self) -> Result<Arc<Density>> {
        if !self.is_dirty() {
            if let Some(cached) = &self.density {
                return Ok(Arc::clone(&cached.density));
            }
        }

        info!("Computing density for snapshot {}", self.snapshot.version());
        let builder = DensityFieldBuilder::new(self.config.density.clone(), &self.registry)?;
        let build = builder.build(self.snapshot.as_ref())?;
        let density = Arc::new(build.density);

        self.density = Some(CachedDensity {
            snapshot_version: self.snapshot.version(),
            config: self.config.density.clone(),
            density: Arc::clone(&density),
            diagnostics: build.diagnostics,
        });
        Ok(density)
    }

    /// Anomalies seen while building the cached density
    pub fn density_diagnostics(&self) -> &[Diagnostic] {
        self.density
            .as_ref()
            .map(|cached| cached.diagnostics.as_slice())
            .unwrap_or_default()
    }

    /// Isosurface of the current density, computed at most once per density
    /// and extraction configuration
    pub fn compute_isosurface(&mut self) -> Result<Arc<IsosurfaceOutput>> {
        let density = self.compute_density()?;

        if let Some(cached) = &self.isosurface {
            if cached.density_version == density.version()
                && cached.config == self.config.isosurface
                && cached.color == self.color
            {
                return Ok(Arc::clone(&cached.output));
            }
        }

        let field = ScalarField::from_density(&density)?;
        let mut output = MarchingCubes::new(self.config.isosurface.clone()).extract_isosurface(&field)?;
        output.mesh.set_color(self.color);

        let mut diagnostics = self.density_diagnostics().to_vec();
        diagnostics.append(&mut output.diagnostics);
        output.diagnostics = diagnostics;

        let output = Arc::new(output);
        self.isosurface = Some(CachedIsosurface {
            density_version: density.version(),
            config: self.config.isosurface.clone(),
            color: self.color,
            output: Arc::clone(&output),
        });
        Ok(output)
    }

    /// World-coordinate center of the density
    pub fn center(&mut self) -> Result<Point3f> {
        Ok(self.bounding_box()?.center())
    }

    /// World-coordinate extent of the density
    pub fn dimension(&mut self) -> Result<Vector3f> {
        Ok(self.bounding_box()?.extent())
    }

    /// World-coordinate bounding box of the density
    pub fn bounding_box(&mut self) -> Result<BoundingBox> {
        Ok(self.compute_density()?.world_bounding_box())
    }
}

/// One-shot density and isosurface computation without caching
pub fn extract_density_isosurface(
    snapshot: &GeometrySnapshot,
    config: &PipelineConfig,
) -> Result<IsosurfaceOutput> {
    config.validate()?;
    let build = DensityFieldBuilder::new(config.density.clone(), &StrategyRegistry::default())?
        .build(snapshot)?;
    let field = ScalarField::from_density(&build.density)?;
    let mut output = MarchingCubes::new(config.isosurface.clone()).extract_isosurface(&field)?;
    let mut diagnostics = build.diagnostics;
    diagnostics.append(&mut output.diagnostics);
    output.diagnostics = diagnostics;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VoxelSize;
    use crate::density::{BinningStrategy, TreeBased};
    use approx::assert_relative_eq;
    use neurodensity_core::{CellGeometry, Compartment, Drawable, Error, SamplePoint, Tree};

    fn config() -> PipelineConfig {
        PipelineConfig::default()
            .with_scale(1.0)
            .with_density(
                DensityConfig::default()
                    .with_scale(1.0)
                    .with_voxel_size(VoxelSize::cube(5)),
            )
    }

    fn snapshot() -> GeometrySnapshot {
        let dendrite = Tree::from_polyline(
            "Dendrite",
            Compartment::BasalDendrite,
            &[
                SamplePoint::new(0.0, 0.0, 0.0, 1.0),
                SamplePoint::new(20.0, 5.0, 3.0, 1.0),
                SamplePoint::new(35.0, 20.0, 18.0, 0.5),
            ],
        );
        let axon = Tree::from_polyline(
            "Axon",
            Compartment::Axon,
            &[SamplePoint::new(0.0, 0.0, 0.0, 0.5), SamplePoint::new(-10.0, 30.0, 25.0, 0.5)],
        );
        GeometrySnapshot::empty().with_cell(
            "cell-1",
            CellGeometry::new().with_tree(dendrite).with_tree(axon),
        )
    }

    #[test]
    fn test_density_is_memoized() {
        let mut visualizer = DensityVisualizer::new(config()).unwrap();
        visualizer.register_geometry(snapshot());
        assert!(visualizer.is_dirty());

        let first = visualizer.compute_density().unwrap();
        assert!(!visualizer.is_dirty());
        let second = visualizer.compute_density().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_isosurface_is_memoized() {
        let mut visualizer = DensityVisualizer::new(config()).unwrap();
        visualizer.register_geometry(snapshot());

        let first = visualizer.compute_isosurface().unwrap();
        let second = visualizer.compute_isosurface().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.mesh.is_empty());
        assert!(first.is_complete());
    }

    #[test]
    fn test_new_geometry_invalidates_cache() {
        let mut visualizer = DensityVisualizer::new(config()).unwrap();
        visualizer.register_geometry(snapshot());
        let first = visualizer.compute_isosurface().unwrap();

        visualizer.register_geometry(snapshot());
        assert!(visualizer.is_dirty());
        let second = visualizer.compute_isosurface().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.mesh, second.mesh);
    }

    #[test]
    fn test_config_change_recomputes_affected_stage() {
        let mut visualizer = DensityVisualizer::new(config()).unwrap();
        visualizer.register_geometry(snapshot());
        let density = visualizer.compute_density().unwrap();
        let mesh = visualizer.compute_isosurface().unwrap();

        let mut changed = config();
        changed.isosurface = changed.isosurface.with_iso_level(0.5);
        visualizer.set_config(changed).unwrap();

        assert!(Arc::ptr_eq(&density, &visualizer.compute_density().unwrap()));
        assert!(!Arc::ptr_eq(&mesh, &visualizer.compute_isosurface().unwrap()));

        let mut filtered = config();
        filtered.density = filtered.density.with_compartment(Compartment::Axon);
        visualizer.set_config(filtered).unwrap();
        assert!(visualizer.is_dirty());
        assert!(!Arc::ptr_eq(&density, &visualizer.compute_density().unwrap()));
    }

    #[test]
    fn test_diagnostics_carried_into_output() {
        let mut visualizer = DensityVisualizer::new(config()).unwrap();
        let empty_cell = snapshot().with_cell("cell-2", CellGeometry::new());
        visualizer.register_geometry(empty_cell);

        let output = visualizer.compute_isosurface().unwrap();
        assert_eq!(
            output.diagnostics,
            vec![Diagnostic::EmptyCell {
                cell_id: "cell-2".to_string()
            }]
        );
        assert!(output.is_complete());
    }

    #[test]
    fn test_empty_snapshot_gives_empty_mesh() {
        let mut visualizer = DensityVisualizer::new(config()).unwrap();
        let output = visualizer.compute_isosurface().unwrap();
        assert!(output.mesh.is_empty());
        assert_eq!(visualizer.center().unwrap(), Point3f::origin());
    }

    #[test]
    fn test_accessors_and_color() {
        let mut visualizer = DensityVisualizer::new(config())
            .unwrap()
            .with_color([0, 128, 255]);
        visualizer.register_geometry(snapshot());

        let bb = visualizer.bounding_box().unwrap();
        assert_eq!(bb.min, Point3f::new(-10.0, 0.0, 0.0));
        assert_eq!(bb.max, Point3f::new(35.0, 30.0, 25.0));
        assert_eq!(visualizer.center().unwrap(), Point3f::new(12.5, 15.0, 12.5));
        assert_eq!(visualizer.dimension().unwrap(), Vector3f::new(45.0, 30.0, 25.0));
        assert_eq!(visualizer.compute_isosurface().unwrap().mesh.color, Some([0, 128, 255]));
    }

    #[test]
    fn test_accessors_share_world_coordinates() {
        let scaled = PipelineConfig::default().with_density(
            DensityConfig::default().with_voxel_size(VoxelSize::cube(5)),
        );
        let mut visualizer = DensityVisualizer::new(scaled).unwrap();
        visualizer.register_geometry(snapshot());

        let bb = visualizer.bounding_box().unwrap();
        assert_relative_eq!(bb.min, Point3f::new(-0.1, 0.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(bb.max, Point3f::new(0.35, 0.3, 0.25), epsilon = 1e-6);
        assert_relative_eq!(visualizer.center().unwrap(), bb.center(), epsilon = 1e-6);
        assert_relative_eq!(
            visualizer.dimension().unwrap(),
            Vector3f::new(0.45, 0.3, 0.25),
            epsilon = 1e-6
        );

        let mesh = visualizer.compute_isosurface().unwrap().mesh.bounding_box();
        assert_relative_eq!(mesh.min, bb.min, epsilon = 1e-5);
    }

    #[test]
    fn test_unknown_strategy_and_custom_registry() {
        let mut unknown = config();
        unknown.density = unknown.density.with_strategy("voronoi");
        let mut visualizer = DensityVisualizer::new(unknown).unwrap();
        assert!(matches!(visualizer.compute_density(), Err(Error::UnknownStrategy(_))));

        fn custom() -> Box<dyn BinningStrategy> {
            Box::new(TreeBased)
        }
        let mut visualizer = visualizer.with_registry(StrategyRegistry::new().with("voronoi", custom));
        visualizer.register_geometry(snapshot());
        assert!(visualizer.compute_density().is_ok());
    }

    #[test]
    fn test_one_shot_matches_visualizer() {
        let mut visualizer = DensityVisualizer::new(config()).unwrap();
        visualizer.register_geometry(snapshot());
        let cached = visualizer.compute_isosurface().unwrap();

        let direct = extract_density_isosurface(&snapshot(), &config()).unwrap();
        assert_eq!(cached.mesh, direct.mesh);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = config();
        bad.isosurface.scale = 0.5;
        assert!(matches!(DensityVisualizer::new(bad), Err(Error::InvalidConfig(_))));
    }
}
