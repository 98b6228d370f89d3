//! Morphology primitives: edges, trees, contours and geometry snapshots
//!
//! Everything in this module is immutable once built. Registering new
//! geometry means building a new [`GeometrySnapshot`], which receives a fresh
//! version number that downstream caches compare against.

use crate::bounds::BoundingBox;
use crate::error::Error;
use crate::point::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Biological classification of a morphological segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Compartment {
    /// Matches every compartment when used as a filter
    #[default]
    All,
    Undefined,
    Axon,
    BasalDendrite,
    ApicalDendrite,
    ForkPoint,
    EndPoint,
    Custom,
}

impl Compartment {
    /// Every compartment in selection order
    pub const VARIANTS: [Compartment; 8] = [
        Compartment::All,
        Compartment::Undefined,
        Compartment::Axon,
        Compartment::BasalDendrite,
        Compartment::ApicalDendrite,
        Compartment::ForkPoint,
        Compartment::EndPoint,
        Compartment::Custom,
    ];

    /// Map an SWC structure identifier to a compartment.
    ///
    /// The soma (type 1) is an outline rather than a branch and has no
    /// compartment; identifiers above 7 are user defined.
    pub fn from_swc_type(type_id: u32) -> Option<Self> {
        match type_id {
            0 => Some(Compartment::Undefined),
            1 => None,
            2 => Some(Compartment::Axon),
            3 => Some(Compartment::BasalDendrite),
            4 => Some(Compartment::ApicalDendrite),
            5 => Some(Compartment::ForkPoint),
            6 => Some(Compartment::EndPoint),
            _ => Some(Compartment::Custom),
        }
    }

    /// Classify the free-form `type` attribute of a traced tree
    pub fn from_tree_type(type_name: &str) -> Self {
        let t = type_name.to_ascii_lowercase();
        if t.contains("axon") {
            Compartment::Axon
        } else if t.contains("apical") {
            Compartment::ApicalDendrite
        } else if t.contains("dendrite") {
            Compartment::BasalDendrite
        } else if t.is_empty() || t.contains("undefined") {
            Compartment::Undefined
        } else {
            Compartment::Custom
        }
    }

    /// Check whether a segment of compartment `other` passes this filter
    pub fn matches(&self, other: Compartment) -> bool {
        *self == Compartment::All || *self == other
    }

    /// Human readable label, identical to the accepted selection strings
    pub fn label(&self) -> &'static str {
        match self {
            Compartment::All => "all",
            Compartment::Undefined => "undefined",
            Compartment::Axon => "axon",
            Compartment::BasalDendrite => "(basal) dendrite",
            Compartment::ApicalDendrite => "apical dendrite",
            Compartment::ForkPoint => "fork point",
            Compartment::EndPoint => "end point",
            Compartment::Custom => "custom",
        }
    }
}

impl fmt::Display for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Compartment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        match key.as_str() {
            "all" => Ok(Compartment::All),
            "undefined" => Ok(Compartment::Undefined),
            "axon" => Ok(Compartment::Axon),
            "(basal) dendrite" | "basal dendrite" | "dendrite" => Ok(Compartment::BasalDendrite),
            "apical dendrite" | "apical" => Ok(Compartment::ApicalDendrite),
            "fork point" => Ok(Compartment::ForkPoint),
            "end point" => Ok(Compartment::EndPoint),
            "custom" => Ok(Compartment::Custom),
            _ => Err(Error::InvalidConfig(format!("Unknown compartment '{}'", s))),
        }
    }
}

/// A line segment between two morphology samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    from: SamplePoint,
    to: SamplePoint,
}

impl Edge {
    /// Create an edge between two samples
    pub fn new(from: SamplePoint, to: SamplePoint) -> Self {
        Self { from, to }
    }

    /// Start sample
    pub fn from(&self) -> &SamplePoint {
        &self.from
    }

    /// End sample
    pub fn to(&self) -> &SamplePoint {
        &self.to
    }

    /// Vector from the start to the end position
    pub fn direction(&self) -> Vector3f {
        self.to.position - self.from.position
    }

    /// Euclidean length of the segment
    pub fn length(&self) -> f32 {
        self.direction().magnitude()
    }

    /// Sample at parameter `t` in `[0, 1]`
    pub fn sample(&self, t: f32) -> SamplePoint {
        self.from.lerp(&self.to, t)
    }

    /// Mean of both endpoint radii
    pub fn mean_radius(&self) -> f32 {
        (self.from.radius + self.to.radius) / 2.0
    }

    /// Bounding box of both endpoint positions
    pub fn bounding_box(&self) -> BoundingBox {
        let mut bb = BoundingBox::empty();
        bb.extend(&self.from.position);
        bb.extend(&self.to.position);
        bb
    }
}

/// Consecutive edges of a polyline
fn polyline_edges(points: &[SamplePoint]) -> Vec<Edge> {
    points
        .windows(2)
        .map(|pair| Edge::new(pair[0], pair[1]))
        .collect()
}

/// One traced branch structure of a cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    name: String,
    color: [u8; 3],
    compartment: Compartment,
    leaf: bool,
    edges: Vec<Edge>,
}

impl Tree {
    /// Create a tree from its edges
    pub fn new(name: impl Into<String>, compartment: Compartment, edges: Vec<Edge>) -> Self {
        Self {
            name: name.into(),
            color: [255, 255, 255],
            compartment,
            leaf: false,
            edges,
        }
    }

    /// Create an unbranched tree connecting consecutive samples
    pub fn from_polyline(
        name: impl Into<String>,
        compartment: Compartment,
        points: &[SamplePoint],
    ) -> Self {
        Self::new(name, compartment, polyline_edges(points))
    }

    /// Set the display color
    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = color;
        self
    }

    /// Set the leaf flag
    pub fn with_leaf(mut self, leaf: bool) -> Self {
        self.leaf = leaf;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    pub fn compartment(&self) -> Compartment {
        self.compartment
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Sum of all edge lengths
    pub fn total_length(&self) -> f32 {
        self.edges.iter().map(Edge::length).sum()
    }
}

/// A soma or boundary outline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    name: String,
    color: [u8; 3],
    closed: bool,
    points: Vec<SamplePoint>,
}

impl Contour {
    /// Create a contour from its points
    pub fn new(name: impl Into<String>, points: Vec<SamplePoint>, closed: bool) -> Self {
        Self {
            name: name.into(),
            color: [255, 255, 255],
            closed,
            points,
        }
    }

    /// Set the display color
    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = color;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn points(&self) -> &[SamplePoint] {
        &self.points
    }

    /// Consecutive edges of the outline, closing it if requested
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = polyline_edges(&self.points);
        if self.closed && self.points.len() > 2 {
            edges.push(Edge::new(self.points[self.points.len() - 1], self.points[0]));
        }
        edges
    }
}

/// All traced structures belonging to one cell
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellGeometry {
    pub trees: Vec<Tree>,
    pub contours: Vec<Contour>,
}

impl CellGeometry {
    /// Create an empty cell
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tree
    pub fn with_tree(mut self, tree: Tree) -> Self {
        self.trees.push(tree);
        self
    }

    /// Add a contour
    pub fn with_contour(mut self, contour: Contour) -> Self {
        self.contours.push(contour);
        self
    }

    /// Edges of all trees whose compartment passes `filter`, in tree order
    pub fn edges(&self, filter: Compartment) -> Vec<Edge> {
        self.trees
            .iter()
            .filter(|tree| filter.matches(tree.compartment()))
            .flat_map(|tree| tree.edges().iter().copied())
            .collect()
    }
}

static NEXT_SNAPSHOT_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_version() -> u64 {
    NEXT_SNAPSHOT_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// Immutable geometry of all cells at one point in time.
///
/// Every snapshot carries a process-wide unique version; two snapshots
/// with the same version are guaranteed to hold the same geometry.
#[derive(Debug, Clone)]
pub struct GeometrySnapshot {
    version: u64,
    cells: BTreeMap<String, CellGeometry>,
}

impl GeometrySnapshot {
    /// Create a snapshot from a map of cell identifier to geometry
    pub fn new(cells: BTreeMap<String, CellGeometry>) -> Self {
        Self {
            version: next_version(),
            cells,
        }
    }

    /// Create a snapshot without any cell
    pub fn empty() -> Self {
        Self::new(BTreeMap::new())
    }

    /// New snapshot with `cell` added or replaced
    pub fn with_cell(&self, cell_id: impl Into<String>, cell: CellGeometry) -> Self {
        let mut cells = self.cells.clone();
        cells.insert(cell_id.into(), cell);
        Self::new(cells)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn cells(&self) -> &BTreeMap<String, CellGeometry> {
        &self.cells
    }

    pub fn cell(&self, cell_id: &str) -> Option<&CellGeometry> {
        self.cells.get(cell_id)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// World-space extent of all trees and contours
    pub fn dimensions(&self) -> Vector3f {
        crate::traits::Drawable::bounding_box(self).extent()
    }
}

impl Default for GeometrySnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_tree() -> Tree {
        Tree::from_polyline(
            "Axon #0",
            Compartment::Axon,
            &[
                SamplePoint::new(0.0, 0.0, 0.0, 1.0),
                SamplePoint::new(3.0, 4.0, 0.0, 1.0),
                SamplePoint::new(3.0, 4.0, 2.0, 0.5),
            ],
        )
    }

    #[test]
    fn test_compartment_parsing() {
        assert_eq!("all".parse::<Compartment>().unwrap(), Compartment::All);
        assert_eq!(
            "(basal) dendrite".parse::<Compartment>().unwrap(),
            Compartment::BasalDendrite
        );
        assert_eq!(" Fork Point ".parse::<Compartment>().unwrap(), Compartment::ForkPoint);
        assert!("soma".parse::<Compartment>().is_err());

        for c in Compartment::VARIANTS {
            assert_eq!(c.label().parse::<Compartment>().unwrap(), c);
        }
    }

    #[test]
    fn test_compartment_classification() {
        assert_eq!(Compartment::from_swc_type(2), Some(Compartment::Axon));
        assert_eq!(Compartment::from_swc_type(1), None);
        assert_eq!(Compartment::from_swc_type(12), Some(Compartment::Custom));
        assert_eq!(Compartment::from_tree_type("Apical Dendrite"), Compartment::ApicalDendrite);
        assert_eq!(Compartment::from_tree_type("Dendrite"), Compartment::BasalDendrite);
        assert_eq!(Compartment::from_tree_type("Axon"), Compartment::Axon);
    }

    #[test]
    fn test_compartment_filter() {
        assert!(Compartment::All.matches(Compartment::Axon));
        assert!(Compartment::Axon.matches(Compartment::Axon));
        assert!(!Compartment::Axon.matches(Compartment::BasalDendrite));
    }

    #[test]
    fn test_tree_from_polyline() {
        let tree = sample_tree();
        assert_eq!(tree.edges().len(), 2);
        assert_relative_eq!(tree.total_length(), 7.0);
        assert_relative_eq!(tree.edges()[1].mean_radius(), 0.75);
        assert_eq!(tree.edges()[0].to(), tree.edges()[1].from());
    }

    #[test]
    fn test_contour_edges() {
        let points = vec![
            SamplePoint::new(0.0, 0.0, 0.0, 0.1),
            SamplePoint::new(1.0, 0.0, 0.0, 0.1),
            SamplePoint::new(1.0, 1.0, 0.0, 0.1),
        ];
        let open = Contour::new("Soma", points.clone(), false);
        let closed = Contour::new("Soma", points, true);

        assert_eq!(open.edges().len(), 2);
        assert_eq!(closed.edges().len(), 3);
        assert_eq!(closed.edges()[2].to(), &closed.points()[0]);
    }

    #[test]
    fn test_cell_edge_filter() {
        let dendrite = Tree::from_polyline(
            "Dendrite #1",
            Compartment::BasalDendrite,
            &[SamplePoint::new(0.0, 0.0, 0.0, 1.0), SamplePoint::new(-1.0, 0.0, 0.0, 1.0)],
        );
        let cell = CellGeometry::new().with_tree(sample_tree()).with_tree(dendrite);

        assert_eq!(cell.edges(Compartment::All).len(), 3);
        assert_eq!(cell.edges(Compartment::Axon).len(), 2);
        assert_eq!(cell.edges(Compartment::BasalDendrite).len(), 1);
        assert!(cell.edges(Compartment::EndPoint).is_empty());
    }

    #[test]
    fn test_snapshot_versions() {
        let a = GeometrySnapshot::empty();
        let b = a.with_cell("cell-1", CellGeometry::new().with_tree(sample_tree()));

        assert_ne!(a.version(), b.version());
        assert!(a.is_empty());
        assert_eq!(b.len(), 1);
        assert!(b.cell("cell-1").is_some());

        let dims = b.dimensions();
        assert_relative_eq!(dims.x, 3.0);
        assert_relative_eq!(dims.y, 4.0);
        assert_relative_eq!(dims.z, 2.0);
    }
}
