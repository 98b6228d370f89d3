//! Core traits for neurodensity

use crate::{bounds::BoundingBox, mesh::*, morphology::*, point::*, transform::Transform3D};

/// Supplier of already-structured morphology geometry.
///
/// Implementors never parse files inside the density pipeline; they hand
/// out edges of cells that were loaded elsewhere.
pub trait GeometrySource {
    /// Cell identifiers in a stable order
    fn list_cells(&self) -> Vec<String>;

    /// Edges of one cell whose compartment passes `filter`, in a stable order.
    /// Unknown cells yield no edges.
    fn edges(&self, cell_id: &str, filter: Compartment) -> Vec<Edge>;
}

/// Trait for drawable/renderable objects
pub trait Drawable {
    /// Get the bounding box of the object
    fn bounding_box(&self) -> BoundingBox;

    /// Get the center point of the object
    fn center(&self) -> Point3f {
        self.bounding_box().center()
    }
}

/// Trait for objects that can be transformed
pub trait Transformable {
    /// Apply a transformation to the object
    fn transform(&mut self, transform: &Transform3D);
}

impl GeometrySource for GeometrySnapshot {
    fn list_cells(&self) -> Vec<String> {
        self.cells().keys().cloned().collect()
    }

    fn edges(&self, cell_id: &str, filter: Compartment) -> Vec<Edge> {
        self.cell(cell_id)
            .map(|cell| cell.edges(filter))
            .unwrap_or_default()
    }
}

/// Box of a set of points, degenerate at the origin when there is none
fn points_bounding_box<'a, I>(points: I) -> BoundingBox
where
    I: IntoIterator<Item = &'a Point3f>,
{
    BoundingBox::from_points(points).unwrap_or_else(BoundingBox::zero)
}

impl Drawable for Tree {
    fn bounding_box(&self) -> BoundingBox {
        points_bounding_box(
            self.edges()
                .iter()
                .flat_map(|e| [&e.from().position, &e.to().position]),
        )
    }
}

impl Drawable for Contour {
    fn bounding_box(&self) -> BoundingBox {
        points_bounding_box(self.points().iter().map(|p| &p.position))
    }
}

impl Drawable for GeometrySnapshot {
    fn bounding_box(&self) -> BoundingBox {
        let mut bb = BoundingBox::empty();
        for cell in self.cells().values() {
            for tree in cell.trees.iter().filter(|t| !t.edges().is_empty()) {
                bb = bb.union(&tree.bounding_box());
            }
            for contour in cell.contours.iter().filter(|c| !c.points().is_empty()) {
                bb = bb.union(&contour.bounding_box());
            }
        }
        if bb.is_empty() {
            BoundingBox::zero()
        } else {
            bb
        }
    }
}

impl Drawable for IsosurfaceMesh {
    fn bounding_box(&self) -> BoundingBox {
        points_bounding_box(&self.vertices)
    }
}

impl Transformable for IsosurfaceMesh {
    fn transform(&mut self, transform: &Transform3D) {
        for vertex in &mut self.vertices {
            *vertex = transform.transform_point(vertex);
        }
        for normal in &mut self.normals {
            let n = transform.transform_vector(normal);
            *normal = if n.magnitude() > 1e-12 { n.normalize() } else { n };
        }
    }
}
