//! Surface, voxel and tetrahedral mesh representations.

pub mod tessellate;
pub mod tetrahedralize;
pub mod voxel;

use crate::error::{Result, SimError};
use crate::geom::bboxes::{BoundingBox, bounding_box};
use crate::geom::tetrahedron::tetrahedron_signed_volume;
use crate::geom::triangles::triangle_area;
use crate::{Point, TriangleIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A closed triangulated surface: the voxelizer's input and the display
/// geometry of the part.
///
/// The node count of a surface mesh is unrelated to the voxel mesh the
/// solver works on. Temperatures never index into this mesh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceMesh {
    pub nodes: Vec<Point>,
    pub triangles: Vec<TriangleIndex>,
}

impl SurfaceMesh {
    pub fn new(nodes: Vec<Point>, triangles: Vec<TriangleIndex>) -> Self {
        Self { nodes, triangles }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        bounding_box(&self.nodes)
    }

    /// Triangle corner positions.
    pub fn triangle_points(&self, tri: &TriangleIndex) -> (Point, Point, Point) {
        (self.nodes[tri.0], self.nodes[tri.1], self.nodes[tri.2])
    }

    pub fn area(&self) -> f64 {
        self.triangles
            .iter()
            .map(|t| {
                let (a, b, c) = self.triangle_points(t);
                triangle_area(a, b, c)
            })
            .sum()
    }

    /// Enclosed volume by the divergence theorem.
    ///
    /// Positive for outward (counter-clockwise seen from outside) winding.
    pub fn signed_volume(&self) -> f64 {
        let o = Point::new(0.0, 0.0, 0.0);
        self.triangles
            .iter()
            .map(|t| {
                let (a, b, c) = self.triangle_points(t);
                tetrahedron_signed_volume(o, a, b, c)
            })
            .sum()
    }

    /// Checks that the surface encloses a volume.
    ///
    /// Every undirected edge must bound exactly two triangles, all indices
    /// must be in range and no triangle may have zero area.
    pub fn validate_watertight(&self) -> Result<()> {
        if self.triangles.is_empty() || self.nodes.len() < 4 {
            return Err(SimError::Geometry(format!(
                "surface mesh is empty ({} nodes, {} triangles)",
                self.nodes.len(),
                self.triangles.len()
            )));
        }

        let mut edge_count: HashMap<(usize, usize), usize> = HashMap::new();
        for (i, tri) in self.triangles.iter().enumerate() {
            let n = self.nodes.len();
            if tri.0 >= n || tri.1 >= n || tri.2 >= n {
                return Err(SimError::Geometry(format!(
                    "triangle {i} references a node out of range ({n} nodes)"
                )));
            }
            let (a, b, c) = self.triangle_points(tri);
            if triangle_area(a, b, c) <= 0.0 {
                return Err(SimError::Geometry(format!("triangle {i} is degenerate")));
            }
            for edge in tri.edges() {
                *edge_count.entry(edge).or_insert(0) += 1;
            }
        }

        let mut bad: Vec<((usize, usize), usize)> = edge_count
            .into_iter()
            .filter(|(_, count)| *count != 2)
            .collect();
        if bad.is_empty() {
            return Ok(());
        }
        bad.sort_unstable();
        let open = bad.iter().filter(|(_, c)| *c == 1).count();
        let non_manifold = bad.len() - open;
        let ((a, b), count) = bad[0];
        Err(SimError::Geometry(format!(
            "surface mesh is not watertight: {open} open edges, {non_manifold} non-manifold \
             edges (first: edge ({a}, {b}) bounds {count} triangles)"
        )))
    }

    /// Returns a new mesh with duplicate nodes merged.
    ///
    /// Nodes are considered identical when they quantize to the same
    /// `(i64, i64, i64)` key at 1e9 scale (≈ 1 nm precision for mm input).
    /// Triangle indices are remapped accordingly. STL input needs this
    /// before the watertightness check can see shared edges.
    pub fn deduplicate_nodes(self) -> Self {
        const SCALE: f64 = 1e9;

        let mut key_map: HashMap<(i64, i64, i64), usize> = HashMap::new();
        let mut new_nodes: Vec<Point> = Vec::new();
        let mut old_to_new: Vec<usize> = Vec::with_capacity(self.nodes.len());

        for p in &self.nodes {
            let key = (
                (p.x * SCALE).round() as i64,
                (p.y * SCALE).round() as i64,
                (p.z * SCALE).round() as i64,
            );
            let new_idx = *key_map.entry(key).or_insert_with(|| {
                new_nodes.push(*p);
                new_nodes.len() - 1
            });
            old_to_new.push(new_idx);
        }

        let triangles = self
            .triangles
            .iter()
            .map(|t| TriangleIndex(old_to_new[t.0], old_to_new[t.1], old_to_new[t.2]))
            .collect();

        Self {
            nodes: new_nodes,
            triangles,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::geom::mesh::tessellate::{BoxSolid, BoxTessellator, Tessellator};

    pub(crate) fn box_mesh(x: f64, y: f64, z: f64) -> SurfaceMesh {
        BoxTessellator
            .tessellate(&BoxSolid::new(Point::new(0.0, 0.0, 0.0), Point::new(x, y, z)))
            .unwrap()
    }

    #[test]
    fn test_box_is_watertight() {
        let mesh = box_mesh(10.0, 10.0, 10.0);
        assert_eq!(mesh.node_count(), 8);
        assert_eq!(mesh.triangle_count(), 12);
        mesh.validate_watertight().unwrap();
        assert!((mesh.signed_volume() - 1000.0).abs() < 1e-9);
        assert!((mesh.area() - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_triangle_is_rejected() {
        let mut mesh = box_mesh(10.0, 10.0, 10.0);
        mesh.triangles.pop();
        let err = mesh.validate_watertight().unwrap_err();
        assert!(matches!(err, SimError::Geometry(_)));
        assert!(err.to_string().contains("3 open edges"), "{err}");
    }

    #[test]
    fn test_non_manifold_edge_is_rejected() {
        let mut mesh = box_mesh(1.0, 1.0, 1.0);
        let extra = mesh.triangles[0];
        mesh.triangles.push(extra);
        let err = mesh.validate_watertight().unwrap_err();
        assert!(err.to_string().contains("non-manifold"), "{err}");
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let mut mesh = box_mesh(1.0, 1.0, 1.0);
        mesh.triangles[3] = TriangleIndex(0, 1, 99);
        assert!(mesh.validate_watertight().is_err());
    }

    #[test]
    fn test_deduplicate_triangle_soup() {
        // Unshare all corners the way STL stores them.
        let mesh = box_mesh(2.0, 3.0, 4.0);
        let mut nodes = Vec::new();
        let mut triangles = Vec::new();
        for t in &mesh.triangles {
            let (a, b, c) = mesh.triangle_points(t);
            let base = nodes.len();
            nodes.extend([a, b, c]);
            triangles.push(TriangleIndex(base, base + 1, base + 2));
        }
        let soup = SurfaceMesh::new(nodes, triangles);
        assert_eq!(soup.node_count(), 36);
        assert!(soup.validate_watertight().is_err());

        let merged = soup.deduplicate_nodes();
        assert_eq!(merged.node_count(), 8);
        assert_eq!(merged.triangle_count(), 12);
        merged.validate_watertight().unwrap();
    }
}
