//! Tetrahedral decomposition of the voxel mesh.
//!
//! Every hexahedron is split into the six Kuhn tetrahedra around its
//! v0-v6 diagonal. All cells use the same split, so each shared cube face
//! is cut along the same diagonal from both sides and the mesh conforms.

use crate::Point;
use crate::geom::mesh::voxel::VoxelMesh;
use crate::geom::tetrahedron::{tetrahedron_centroid, tetrahedron_signed_volume, tetrahedron_volume};
use crate::geom::triangles::triangle_area;
use std::collections::HashMap;

/// A tetrahedron defined by four node indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TetrahedronIndex(pub usize, pub usize, pub usize, pub usize);

impl TetrahedronIndex {
    pub fn nodes(&self) -> [usize; 4] {
        [self.0, self.1, self.2, self.3]
    }

    /// The four faces, each given by its three nodes and the opposite node.
    pub fn faces(&self) -> [([usize; 3], usize); 4] {
        let [a, b, c, d] = self.nodes();
        [([b, c, d], a), ([a, c, d], b), ([a, b, d], c), ([a, b, c], d)]
    }

    /// The six undirected edges with the smaller index first.
    pub fn edges(&self) -> [(usize, usize); 6] {
        let n = self.nodes();
        let e = |a: usize, b: usize| if a < b { (a, b) } else { (b, a) };
        [
            e(n[0], n[1]),
            e(n[0], n[2]),
            e(n[0], n[3]),
            e(n[1], n[2]),
            e(n[1], n[3]),
            e(n[2], n[3]),
        ]
    }
}

/// Kuhn split of a hexahedron with VTK corner numbering.
const KUHN_TETS: [[usize; 4]; 6] = [
    [0, 1, 2, 6],
    [0, 1, 5, 6],
    [0, 3, 2, 6],
    [0, 3, 7, 6],
    [0, 4, 5, 6],
    [0, 4, 7, 6],
];

/// A tet face that no other tet shares.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryFace {
    /// Node indices, wound outward
    pub nodes: [usize; 3],
    pub area: f64,
}

/// Tetrahedral solver mesh sharing its node vector with the voxel mesh.
#[derive(Debug, Clone)]
pub struct TetrahedralMesh {
    pub nodes: Vec<Point>,
    pub tetrahedra: Vec<TetrahedronIndex>,
}

impl TetrahedralMesh {
    pub fn new(nodes: Vec<Point>, tetrahedra: Vec<TetrahedronIndex>) -> Self {
        Self { nodes, tetrahedra }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn tetrahedra_count(&self) -> usize {
        self.tetrahedra.len()
    }

    /// Corner positions of a tetrahedron.
    pub fn points(&self, tet: &TetrahedronIndex) -> [Point; 4] {
        tet.nodes().map(|i| self.nodes[i])
    }

    pub fn tet_volume(&self, tet: &TetrahedronIndex) -> f64 {
        let [p0, p1, p2, p3] = self.points(tet);
        tetrahedron_volume(p0, p1, p2, p3)
    }

    /// Returns the total volume of the tetrahedral mesh.
    pub fn volume(&self) -> f64 {
        self.tetrahedra.iter().map(|t| self.tet_volume(t)).sum()
    }

    /// Returns the volume-weighted centroid of the mesh.
    pub fn centroid(&self) -> Point {
        let mut total_volume = 0.0;
        let (mut wx, mut wy, mut wz) = (0.0, 0.0, 0.0);

        for t in &self.tetrahedra {
            let [p0, p1, p2, p3] = self.points(t);
            let vol = tetrahedron_volume(p0, p1, p2, p3);
            let c = tetrahedron_centroid(p0, p1, p2, p3);
            total_volume += vol;
            wx += vol * c.x;
            wy += vol * c.y;
            wz += vol * c.z;
        }

        if total_volume.abs() < 1e-10 {
            return Point::new(0.0, 0.0, 0.0);
        }
        Point::new(wx / total_volume, wy / total_volume, wz / total_volume)
    }

    /// Faces that belong to exactly one tetrahedron, wound outward.
    ///
    /// Faces are matched on their sorted node triple; unmatched faces are
    /// returned in sorted-key order so the result does not depend on hashing.
    pub fn boundary_faces(&self) -> Vec<BoundaryFace> {
        let mut pending: HashMap<[usize; 3], ([usize; 3], usize)> = HashMap::new();
        for tet in &self.tetrahedra {
            for (face, opposite) in tet.faces() {
                let mut key = face;
                key.sort_unstable();
                if pending.remove(&key).is_none() {
                    pending.insert(key, (face, opposite));
                }
            }
        }

        let mut keys: Vec<[usize; 3]> = pending.keys().copied().collect();
        keys.sort_unstable();
        keys.into_iter()
            .map(|key| {
                let (mut face, opposite) = pending[&key];
                let [a, b, c] = face.map(|i| self.nodes[i]);
                // Opposite node must lie behind the face.
                if tetrahedron_signed_volume(a, b, c, self.nodes[opposite]) > 0.0 {
                    face.swap(1, 2);
                }
                BoundaryFace {
                    nodes: face,
                    area: triangle_area(a, b, c),
                }
            })
            .collect()
    }

    /// Node adjacency through tetrahedron edges, each list sorted.
    pub fn node_neighbours(&self) -> Vec<Vec<usize>> {
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for tet in &self.tetrahedra {
            for (a, b) in tet.edges() {
                adj[a].push(b);
                adj[b].push(a);
            }
        }
        for list in &mut adj {
            list.sort_unstable();
            list.dedup();
        }
        adj
    }
}

/// Splits every hexahedron of `voxels` into six positively oriented
/// tetrahedra.
pub fn tetrahedralize_voxels(voxels: &VoxelMesh) -> TetrahedralMesh {
    let mut tetrahedra = Vec::with_capacity(voxels.hexes.len() * KUHN_TETS.len());
    for hex in &voxels.hexes {
        for pattern in KUHN_TETS {
            let [a, b, c, d] = pattern.map(|corner| hex.0[corner]);
            let p = [a, b, c, d].map(|i| voxels.nodes[i]);
            if tetrahedron_signed_volume(p[0], p[1], p[2], p[3]) < 0.0 {
                tetrahedra.push(TetrahedronIndex(a, b, d, c));
            } else {
                tetrahedra.push(TetrahedronIndex(a, b, c, d));
            }
        }
    }
    TetrahedralMesh::new(voxels.nodes.clone(), tetrahedra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::mesh::tessellate::{BoxSolid, BoxTessellator, Tessellator};
    use crate::geom::mesh::voxel::{DEFAULT_MIN_CELLS, build_voxel_mesh};
    use crate::geom::sdf::voxelize;
    use approx::assert_relative_eq;

    fn voxels(x: f64, y: f64, z: f64, h: f64) -> VoxelMesh {
        let surface = BoxTessellator
            .tessellate(&BoxSolid::from_dims(x, y, z))
            .unwrap();
        build_voxel_mesh(&voxelize(&surface, h).unwrap(), DEFAULT_MIN_CELLS).unwrap()
    }

    #[test]
    fn test_volume_conservation() {
        let vm = voxels(10.0, 10.0, 10.0, 2.0);
        let tm = tetrahedralize_voxels(&vm);
        assert_eq!(tm.tetrahedra_count(), 64 * 6);
        assert_eq!(tm.node_count(), vm.node_count);
        assert_relative_eq!(tm.volume(), vm.volume(), max_relative = 1e-12);
        assert_relative_eq!(tm.volume(), 64.0 * 8.0, max_relative = 1e-12);
        for t in &tm.tetrahedra {
            let [p0, p1, p2, p3] = tm.points(t);
            assert_relative_eq!(
                tetrahedron_signed_volume(p0, p1, p2, p3),
                8.0 / 6.0,
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn test_centroid() {
        let tm = tetrahedralize_voxels(&voxels(10.0, 10.0, 10.0, 2.0));
        let c = tm.centroid();
        assert_relative_eq!(c.x, 5.0, epsilon = 1e-9);
        assert_relative_eq!(c.y, 5.0, epsilon = 1e-9);
        assert_relative_eq!(c.z, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_split_conforms_between_cells() {
        // With matching diagonals, every interior face is shared by exactly
        // two tets and only the outer box faces stay unmatched.
        let vm = voxels(6.0, 4.0, 4.0, 1.0);
        let tm = tetrahedralize_voxels(&vm);
        let faces = tm.boundary_faces();
        assert_eq!(faces.len(), vm.triangles.len());

        let area: f64 = faces.iter().map(|f| f.area).sum();
        // 5 x 3 x 3 hexes of unit size
        assert_relative_eq!(area, 2.0 * (15.0 + 15.0 + 9.0), max_relative = 1e-12);
    }

    #[test]
    fn test_boundary_faces_point_outward() {
        let vm = voxels(6.0, 6.0, 6.0, 1.0);
        let tm = tetrahedralize_voxels(&vm);
        let centre = tm.centroid();
        for f in tm.boundary_faces() {
            let [a, b, c] = f.nodes.map(|i| tm.nodes[i]);
            let n = (b - a).cross(&(c - a));
            assert!((a - centre).dot(&n) > 0.0);
        }
    }

    #[test]
    fn test_neighbours() {
        let tm = tetrahedralize_voxels(&voxels(10.0, 10.0, 10.0, 2.0));
        let adj = tm.node_neighbours();
        // Corner node 0 of the mesh sits at the lowest corner of one hex; the
        // Kuhn split connects it to all 7 other corners.
        assert_eq!(adj[0].len(), 7);
        assert!(adj.iter().all(|n| !n.is_empty()));
    }
}
