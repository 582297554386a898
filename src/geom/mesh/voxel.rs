//! Hexahedral voxel mesh built from the interior of a signed-distance grid.

use crate::error::{Result, SimError};
use crate::geom::sdf::SignedDistanceGrid;
use crate::{Point, TriangleIndex};
use log::info;
use serde::Serialize;

/// Default minimum number of interior cubes for a usable mesh.
pub const DEFAULT_MIN_CELLS: usize = 8;

/// Corner offsets of a hexahedron in VTK order.
pub const HEX_CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// Hex faces as outward counter-clockwise corner loops, each starting at the
/// face's lowest corner, paired with the neighbour cube offset.
///
/// Splitting a loop into (q0, q1, q2) and (q0, q2, q3) follows the same face
/// diagonals as the tetrahedral split.
const HEX_FACES: [([usize; 4], [i64; 3]); 6] = [
    ([0, 3, 2, 1], [0, 0, -1]),
    ([4, 5, 6, 7], [0, 0, 1]),
    ([0, 1, 5, 4], [0, -1, 0]),
    ([3, 7, 6, 2], [0, 1, 0]),
    ([0, 4, 7, 3], [-1, 0, 0]),
    ([1, 2, 6, 5], [1, 0, 0]),
];

/// Eight node indices of an axis-aligned hexahedron, in VTK order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HexCell(pub [usize; 8]);

/// Interior nodes, hexahedra and the exposed boundary of a voxelized part.
///
/// Node indices follow grid order (x fastest). Only nodes that are a corner
/// of at least one hexahedron are kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoxelMesh {
    pub node_count: usize,
    pub nodes: Vec<Point>,
    /// Boundary triangulation, wound outward
    pub triangles: Vec<TriangleIndex>,
    pub hexes: Vec<HexCell>,
    pub cell_size: f64,
    /// Grid coordinates of each hex's lowest corner
    #[serde(skip)]
    pub hex_origins: Vec<[usize; 3]>,
}

impl VoxelMesh {
    pub fn hex_count(&self) -> usize {
        self.hexes.len()
    }

    pub fn hex_volume(&self) -> f64 {
        self.cell_size.powi(3)
    }

    pub fn volume(&self) -> f64 {
        self.hex_count() as f64 * self.hex_volume()
    }
}

/// Emits one hexahedron per grid cube whose eight corners are all interior.
///
/// Fails with `SimError::MeshBuild` when fewer than `min_cells` cubes
/// qualify.
pub fn build_voxel_mesh(grid: &SignedDistanceGrid, min_cells: usize) -> Result<VoxelMesh> {
    let [nx, ny, nz] = grid.dims;
    let cell_index = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);

    let mut is_hex = vec![false; nx * ny * nz];
    let mut hex_origins = Vec::new();
    for k in 0..nz.saturating_sub(1) {
        for j in 0..ny.saturating_sub(1) {
            for i in 0..nx.saturating_sub(1) {
                let solid = HEX_CORNERS
                    .iter()
                    .all(|[di, dj, dk]| grid.is_interior(i + di, j + dj, k + dk));
                if solid {
                    is_hex[cell_index(i, j, k)] = true;
                    hex_origins.push([i, j, k]);
                }
            }
        }
    }

    if hex_origins.len() < min_cells {
        return Err(SimError::MeshBuild {
            interior_cells: hex_origins.len(),
            minimum: min_cells,
        });
    }

    // Renumber used grid nodes in grid order.
    let mut used = vec![false; grid.node_count()];
    for [i, j, k] in &hex_origins {
        for [di, dj, dk] in HEX_CORNERS {
            used[grid.index(i + di, j + dj, k + dk)] = true;
        }
    }
    let mut new_index = vec![usize::MAX; grid.node_count()];
    let mut nodes = Vec::new();
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let g = grid.index(i, j, k);
                if used[g] {
                    new_index[g] = nodes.len();
                    nodes.push(grid.node_position(i, j, k));
                }
            }
        }
    }

    let corner_ids = |[i, j, k]: [usize; 3]| -> [usize; 8] {
        HEX_CORNERS.map(|[di, dj, dk]| new_index[grid.index(i + di, j + dj, k + dk)])
    };
    let hexes: Vec<HexCell> = hex_origins.iter().map(|o| HexCell(corner_ids(*o))).collect();

    // A face is exposed when the neighbouring cube is not a hex. Cubes
    // outside the grid never are.
    let neighbour_is_hex = |[i, j, k]: [usize; 3], d: [i64; 3]| -> bool {
        let n = [i as i64 + d[0], j as i64 + d[1], k as i64 + d[2]];
        if n.iter().any(|c| *c < 0) {
            return false;
        }
        let [a, b, c] = n.map(|c| c as usize);
        a < nx && b < ny && c < nz && is_hex[cell_index(a, b, c)]
    };

    let mut triangles = Vec::new();
    for (origin, hex) in hex_origins.iter().zip(&hexes) {
        for (quad, dir) in HEX_FACES {
            if neighbour_is_hex(*origin, dir) {
                continue;
            }
            let q = quad.map(|c| hex.0[c]);
            triangles.push(TriangleIndex(q[0], q[1], q[2]));
            triangles.push(TriangleIndex(q[0], q[2], q[3]));
        }
    }

    info!(
        "Voxel mesh: {} nodes, {} hexes, {} boundary triangles",
        nodes.len(),
        hexes.len(),
        triangles.len()
    );

    Ok(VoxelMesh {
        node_count: nodes.len(),
        nodes,
        triangles,
        hexes,
        cell_size: grid.cell_size,
        hex_origins,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::mesh::SurfaceMesh;
    use crate::geom::mesh::tessellate::{BoxSolid, BoxTessellator, Tessellator};
    use crate::geom::sdf::voxelize;

    fn voxel_box(x: f64, y: f64, z: f64, h: f64) -> Result<VoxelMesh> {
        let surface = BoxTessellator.tessellate(&BoxSolid::from_dims(x, y, z))?;
        let grid = voxelize(&surface, h)?;
        build_voxel_mesh(&grid, DEFAULT_MIN_CELLS)
    }

    #[test]
    fn test_cube_counts() {
        let mesh = voxel_box(10.0, 10.0, 10.0, 2.0).unwrap();
        assert_eq!(mesh.node_count, 125);
        assert_eq!(mesh.nodes.len(), 125);
        assert_eq!(mesh.hex_count(), 64);
        // 6 faces of 4 x 4 squares, 2 triangles each
        assert_eq!(mesh.triangles.len(), 6 * 16 * 2);
        assert!((mesh.volume() - 512.0).abs() < 1e-9);
        // Grid order: first node is the lowest corner
        assert!(mesh.nodes[0].is_close(&Point::new(1.0, 1.0, 1.0)));
        assert!(mesh.nodes[1].is_close(&Point::new(3.0, 1.0, 1.0)));
    }

    #[test]
    fn test_hex_corner_order() {
        let mesh = voxel_box(10.0, 10.0, 10.0, 2.0).unwrap();
        let h = mesh.cell_size;
        for hex in &mesh.hexes {
            let base = mesh.nodes[hex.0[0]];
            for (c, [di, dj, dk]) in HEX_CORNERS.iter().enumerate() {
                let expected = Point::new(
                    base.x + *di as f64 * h,
                    base.y + *dj as f64 * h,
                    base.z + *dk as f64 * h,
                );
                assert!(mesh.nodes[hex.0[c]].is_close(&expected));
            }
        }
    }

    #[test]
    fn test_boundary_is_closed_and_outward() {
        let mesh = voxel_box(8.0, 6.0, 4.0, 1.0).unwrap();
        let boundary = SurfaceMesh::new(mesh.nodes.clone(), mesh.triangles.clone());
        boundary.validate_watertight().unwrap();
        // Outward winding gives the enclosed hex volume
        assert!((boundary.signed_volume() - mesh.volume()).abs() < 1e-9);
    }

    #[test]
    fn test_thin_part_fails() {
        let err = voxel_box(10.0, 10.0, 1.0, 2.0).unwrap_err();
        assert!(matches!(
            err,
            SimError::MeshBuild {
                interior_cells: 0,
                minimum: 8
            }
        ));
    }

    #[test]
    fn test_deterministic_build() {
        let a = voxel_box(5.5, 4.2, 3.9, 0.5).unwrap();
        let b = voxel_box(5.5, 4.2, 3.9, 0.5).unwrap();
        assert_eq!(a, b);
    }
}
