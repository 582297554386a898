//! Signed-distance voxelization of a closed triangulated surface.
//!
//! Grid nodes sit at the centres of cells laid over the surface's bounding
//! box, with one extra layer of nodes on every side. The extra layer lies
//! outside the part, so every interior cube is surrounded by exterior nodes.

use crate::error::{Result, SimError};
use crate::geom::bboxes::BoundingBox;
use crate::geom::mesh::SurfaceMesh;
use crate::geom::triangles::line_x_triangle_intersect;
use crate::geom::voxel_grid::VoxelGrid;
use crate::Point;
use log::{debug, info};
use rayon::prelude::*;

/// Upper bound on the number of grid nodes a single run may allocate.
pub const MAX_GRID_NODES: usize = 20_000_000;

/// Fractions of a cell by which parity rays are shifted off grid lines.
const RAY_JITTER_Y: f64 = 1.234_567e-6;
const RAY_JITTER_Z: f64 = 2.345_678e-6;

/// Regular grid of signed distances: negative inside, positive outside.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedDistanceGrid {
    /// Position of node `(0, 0, 0)`
    pub origin: Point,
    pub cell_size: f64,
    /// Node counts along x, y and z
    pub dims: [usize; 3],
    /// Distances in x-fastest order
    pub distances: Vec<f64>,
}

impl SignedDistanceGrid {
    pub fn node_count(&self) -> usize {
        self.distances.len()
    }

    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    pub fn node_position(&self, i: usize, j: usize, k: usize) -> Point {
        Point::new(
            self.origin.x + i as f64 * self.cell_size,
            self.origin.y + j as f64 * self.cell_size,
            self.origin.z + k as f64 * self.cell_size,
        )
    }

    pub fn distance(&self, i: usize, j: usize, k: usize) -> f64 {
        self.distances[self.index(i, j, k)]
    }

    pub fn is_interior(&self, i: usize, j: usize, k: usize) -> bool {
        self.distance(i, j, k) < 0.0
    }

    pub fn interior_count(&self) -> usize {
        self.distances.iter().filter(|d| **d < 0.0).count()
    }
}

/// Cell size giving roughly `target` grid nodes over `bbox`.
pub fn cell_size_for_target_nodes(bbox: &BoundingBox, target: usize) -> f64 {
    let target = target.max(1) as f64;
    let volume = bbox.volume();
    if volume > 0.0 {
        (volume / target).cbrt()
    } else {
        bbox.diagonal() / target.cbrt()
    }
}

/// Samples the signed distance to `surface` on a regular grid.
///
/// Fails with `SimError::Geometry` when the surface is not watertight and
/// with `SimError::InvalidInput` for a bad cell size. The result depends only
/// on the input: repeated calls give identical grids.
pub fn voxelize(surface: &SurfaceMesh, cell_size: f64) -> Result<SignedDistanceGrid> {
    if !cell_size.is_finite() || cell_size <= 0.0 {
        return Err(SimError::InvalidInput(format!(
            "cell size must be positive, got {cell_size}"
        )));
    }
    surface.validate_watertight()?;
    let bbox = surface
        .bounding_box()
        .ok_or_else(|| SimError::Geometry("surface mesh has no nodes".into()))?;

    let h = cell_size;
    let extent = bbox.extent();
    let mut dims = [0usize; 3];
    let mut origin = [0.0f64; 3];
    for a in 0..3 {
        let cells = ((extent[a] / h) - 1e-9).ceil().max(1.0) as usize;
        // Centre the cell block on the box, then step back to the padding node.
        let start = bbox.min.axis(a) - 0.5 * (cells as f64 * h - extent[a]);
        origin[a] = start - 0.5 * h;
        dims[a] = cells + 2;
    }
    let total = dims[0]
        .checked_mul(dims[1])
        .and_then(|n| n.checked_mul(dims[2]))
        .unwrap_or(usize::MAX);
    if total > MAX_GRID_NODES {
        return Err(SimError::InvalidInput(format!(
            "cell size {h} gives {total} grid nodes (limit {MAX_GRID_NODES})"
        )));
    }

    let grid_shell = SignedDistanceGrid {
        origin: Point::from(origin),
        cell_size: h,
        dims,
        distances: Vec::new(),
    };
    info!(
        "Voxelizing {} triangles on a {}x{}x{} grid (cell {:.4})",
        surface.triangle_count(),
        dims[0],
        dims[1],
        dims[2],
        h
    );

    let inside = classify_columns(surface, &grid_shell);

    let buckets = VoxelGrid::new(surface, 2.0 * h);
    let [nx, ny, _] = dims;
    let distances: Vec<f64> = (0..total)
        .into_par_iter()
        .map(|idx| {
            let i = idx % nx;
            let j = (idx / nx) % ny;
            let k = idx / (nx * ny);
            let d = buckets.nearest_distance(surface, grid_shell.node_position(i, j, k));
            if inside[idx] { -d } else { d }
        })
        .collect();

    let grid = SignedDistanceGrid {
        distances,
        ..grid_shell
    };
    debug!("{} of {} grid nodes inside", grid.interior_count(), total);
    Ok(grid)
}

/// Inside/outside flags in grid order, by ray parity along +x.
///
/// Each grid column `(j, k)` casts one line, shifted slightly in y and z, and
/// a node is inside when an odd number of surface crossings lie beyond it.
fn classify_columns(surface: &SurfaceMesh, grid: &SignedDistanceGrid) -> Vec<bool> {
    let [nx, ny, nz] = grid.dims;
    let h = grid.cell_size;

    // yz extents of each triangle for a cheap rejection test
    let tri_yz: Vec<[f64; 4]> = surface
        .triangles
        .iter()
        .map(|t| {
            let (a, b, c) = surface.triangle_points(t);
            [
                a.y.min(b.y).min(c.y),
                a.y.max(b.y).max(c.y),
                a.z.min(b.z).min(c.z),
                a.z.max(b.z).max(c.z),
            ]
        })
        .collect();

    let columns: Vec<Vec<bool>> = (0..ny * nz)
        .into_par_iter()
        .map(|col| {
            let (j, k) = (col % ny, col / ny);
            let mut origin = grid.node_position(0, j, k);
            origin.y += RAY_JITTER_Y * h;
            origin.z += RAY_JITTER_Z * h;

            let mut hits: Vec<f64> = surface
                .triangles
                .iter()
                .zip(&tri_yz)
                .filter(|(_, yz)| {
                    origin.y >= yz[0] && origin.y <= yz[1] && origin.z >= yz[2] && origin.z <= yz[3]
                })
                .filter_map(|(t, _)| {
                    let (a, b, c) = surface.triangle_points(t);
                    line_x_triangle_intersect(origin, a, b, c)
                })
                .collect();
            hits.sort_by(f64::total_cmp);

            (0..nx)
                .map(|i| {
                    let x = grid.node_position(i, j, k).x;
                    let beyond = hits.len() - hits.partition_point(|hx| *hx <= x);
                    beyond % 2 == 1
                })
                .collect()
        })
        .collect();

    let mut inside = Vec::with_capacity(nx * ny * nz);
    for col in columns {
        inside.extend(col);
    }
    inside
}
