//! Capability seam between solid boundary representations and the voxelizer.

use crate::error::{Result, SimError};
use crate::geom::mesh::SurfaceMesh;
use crate::io::stl::read_stl;
use crate::{Point, TriangleIndex};
use log::debug;
use std::path::Path;

/// Turns a boundary representation into a watertight triangulated surface.
///
/// The voxelizer only ever sees the returned `SurfaceMesh`, so any
/// geometry kernel can sit behind this trait.
pub trait Tessellator {
    type Solid: ?Sized;

    fn tessellate(&self, solid: &Self::Solid) -> Result<SurfaceMesh>;
}

/// Axis-aligned box given by two opposite corners.
#[derive(Debug, Clone, Copy)]
pub struct BoxSolid {
    pub min: Point,
    pub max: Point,
}

impl BoxSolid {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Box with one corner at the origin.
    pub fn from_dims(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point::new(0.0, 0.0, 0.0), Point::new(x, y, z))
    }
}

/// Tessellates a `BoxSolid` into 8 nodes and 12 outward-wound triangles.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoxTessellator;

/// Box faces as corner quads, counter-clockwise seen from outside.
const BOX_FACES: [[usize; 4]; 6] = [
    [0, 2, 3, 1], // z min
    [4, 5, 7, 6], // z max
    [0, 1, 5, 4], // y min
    [2, 6, 7, 3], // y max
    [0, 4, 6, 2], // x min
    [1, 3, 7, 5], // x max
];

impl Tessellator for BoxTessellator {
    type Solid = BoxSolid;

    fn tessellate(&self, solid: &BoxSolid) -> Result<SurfaceMesh> {
        let (a, b) = (solid.min, solid.max);
        let dims = [b.x - a.x, b.y - a.y, b.z - a.z];
        if dims.iter().any(|d| !d.is_finite() || *d <= 0.0) {
            return Err(SimError::Geometry(format!(
                "box dimensions must be positive, got {:?}",
                dims
            )));
        }

        // Corner c = i + 2j + 4k
        let mut nodes = Vec::with_capacity(8);
        for k in 0..2 {
            for j in 0..2 {
                for i in 0..2 {
                    nodes.push(Point::new(
                        if i == 0 { a.x } else { b.x },
                        if j == 0 { a.y } else { b.y },
                        if k == 0 { a.z } else { b.z },
                    ));
                }
            }
        }

        let triangles = BOX_FACES
            .iter()
            .flat_map(|&[q0, q1, q2, q3]| [[q0, q1, q2], [q0, q2, q3]])
            .map(TriangleIndex::from)
            .collect();

        Ok(SurfaceMesh::new(nodes, triangles))
    }
}

/// Loads an STL file and checks that it encloses a volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct StlTessellator;

impl Tessellator for StlTessellator {
    type Solid = Path;

    fn tessellate(&self, path: &Path) -> Result<SurfaceMesh> {
        let mesh = read_stl(path).map_err(|e| SimError::Io(format!("{e:#}")))?;
        debug!(
            "Loaded {} ({} nodes, {} triangles)",
            path.display(),
            mesh.node_count(),
            mesh.triangle_count()
        );
        mesh.validate_watertight()?;
        Ok(mesh)
    }
}
