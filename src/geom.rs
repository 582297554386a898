pub mod bboxes;
pub mod mesh;
pub mod point;
pub mod sdf;
pub mod tetrahedron;
pub mod triangles;
pub mod vector;
pub mod voxel_grid;

/// Geometric precision
const EPS: f64 = 1e-13;
