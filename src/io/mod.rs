//! File I/O for surfaces, jobs and results.
//!
//! Part geometry comes in as STL. Jobs and results are JSON; nodal fields
//! go out as legacy VTK.

pub mod json;
pub mod stl;
pub mod vtk;

pub use json::{read_job, to_json_line, write_job, write_result};
pub use stl::{StlFormat, read_stl, write_stl};
pub use vtk::{write_result_vtk, write_vtk};
