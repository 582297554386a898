pub mod error;
pub mod geom;
pub mod io;
pub mod sim;
mod uid;

// Prelude
pub use error::{Result, SimError, Stage};
pub use geom::point::Point;
pub use geom::triangles::TriangleIndex;
pub use geom::vector::Vector;
pub use uid::UID;

pub use geom::mesh::SurfaceMesh;
pub use sim::config::{CastingConditions, SimulationConfig};
pub use sim::coordinator::{
    CancelToken, RunHandle, RunOutcome, SimEvent, SimulationJob, run_simulation, run_streaming,
    spawn_simulation,
};
pub use sim::materials::{Material, MaterialLibrary};
pub use sim::result::{SimulationResult, TimestepFrame};
