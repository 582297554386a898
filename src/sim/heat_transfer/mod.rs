//! Finite element heat conduction with phase change.
//!
//! Linear tetrahedral elements, lumped capacity and an enthalpy correction
//! after each implicit step.
//!
//! # Architecture
//!
//! ```text
//! TetrahedralMesh ──► assemble_system() ──► ThermalSystem ──► ThermalSolver
//!                                                               │
//!                                                    step() ──► pcg_solve()
//! ```
//!
//! The conductivity matrix is assembled once per run. Each step only rebuilds
//! the diagonal shift (capacity and surface convection) and the right-hand
//! side, so the matrix stays a symmetric M-matrix for the whole run.

pub mod assembly;
pub mod boundary;
pub mod solver;
pub mod sparse;

pub use assembly::{ThermalSystem, assemble_system};
pub use boundary::BoundaryCondition;
pub use solver::{SimulationState, SolverStatus, StepReport, ThermalSolver};
pub use sparse::{CsrMatrix, PcgFailure, PcgReport, SparseSolverConfig, pcg_solve};
