//! Error taxonomy for the meshing and solidification pipeline.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type used throughout the simulation core.
pub type Result<T> = std::result::Result<T, SimError>;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    Voxelize,
    MeshBuild,
    Solve,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Input => "input",
            Stage::Voxelize => "voxelize",
            Stage::MeshBuild => "mesh build",
            Stage::Solve => "solve",
        };
        f.write_str(s)
    }
}

/// Errors produced by the simulation core.
#[derive(Debug, Clone, Error)]
pub enum SimError {
    /// Surface is not watertight or is degenerate. The caller may retry with
    /// a fallback geometry.
    #[error("geometry error: {0}")]
    Geometry(String),

    /// Too few fully interior grid cubes to build a volume mesh.
    #[error("mesh build error: {interior_cells} interior cells (minimum {minimum})")]
    MeshBuild {
        interior_cells: usize,
        minimum: usize,
    },

    /// The implicit step kept failing after halving the time step.
    #[error("solver diverged at t={time:.3}s after {attempts} attempts: {reason}")]
    SolverDivergence {
        time: f64,
        attempts: usize,
        reason: String,
    },

    /// Run stopped on request.
    #[error("simulation cancelled at t={time:.3}s")]
    Cancelled { time: f64 },

    /// Wall-clock budget for the run expired.
    #[error("simulation timed out at t={time:.3}s (limit {limit_secs:.1}s)")]
    Timeout { time: f64, limit_secs: f64 },

    /// Invalid material, casting conditions or configuration.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("i/o error: {0}")]
    Io(String),

    /// A worker thread failed outside the simulation itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SimError {
    /// Stage to report to the end user.
    pub fn stage(&self) -> Stage {
        match self {
            SimError::Geometry(_) => Stage::Voxelize,
            SimError::MeshBuild { .. } => Stage::MeshBuild,
            SimError::SolverDivergence { .. } => Stage::Solve,
            SimError::Cancelled { .. } | SimError::Timeout { .. } => Stage::Solve,
            SimError::InvalidInput(_) | SimError::Io(_) => Stage::Input,
            SimError::Internal(_) => Stage::Solve,
        }
    }

    /// True for cooperative stops (explicit cancel or deadline), which are not
    /// failures of the computation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SimError::Cancelled { .. } | SimError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_mapping() {
        assert_eq!(SimError::Geometry("open edge".into()).stage(), Stage::Voxelize);
        assert_eq!(
            SimError::MeshBuild {
                interior_cells: 2,
                minimum: 8
            }
            .stage(),
            Stage::MeshBuild
        );
        assert_eq!(Stage::MeshBuild.to_string(), "mesh build");
    }

    #[test]
    fn test_cancellation_is_not_failure() {
        assert!(SimError::Cancelled { time: 1.0 }.is_cancellation());
        assert!(
            SimError::Timeout {
                time: 1.0,
                limit_secs: 5.0
            }
            .is_cancellation()
        );
        assert!(!SimError::Geometry("x".into()).is_cancellation());
    }

    #[test]
    fn test_messages() {
        let e = SimError::SolverDivergence {
            time: 2.5,
            attempts: 4,
            reason: "non-finite temperature".into(),
        };
        assert_eq!(
            e.to_string(),
            "solver diverged at t=2.500s after 4 attempts: non-finite temperature"
        );
    }
}
