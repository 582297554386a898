use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;

use crate::error::{Result, SimError};
use crate::geom::mesh::tetrahedralize::TetrahedralMesh;
use crate::sim::config::{CastingConditions, SimulationConfig};
use crate::sim::materials::Material;

use super::assembly::{ThermalSystem, assemble_system};
use super::boundary::BoundaryCondition;
use super::sparse::{SparseSolverConfig, pcg_solve};

/// Lifecycle of a thermal solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    Uninitialized,
    Assembled,
    Stepping,
    Converged,
    Diverged,
    Cancelled,
}

impl SolverStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SolverStatus::Converged | SolverStatus::Diverged | SolverStatus::Cancelled
        )
    }
}

/// Mutable state of a run, owned by the caller and lent to each step.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    /// Number of accepted steps.
    pub version: u64,
    /// Simulated time in seconds.
    pub time: f64,
    /// Nodal temperatures in °C.
    pub temperatures: Vec<f64>,
    /// Temperatures before the last accepted step.
    pub previous: Vec<f64>,
    pub liquid_fraction: Vec<f64>,
}

/// What an accepted step did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Time step actually taken, after any halving.
    pub dt: f64,
    pub attempts: usize,
    pub iterations: usize,
    pub relative_residual: f64,
}

/// Settings taken from [`SimulationConfig`].
#[derive(Debug, Clone, Copy)]
struct StepSettings {
    length_scale: f64,
    max_retries: usize,
    divergence_residual: f64,
    pcg: SparseSolverConfig,
}

/// Implicit enthalpy-method heat conduction solver on a tetrahedral mesh.
///
/// Backward Euler with the effective heat capacity lagged from the start of
/// the step. After each linear solve, the nodal enthalpy is advanced by the
/// energy the linear system released and converted back to temperature, so
/// latent heat is not lost when a node crosses the freezing range in one
/// step.
pub struct ThermalSolver {
    mesh: Arc<TetrahedralMesh>,
    material: Material,
    conditions: CastingConditions,
    boundary: BoundaryCondition,
    settings: StepSettings,
    system: Option<ThermalSystem>,
    operator_fault: Option<String>,
    status: SolverStatus,
}

impl ThermalSolver {
    pub fn new(
        mesh: Arc<TetrahedralMesh>,
        material: Material,
        conditions: CastingConditions,
        config: &SimulationConfig,
    ) -> Self {
        Self {
            mesh,
            boundary: BoundaryCondition::ambient(
                conditions.heat_transfer_coefficient,
                conditions.ambient_temperature,
            ),
            material,
            conditions,
            settings: StepSettings {
                length_scale: config.length_scale,
                max_retries: config.max_retries,
                divergence_residual: config.divergence_residual,
                pcg: config.solver,
            },
            system: None,
            operator_fault: None,
            status: SolverStatus::Uninitialized,
        }
    }

    pub fn status(&self) -> SolverStatus {
        self.status
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn system(&self) -> Option<&ThermalSystem> {
        self.system.as_ref()
    }

    /// Builds the global operators and returns the initial state with every
    /// node at the pour temperature.
    pub fn assemble(&mut self) -> Result<SimulationState> {
        if self.status != SolverStatus::Uninitialized {
            return Err(SimError::InvalidInput(format!(
                "solver already assembled (status {:?})",
                self.status
            )));
        }
        let system = assemble_system(
            &self.mesh,
            self.material.thermal_conductivity,
            self.settings.length_scale,
        )?;

        self.operator_fault = system
            .stiffness
            .diagonal()
            .iter()
            .position(|d| !(*d > 0.0))
            .map(|i| {
                format!(
                    "diffusion operator has non-positive diagonal at node {i} (conductivity {})",
                    self.material.thermal_conductivity
                )
            });
        if let Some(fault) = &self.operator_fault {
            warn!("{fault}");
        }

        debug!(
            "Assembled {} nodes, {} non-zeros, boundary area {:.3e} m^2",
            system.node_count(),
            system.stiffness.nnz(),
            system.total_boundary_area()
        );

        let n = system.node_count();
        let t0 = self.conditions.pour_temperature;
        self.system = Some(system);
        self.status = SolverStatus::Assembled;
        Ok(SimulationState {
            version: 0,
            time: 0.0,
            temperatures: vec![t0; n],
            previous: vec![t0; n],
            liquid_fraction: vec![self.material.liquid_fraction(t0); n],
        })
    }

    /// Advances `state` by `dt` seconds.
    ///
    /// A failed attempt is retried with half the time step, up to
    /// `max_retries` times, before the solver is marked diverged.
    pub fn step(&mut self, state: &mut SimulationState, dt: f64) -> Result<StepReport> {
        match self.status {
            SolverStatus::Assembled | SolverStatus::Stepping => {}
            other => {
                return Err(SimError::InvalidInput(format!(
                    "cannot step a solver in state {other:?}"
                )));
            }
        }
        if !(dt > 0.0) {
            return Err(SimError::InvalidInput(format!(
                "time step must be positive, got {dt}"
            )));
        }
        self.status = SolverStatus::Stepping;

        let attempts = self.settings.max_retries + 1;
        let mut dt_try = dt;
        let mut last_reason = String::new();
        for attempt in 1..=attempts {
            match self.try_step(state, dt_try) {
                Ok((temperatures, iterations, relative_residual)) => {
                    state.previous = std::mem::replace(&mut state.temperatures, temperatures);
                    state.time += dt_try;
                    state.version += 1;
                    state.liquid_fraction = state
                        .temperatures
                        .iter()
                        .map(|t| self.material.liquid_fraction(*t))
                        .collect();
                    return Ok(StepReport {
                        dt: dt_try,
                        attempts: attempt,
                        iterations,
                        relative_residual,
                    });
                }
                Err(reason) => {
                    warn!(
                        "Step at t={:.3}s, dt={dt_try:.4}s failed ({attempt}/{attempts}): {reason}",
                        state.time
                    );
                    last_reason = reason;
                    dt_try *= 0.5;
                }
            }
        }

        self.status = SolverStatus::Diverged;
        Err(SimError::SolverDivergence {
            time: state.time,
            attempts,
            reason: last_reason,
        })
    }

    /// One backward-Euler solve. Leaves `state` untouched.
    fn try_step(
        &self,
        state: &SimulationState,
        dt: f64,
    ) -> std::result::Result<(Vec<f64>, usize, f64), String> {
        if let Some(fault) = &self.operator_fault {
            return Err(fault.clone());
        }
        let system = self
            .system
            .as_ref()
            .ok_or_else(|| "solver is not assembled".to_string())?;
        let m = &self.material;
        let t_old = &state.temperatures;
        let n = t_old.len();

        let c_eff: Vec<f64> = t_old.iter().map(|t| m.effective_specific_heat(*t)).collect();
        let mut shift = vec![0.0; n];
        let mut rhs = vec![0.0; n];
        for i in 0..n {
            let cap = m.density * c_eff[i] * system.lumped_volume[i] / dt;
            let (bc_diag, bc_rhs) = self.boundary.nodal_terms(system.boundary_area[i]);
            shift[i] = cap + bc_diag;
            rhs[i] = cap * t_old[i] + bc_rhs;
        }

        let mut x = t_old.clone();
        let report = pcg_solve(&system.stiffness, &shift, &rhs, &mut x, self.settings.pcg)
            .map_err(|e| e.to_string())?;
        if !report.converged {
            if report.relative_residual > self.settings.divergence_residual {
                return Err(format!(
                    "linear solve stalled at relative residual {:.3e} after {} iterations",
                    report.relative_residual, report.iterations
                ));
            }
            debug!(
                "Accepting unconverged solve, relative residual {:.3e}",
                report.relative_residual
            );
        }

        let ambient = self.conditions.ambient_temperature;
        let mut t_new = Vec::with_capacity(n);
        for i in 0..n {
            let h = m.enthalpy(t_old[i]) + c_eff[i] * (x[i] - t_old[i]);
            let t = m.temperature_from_enthalpy(h);
            if !t.is_finite() {
                return Err(format!("non-finite temperature at node {i}"));
            }
            t_new.push(t.max(ambient));
        }
        Ok((t_new, report.iterations, report.relative_residual))
    }

    /// True once every node is below the solidus.
    pub fn is_fully_solid(&self, state: &SimulationState) -> bool {
        state.temperatures.iter().all(|t| *t < self.material.solidus)
    }

    pub fn mark_converged(&mut self) {
        if !self.status.is_terminal() {
            self.status = SolverStatus::Converged;
        }
    }

    pub fn mark_cancelled(&mut self) {
        if !self.status.is_terminal() {
            self.status = SolverStatus::Cancelled;
        }
    }
}
