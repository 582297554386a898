use std::sync::Arc;

use log::{debug, info};

use crate::error::Result;
use crate::geom::mesh::tetrahedralize::TetrahedralMesh;
use crate::sim::config::{CastingConditions, SimulationConfig};
use crate::sim::defects::{DefectSummary, SolidificationTracker};
use crate::sim::heat_transfer::{SimulationState, SolverStatus, ThermalSolver};
use crate::sim::materials::Material;
use crate::sim::result::TimestepFrame;

/// Slack when comparing simulated time against save and horizon marks.
const TIME_EPS: f64 = 1e-9;

/// A solidification run that produces frames one step at a time.
///
/// Frames are saved at t = 0, whenever the simulated time crosses a
/// `save_interval` boundary, and at the terminal step (fully solid or the
/// horizon reached). Steps are shortened to end on the next save mark, so
/// frames stay on the save grid after the solver halves a step.
/// Iterating yields only saved frames.
pub struct SolidificationRun {
    solver: ThermalSolver,
    state: SimulationState,
    tracker: SolidificationTracker,
    material: Material,
    time_step: f64,
    save_interval: f64,
    total_time: f64,
    next_save: f64,
    steps: usize,
    frames_emitted: usize,
    started: bool,
    finished: bool,
}

impl SolidificationRun {
    /// Validates the inputs and assembles the solver.
    pub fn new(
        mesh: Arc<TetrahedralMesh>,
        material: Material,
        conditions: CastingConditions,
        config: &SimulationConfig,
    ) -> Result<Self> {
        material.validate()?;
        conditions.validate(&material)?;
        config.validate()?;

        let tracker = SolidificationTracker::new(&mesh, &material, config)?;
        let mut solver = ThermalSolver::new(mesh, material.clone(), conditions, config);
        let state = solver.assemble()?;
        info!(
            "Solidification run: {} nodes, {} from {:.1} °C, dt={}s, horizon {}s",
            state.temperatures.len(),
            material.name,
            conditions.pour_temperature,
            config.time_step,
            config.total_time
        );

        Ok(Self {
            solver,
            state,
            tracker,
            material,
            time_step: config.time_step,
            save_interval: config.save_interval,
            total_time: config.total_time,
            next_save: 0.0,
            steps: 0,
            frames_emitted: 0,
            started: false,
            finished: false,
        })
    }

    /// Takes one solver step, or emits the initial frame on the first call.
    ///
    /// Returns the frame if this step was saved. After the terminal frame
    /// the run is finished and further calls return `Ok(None)`.
    pub fn advance(&mut self) -> Result<Option<TimestepFrame>> {
        if self.finished {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            self.next_save = self.save_interval;
            return self.snapshot().map(Some);
        }

        let mut dt = self.time_step.min(self.total_time - self.state.time);
        // Land on the next save mark after a shortened step
        let to_save = self.next_save - self.state.time;
        if to_save > TIME_EPS {
            dt = dt.min(to_save);
        }
        let report = match self.solver.step(&mut self.state, dt) {
            Ok(report) => report,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };
        self.steps += 1;
        debug!(
            "Step {} t={:.3}s dt={:.4}s ({} attempts, {} iterations)",
            self.steps, self.state.time, report.dt, report.attempts, report.iterations
        );

        let solid = self.solver.is_fully_solid(&self.state);
        let terminal = solid || self.state.time >= self.total_time - TIME_EPS;
        if !terminal && self.state.time < self.next_save - TIME_EPS {
            return Ok(None);
        }
        while self.next_save <= self.state.time + TIME_EPS {
            self.next_save += self.save_interval;
        }

        let frame = self.snapshot()?;
        if terminal {
            self.solver.mark_converged();
            self.finished = true;
            info!(
                "Run finished at t={:.1}s after {} steps ({})",
                self.state.time,
                self.steps,
                if solid { "fully solid" } else { "horizon reached" }
            );
        }
        Ok(Some(frame))
    }

    fn snapshot(&mut self) -> Result<TimestepFrame> {
        let defects = self
            .tracker
            .observe(self.state.time, &self.state.temperatures)?;
        self.frames_emitted += 1;
        Ok(TimestepFrame::new(
            self.state.time,
            self.state.temperatures.clone(),
            &self.material,
            defects.hotspot_nodes,
            defects.porosity_risk_nodes,
        ))
    }

    /// Stops the run. Frames already produced stay valid.
    pub fn cancel(&mut self) {
        self.solver.mark_cancelled();
        self.finished = true;
    }

    /// Fraction done in [0, 1]: the larger of elapsed time over the horizon
    /// and the solid share of the nodes.
    pub fn progress(&self) -> f64 {
        if self.finished {
            return 1.0;
        }
        let temps = &self.state.temperatures;
        let solid = temps.iter().filter(|t| **t < self.material.solidus).count();
        let solid_fraction = if temps.is_empty() {
            0.0
        } else {
            solid as f64 / temps.len() as f64
        };
        (self.state.time / self.total_time).max(solid_fraction).min(1.0)
    }

    /// Defect summary over the frames saved so far.
    pub fn summarize(&self) -> DefectSummary {
        self.tracker.summarize()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn status(&self) -> SolverStatus {
        self.solver.status()
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.state.time
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn frames_emitted(&self) -> usize {
        self.frames_emitted
    }
}

impl Iterator for SolidificationRun {
    type Item = Result<TimestepFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            match self.advance() {
                Ok(Some(frame)) => return Some(Ok(frame)),
                Ok(None) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
