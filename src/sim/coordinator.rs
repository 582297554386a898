//! Runs a solidification job end to end and streams its results.
//!
//! ```text
//! SurfaceMesh ─► voxelize ─► build_voxel_mesh ─► tetrahedralize ─► SolidificationRun
//!                                                                      │
//!       mesh event ◄───────────────────────────────────────────────────┤
//!       timestep events (one per saved frame) ◄────────────────────────┤
//!       complete | status | error ◄────────────────────────────────────┘
//! ```
//!
//! Events travel over a bounded channel. A full channel blocks the producer
//! and a dropped receiver stops the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::UID;
use crate::error::{Result, SimError, Stage};
use crate::geom::mesh::SurfaceMesh;
use crate::geom::mesh::tetrahedralize::{TetrahedralMesh, tetrahedralize_voxels};
use crate::geom::mesh::voxel::{VoxelMesh, build_voxel_mesh};
use crate::geom::sdf::{cell_size_for_target_nodes, voxelize};
use crate::sim::config::{CastingConditions, SimulationConfig};
use crate::sim::materials::Material;
use crate::sim::result::{
    MeshPayload, RunSummary, SimulationResult, SurfaceMeshPayload, TemperatureRange,
    TimestepFrame,
};
use crate::sim::simulation::SolidificationRun;

/// Everything needed to run one casting simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationJob {
    pub surface: SurfaceMesh,
    pub material: Material,
    #[serde(default)]
    pub conditions: CastingConditions,
    #[serde(default)]
    pub config: SimulationConfig,
}

/// Why a run stopped early without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopState {
    Cancelled,
    Timeout,
}

/// Messages produced by a streaming run, in order:
/// `mesh`, `timestep`*, then one of `complete`, `status` or `error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    Mesh {
        mesh: MeshPayload,
    },
    Timestep {
        data: TimestepFrame,
        /// Index of the frame in the stream, starting at 0.
        step: usize,
        /// Completed fraction in [0, 1], not a percentage.
        progress: f64,
    },
    Complete {
        data: Box<SimulationResult>,
    },
    Status {
        state: StopState,
        time: f64,
        frames_emitted: usize,
    },
    Error {
        stage: Stage,
        message: String,
    },
}

impl SimEvent {
    fn error(e: &SimError) -> Self {
        SimEvent::Error {
            stage: e.stage(),
            message: e.to_string(),
        }
    }

    /// True for the last event of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SimEvent::Complete { .. } | SimEvent::Status { .. } | SimEvent::Error { .. }
        )
    }
}

/// Cooperative cancellation flag shared between a run and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed,
    Cancelled { time: f64 },
    TimedOut { time: f64 },
    Failed(SimError),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// Voxel and tetrahedral meshes for a job.
pub struct PreparedMesh {
    pub voxels: VoxelMesh,
    pub tets: TetrahedralMesh,
}

/// Voxelizes the job's surface and builds the volume meshes.
///
/// The cell size is `config.cell_size` when set, otherwise derived from
/// `config.target_nodes`.
pub fn prepare_mesh(job: &SimulationJob) -> Result<PreparedMesh> {
    let config = &job.config;
    let cell_size = match config.cell_size {
        Some(h) => h,
        None => {
            let bbox = job
                .surface
                .bounding_box()
                .ok_or_else(|| SimError::Geometry("surface mesh has no nodes".to_string()))?;
            cell_size_for_target_nodes(&bbox, config.target_nodes)
        }
    };
    let grid = voxelize(&job.surface, cell_size)?;
    let voxels = build_voxel_mesh(&grid, config.min_cells)?;
    let tets = tetrahedralize_voxels(&voxels);
    info!(
        "Meshed at {:.3} cell size: {} nodes, {} hexes, {} tets",
        cell_size,
        voxels.node_count,
        voxels.hex_count(),
        tets.tetrahedra_count()
    );
    Ok(PreparedMesh { voxels, tets })
}

/// Runs `job` on the current thread, passing each event to `emit`.
///
/// `emit` returns false when nobody is listening anymore, which stops the
/// run as if it had been cancelled.
fn execute<F>(job: &SimulationJob, run_id: &UID, cancel: &CancelToken, mut emit: F) -> RunOutcome
where
    F: FnMut(SimEvent) -> bool,
{
    let started = Instant::now();
    let deadline = job.config.timeout_secs.map(Duration::from_secs_f64);

    let fail = |e: SimError, emit: &mut F| {
        warn!("Run {} failed during {}: {e}", run_id.as_str(), e.stage());
        emit(SimEvent::error(&e));
        RunOutcome::Failed(e)
    };

    let checked = job
        .material
        .validate()
        .and_then(|_| job.conditions.validate(&job.material))
        .and_then(|_| job.config.validate());
    if let Err(e) = checked {
        return fail(e, &mut emit);
    }

    let mesh = match prepare_mesh(job) {
        Ok(mesh) => mesh,
        Err(e) => return fail(e, &mut emit),
    };
    let payload = MeshPayload {
        surface_mesh: SurfaceMeshPayload::from(&job.surface),
        voxel_mesh: mesh.voxels,
    };
    let tets = Arc::new(mesh.tets);

    let mut run = match SolidificationRun::new(
        tets,
        job.material.clone(),
        job.conditions,
        &job.config,
    ) {
        Ok(run) => run,
        Err(e) => return fail(e, &mut emit),
    };

    if !emit(SimEvent::Mesh {
        mesh: payload.clone(),
    }) {
        run.cancel();
        return RunOutcome::Cancelled { time: 0.0 };
    }

    let mut frames: Vec<TimestepFrame> = Vec::new();
    while !run.is_finished() {
        if cancel.is_cancelled() {
            run.cancel();
            info!("Run {} cancelled at t={:.1}s", run_id.as_str(), run.time());
            emit(SimEvent::Status {
                state: StopState::Cancelled,
                time: run.time(),
                frames_emitted: frames.len(),
            });
            return RunOutcome::Cancelled { time: run.time() };
        }
        if let Some(limit) = deadline {
            if started.elapsed() >= limit {
                run.cancel();
                warn!(
                    "Run {} hit its {:.1}s time limit at t={:.1}s",
                    run_id.as_str(),
                    limit.as_secs_f64(),
                    run.time()
                );
                emit(SimEvent::Status {
                    state: StopState::Timeout,
                    time: run.time(),
                    frames_emitted: frames.len(),
                });
                return RunOutcome::TimedOut { time: run.time() };
            }
        }

        match run.advance() {
            Ok(Some(frame)) => {
                let event = SimEvent::Timestep {
                    data: frame.clone(),
                    step: frames.len(),
                    progress: run.progress(),
                };
                frames.push(frame);
                if !emit(event) {
                    run.cancel();
                    return RunOutcome::Cancelled { time: run.time() };
                }
            }
            Ok(None) => {}
            Err(e) => return fail(e, &mut emit),
        }
    }

    let defect_analysis = run.summarize();
    let final_temperature = frames
        .last()
        .map(|f| TemperatureRange::of(&f.temperature))
        .unwrap_or_else(|| TemperatureRange::of(&[]));
    let summary = RunSummary {
        num_timesteps: frames.len(),
        simulated_time: run.time(),
        final_temperature,
        computation_time: started.elapsed().as_secs_f64(),
        defects_detected: defect_analysis.defect_count(),
    };
    info!(
        "Run {} complete: {} frames, {:.1}s simulated in {:.2}s, {} defects",
        run_id.as_str(),
        summary.num_timesteps,
        summary.simulated_time,
        summary.computation_time,
        summary.defects_detected
    );
    let result = SimulationResult {
        run_id: run_id.clone(),
        timesteps: frames,
        mesh: payload,
        material: job.material.clone(),
        defect_analysis,
        summary,
    };
    emit(SimEvent::Complete {
        data: Box::new(result),
    });
    RunOutcome::Completed
}

/// Runs `job` on the current thread and sends its events to `events`.
///
/// Blocks whenever the channel is full. If the receiver is dropped, the run
/// stops after the current step.
pub fn run_streaming(
    job: &SimulationJob,
    run_id: &UID,
    events: &Sender<SimEvent>,
    cancel: &CancelToken,
) -> RunOutcome {
    execute(job, run_id, cancel, |event| events.send(event).is_ok())
}

/// Runs `job` to completion on the current thread.
pub fn run_simulation(job: &SimulationJob) -> Result<SimulationResult> {
    let run_id = UID::new();
    let mut result = None;
    let outcome = execute(job, &run_id, &CancelToken::new(), |event| {
        if let SimEvent::Complete { data } = event {
            result = Some(*data);
        }
        true
    });
    match outcome {
        RunOutcome::Failed(e) => Err(e),
        RunOutcome::Cancelled { time } => Err(SimError::Cancelled { time }),
        RunOutcome::TimedOut { time } => Err(SimError::Timeout {
            time,
            limit_secs: job.config.timeout_secs.unwrap_or(0.0),
        }),
        RunOutcome::Completed => {
            result.ok_or_else(|| SimError::Internal("run completed without a result".to_string()))
        }
    }
}

/// A run executing on its own worker thread.
pub struct RunHandle {
    pub id: UID,
    pub events: Receiver<SimEvent>,
    cancel: CancelToken,
    worker: JoinHandle<RunOutcome>,
}

impl RunHandle {
    /// Requests cancellation. The worker stops before its next step.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Waits for the worker. Events not yet received are discarded.
    pub fn join(self) -> RunOutcome {
        let RunHandle { events, worker, .. } = self;
        drop(events);
        match worker.join() {
            Ok(outcome) => outcome,
            Err(_) => RunOutcome::Failed(SimError::Internal("worker thread panicked".to_string())),
        }
    }
}

/// Starts `job` on a new thread and returns a handle to its event stream.
pub fn spawn_simulation(job: SimulationJob) -> Result<RunHandle> {
    let id = UID::new();
    let (tx, rx) = bounded(job.config.channel_capacity.max(1));
    let cancel = CancelToken::new();

    let worker_id = id.clone();
    let worker_cancel = cancel.clone();
    let worker = std::thread::Builder::new()
        .name(format!("castsim-{}", id.short()))
        .spawn(move || run_streaming(&job, &worker_id, &tx, &worker_cancel))
        .map_err(|e| SimError::Internal(format!("cannot start worker thread: {e}")))?;

    Ok(RunHandle {
        id,
        events: rx,
        cancel,
        worker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::mesh::tessellate::{BoxSolid, BoxTessellator, Tessellator};
    use crossbeam_channel::unbounded;

    fn cube_job() -> SimulationJob {
        SimulationJob {
            surface: BoxTessellator
                .tessellate(&BoxSolid::from_dims(10.0, 10.0, 10.0))
                .unwrap(),
            material: Material::aluminum_a356(),
            conditions: CastingConditions::default(),
            config: SimulationConfig {
                cell_size: Some(2.0),
                ..Default::default()
            },
        }
    }

    /// Never solidifies, so only cancellation or the deadline ends it.
    fn insulated_job() -> SimulationJob {
        let mut job = cube_job();
        job.conditions.heat_transfer_coefficient = 0.0;
        job
    }

    #[test]
    fn test_run_simulation_completes() {
        let result = run_simulation(&cube_job()).unwrap();
        assert_eq!(result.mesh.voxel_mesh.node_count, 125);
        assert_eq!(result.mesh.voxel_mesh.hex_count(), 64);
        assert_eq!(result.summary.num_timesteps, result.timesteps.len());
        assert_eq!(result.timesteps[0].phase_counts.liquid, 125);
        assert_eq!(result.timesteps.last().unwrap().phase_counts.solid, 125);
        assert!(!result.defect_analysis.hotspots.is_empty());
        assert_eq!(
            result.summary.defects_detected,
            result.defect_analysis.defect_count()
        );
    }

    #[test]
    fn test_stream_order() {
        let (tx, rx) = unbounded();
        let outcome = run_streaming(&cube_job(), &UID::new(), &tx, &CancelToken::new());
        assert!(outcome.is_completed());
        drop(tx);
        let events: Vec<SimEvent> = rx.iter().collect();
        assert!(matches!(events[0], SimEvent::Mesh { .. }));
        assert!(matches!(events.last(), Some(SimEvent::Complete { .. })));
        for (i, event) in events[1..events.len() - 1].iter().enumerate() {
            match event {
                SimEvent::Timestep { step, progress, .. } => {
                    assert_eq!(*step, i);
                    assert!((0.0..=1.0).contains(progress));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn test_open_surface_reports_error_before_mesh() {
        let mut job = cube_job();
        job.surface.triangles.pop();
        let (tx, rx) = unbounded();
        let outcome = run_streaming(&job, &UID::new(), &tx, &CancelToken::new());
        assert!(matches!(outcome, RunOutcome::Failed(SimError::Geometry(_))));
        drop(tx);
        let events: Vec<SimEvent> = rx.iter().collect();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SimEvent::Error { stage, .. } => assert_eq!(*stage, Stage::Voxelize),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_timeout_status() {
        let mut job = insulated_job();
        job.config.timeout_secs = Some(1e-6);
        let (tx, rx) = unbounded();
        let outcome = run_streaming(&job, &UID::new(), &tx, &CancelToken::new());
        assert!(matches!(outcome, RunOutcome::TimedOut { .. }));
        drop(tx);
        let last = rx.iter().last().unwrap();
        let json = serde_json::to_value(&last).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["state"], "timeout");
    }

    #[test]
    fn test_dropped_receiver_stops_run() {
        let (tx, rx) = bounded(4);
        drop(rx);
        let outcome = run_streaming(&insulated_job(), &UID::new(), &tx, &CancelToken::new());
        assert!(matches!(outcome, RunOutcome::Cancelled { .. }));
    }

    #[test]
    fn test_spawned_run_can_be_cancelled() {
        let mut job = insulated_job();
        job.config.channel_capacity = 1;
        let handle = spawn_simulation(job).unwrap();
        let first = handle.events.recv().unwrap();
        assert!(matches!(first, SimEvent::Mesh { .. }));
        handle.cancel();

        let mut last = None;
        for event in handle.events.iter() {
            let terminal = event.is_terminal();
            last = Some(event);
            if terminal {
                break;
            }
        }
        match last {
            Some(SimEvent::Status { state, .. }) => assert_eq!(state, StopState::Cancelled),
            other => panic!("unexpected final event {other:?}"),
        }
        assert!(matches!(handle.join(), RunOutcome::Cancelled { .. }));
    }
}
