use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgGroup, Parser};
use env_logger::Env;
use log::{debug, info};

use castsim::geom::mesh::tessellate::{BoxSolid, BoxTessellator, StlTessellator, Tessellator};
use castsim::io::{read_job, to_json_line, write_result, write_result_vtk};
use castsim::{
    CastingConditions, MaterialLibrary, RunOutcome, SimEvent, SimulationConfig, SimulationJob,
    SimulationResult, SurfaceMesh, spawn_simulation,
};

/// Superheat above liquidus used when no pour temperature is given.
const DEFAULT_SUPERHEAT: f64 = 85.0;

/// Casting solidification simulator
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(group(ArgGroup::new("geometry").required(true).args(["box_dims", "input", "job"])))]
struct Args {
    /// Box part dimensions in mm, e.g. `--box 100,50,20`
    #[clap(long = "box", value_delimiter = ',')]
    box_dims: Option<Vec<f64>>,

    /// Watertight STL surface of the part (mm)
    #[clap(short, long)]
    input: Option<PathBuf>,

    /// Complete job file (JSON); other options override its values
    #[clap(long)]
    job: Option<PathBuf>,

    /// Alloy: `aluminum` or `steel`
    #[clap(short, long, default_value = "aluminum")]
    material: String,

    /// Pour temperature in °C [default: liquidus + 85]
    #[clap(long)]
    pour: Option<f64>,

    /// Ambient temperature in °C
    #[clap(long)]
    ambient: Option<f64>,

    /// Heat transfer coefficient in W/(m^2*K)
    #[clap(long)]
    htc: Option<f64>,

    /// Grid cell size in mm [default: derived from the target node count]
    #[clap(long)]
    cell_size: Option<f64>,

    /// Simulation configuration file (JSON)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Wall-clock limit in seconds
    #[clap(long)]
    timeout: Option<f64>,

    /// Print every event as a JSON line on stdout
    #[clap(long)]
    stream: bool,

    /// Name of a `.json` file for the full result
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Name of a `.vtk` file for the final nodal fields
    #[clap(long)]
    vtk: Option<PathBuf>,
}

fn build_job(args: &Args) -> Result<SimulationJob> {
    let mut job = match &args.job {
        Some(path) => read_job(path)?,
        None => {
            let library = MaterialLibrary::with_presets();
            let material = library.get(&args.material).cloned().ok_or_else(|| {
                anyhow!(
                    "Unknown material '{}' (available: {})",
                    args.material,
                    library.keys().join(", ")
                )
            })?;
            let config = match &args.config {
                Some(path) => SimulationConfig::from_json_file(path)?,
                None => SimulationConfig::default(),
            };
            let conditions = CastingConditions {
                pour_temperature: material.liquidus + DEFAULT_SUPERHEAT,
                ..Default::default()
            };
            SimulationJob {
                surface: load_surface(args)?,
                material,
                conditions,
                config,
            }
        }
    };

    if let Some(t) = args.pour {
        job.conditions.pour_temperature = t;
    }
    if let Some(t) = args.ambient {
        job.conditions.ambient_temperature = t;
    }
    if let Some(h) = args.htc {
        job.conditions.heat_transfer_coefficient = h;
    }
    if args.cell_size.is_some() {
        job.config.cell_size = args.cell_size;
    }
    if args.timeout.is_some() {
        job.config.timeout_secs = args.timeout;
    }
    Ok(job)
}

fn load_surface(args: &Args) -> Result<SurfaceMesh> {
    if let Some(dims) = &args.box_dims {
        let &[x, y, z] = dims.as_slice() else {
            bail!("--box needs three dimensions, got {}", dims.len());
        };
        return Ok(BoxTessellator.tessellate(&BoxSolid::from_dims(x, y, z))?);
    }
    if let Some(path) = &args.input {
        let mesh = StlTessellator
            .tessellate(path.as_path())
            .with_context(|| format!("Failed to load surface: {}", path.display()))?;
        info!(
            "Loaded {} triangles from {}",
            mesh.triangle_count(),
            path.display()
        );
        return Ok(mesh);
    }
    bail!("No geometry given")
}

fn save_outputs(args: &Args, result: &SimulationResult) -> Result<()> {
    if let Some(path) = &args.output {
        write_result(path, result)?;
        info!("Wrote result to {}", path.display());
    }
    if let Some(path) = &args.vtk {
        write_result_vtk(path, result)?;
        info!("Wrote fields to {}", path.display());
    }
    Ok(())
}

fn print_report(result: &SimulationResult) {
    let s = &result.summary;
    let d = &result.defect_analysis;
    println!("run {}", result.run_id);
    println!(
        "  {} frames, {:.1} s simulated in {:.2} s",
        s.num_timesteps, s.simulated_time, s.computation_time
    );
    println!(
        "  final temperature: avg {:.1} °C, min {:.1} °C, max {:.1} °C",
        s.final_temperature.avg, s.final_temperature.min, s.final_temperature.max
    );
    println!(
        "  {} hotspots, {} porosity zones, {} feeding issues",
        d.hotspots.len(),
        d.porosity_zones.len(),
        d.feeding_issues.len()
    );
    for gate in &d.gate_candidates {
        println!(
            "  gate for cluster {}: {:.1}, normal {:.2}, pad {:.1} mm",
            gate.feeds_cluster, gate.point, gate.normal, gate.pad_diameter
        );
    }
    if let Some(h) = d.hotspots.first() {
        println!(
            "  last to solidify: node {} at {:.1} ({:.1} s)",
            h.node_id, h.location, h.solidification_time
        );
    }
    println!(
        "  shrinkage: {:.2} mm^3 ({:.1} % of {:.1} mm^3)",
        d.shrinkage_estimate.shrinkage_volume,
        d.shrinkage_estimate.shrinkage_percentage,
        d.shrinkage_estimate.total_volume
    );
}

/// Failure to report for a finished run. Terminal events take precedence
/// over the worker's outcome, which covers runs that ended without one.
fn failure_message(outcome: &RunOutcome, streamed: Option<String>) -> Option<String> {
    streamed.or_else(|| match outcome {
        RunOutcome::Completed => None,
        RunOutcome::Cancelled { time } => Some(format!("Run cancelled at t = {time:.1} s")),
        RunOutcome::TimedOut { time } => Some(format!("Run timed out at t = {time:.1} s")),
        RunOutcome::Failed(e) => Some(format!("Run failed during {}: {e}", e.stage())),
    })
}

fn write_line(out: &mut impl Write, event: &SimEvent) -> Result<()> {
    writeln!(out, "{}", to_json_line(event)?)?;
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let now = Instant::now();
    let args = Args::parse();
    let job = build_job(&args)?;
    info!(
        "Simulating {} poured at {:.0} °C (ambient {:.0} °C, h = {:.0} W/m^2K)",
        job.material.name,
        job.conditions.pour_temperature,
        job.conditions.ambient_temperature,
        job.conditions.heat_transfer_coefficient
    );

    let handle = spawn_simulation(job)?;
    info!("Started run {}", handle.id);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut result = None;
    let mut failure = None;
    for event in handle.events.iter() {
        if args.stream {
            write_line(&mut out, &event)?;
        }
        match event {
            SimEvent::Mesh { mesh } => info!(
                "Mesh: {} surface nodes, {} voxel nodes, {} hexes",
                mesh.surface_mesh.node_count,
                mesh.voxel_mesh.node_count,
                mesh.voxel_mesh.hex_count()
            ),
            SimEvent::Timestep {
                data, progress, ..
            } => info!(
                "t = {:>7.1} s  avg {:>7.1} °C  liquid {:>6}  mushy {:>6}  solid {:>6}  ({:.0} %)",
                data.time,
                data.statistics.avg_temp,
                data.phase_counts.liquid,
                data.phase_counts.mushy,
                data.phase_counts.solid,
                progress * 100.0
            ),
            SimEvent::Complete { data } => result = Some(*data),
            SimEvent::Status { state, time, .. } => {
                failure = Some(format!("Run stopped ({state:?}) at t = {time:.1} s"));
            }
            SimEvent::Error { stage, message } => {
                failure = Some(format!("Run failed during {stage}: {message}"));
            }
        }
    }
    let outcome = handle.join();
    debug!("Worker outcome: {outcome:?}");

    if let Some(msg) = failure_message(&outcome, failure) {
        bail!(msg);
    }
    let result = result.ok_or_else(|| anyhow!("Run ended without a result"))?;
    save_outputs(&args, &result)?;
    if !args.stream {
        print_report(&result);
    }
    info!("Done in {:?}", now.elapsed());
    Ok(())
}
