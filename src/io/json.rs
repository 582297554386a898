//! JSON files for simulation jobs and results.
//!
//! A job file holds a complete `SimulationJob` (surface mesh, material,
//! casting conditions and configuration). Result files hold the
//! `SimulationResult` that a completed run emits.

use crate::sim::coordinator::{SimEvent, SimulationJob};
use crate::sim::result::SimulationResult;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Writes a job to a JSON file.
pub fn write_job(path: &Path, job: &SimulationJob) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create file: {}", path.display()))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, job)
        .with_context(|| format!("Failed to serialize job to: {}", path.display()))?;
    Ok(())
}

/// Reads a job from a JSON file. `conditions` and `config` may be omitted.
pub fn read_job(path: &Path) -> Result<SimulationJob> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let reader = BufReader::new(file);
    let job: SimulationJob = serde_json::from_reader(reader)
        .with_context(|| format!("Failed to deserialize job from: {}", path.display()))?;
    Ok(job)
}

/// Writes a completed run's result to a JSON file.
pub fn write_result(path: &Path, result: &SimulationResult) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, result)
        .with_context(|| format!("Failed to serialize result to: {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

/// Serializes an event as a single JSON line (no trailing newline).
pub fn to_json_line(event: &SimEvent) -> Result<String> {
    serde_json::to_string(event).context("Failed to serialize event")
}
