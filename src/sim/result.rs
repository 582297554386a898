//! Records handed to consumers: per-step frames and the final run result.

use serde::{Deserialize, Serialize};

use crate::geom::mesh::SurfaceMesh;
use crate::geom::mesh::voxel::VoxelMesh;
use crate::sim::defects::DefectSummary;
use crate::sim::materials::{Material, Phase};
use crate::{Point, TriangleIndex, UID};

/// Node counts per phase. Always sums to the frame's node count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCounts {
    pub liquid: usize,
    pub mushy: usize,
    pub solid: usize,
}

impl PhaseCounts {
    pub fn total(&self) -> usize {
        self.liquid + self.mushy + self.solid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameStatistics {
    pub avg_temp: f64,
    pub min_temp: f64,
    pub max_temp: f64,
    pub hotspot_count: usize,
    pub porosity_risk_nodes: usize,
}

/// Immutable snapshot of the temperature field at one saved time.
///
/// `temperature` is indexed by voxel-mesh node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestepFrame {
    pub time: f64,
    pub temperature: Vec<f64>,
    pub phase_counts: PhaseCounts,
    pub hotspot_nodes: Vec<usize>,
    pub porosity_risk_nodes: Vec<usize>,
    pub statistics: FrameStatistics,
}

impl TimestepFrame {
    pub fn new(
        time: f64,
        temperature: Vec<f64>,
        material: &Material,
        hotspot_nodes: Vec<usize>,
        porosity_risk_nodes: Vec<usize>,
    ) -> Self {
        let mut phase_counts = PhaseCounts::default();
        for t in &temperature {
            match material.phase(*t) {
                Phase::Liquid => phase_counts.liquid += 1,
                Phase::Mushy => phase_counts.mushy += 1,
                Phase::Solid => phase_counts.solid += 1,
            }
        }
        let range = TemperatureRange::of(&temperature);
        let statistics = FrameStatistics {
            avg_temp: range.avg,
            min_temp: range.min,
            max_temp: range.max,
            hotspot_count: hotspot_nodes.len(),
            porosity_risk_nodes: porosity_risk_nodes.len(),
        };
        Self {
            time,
            temperature,
            phase_counts,
            hotspot_nodes,
            porosity_risk_nodes,
            statistics,
        }
    }

    pub fn node_count(&self) -> usize {
        self.temperature.len()
    }
}

/// Average, minimum and maximum of a temperature field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRange {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl TemperatureRange {
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                avg: 0.0,
                min: 0.0,
                max: 0.0,
            };
        }
        let sum: f64 = values.iter().sum();
        Self {
            avg: sum / values.len() as f64,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Surface mesh as sent to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceMeshPayload {
    pub node_count: usize,
    pub nodes: Vec<Point>,
    pub triangles: Vec<TriangleIndex>,
}

impl From<&SurfaceMesh> for SurfaceMeshPayload {
    fn from(mesh: &SurfaceMesh) -> Self {
        Self {
            node_count: mesh.node_count(),
            nodes: mesh.nodes.clone(),
            triangles: mesh.triangles.clone(),
        }
    }
}

/// Both meshes of a run. Temperatures pair only with `voxel_mesh.nodes`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshPayload {
    pub surface_mesh: SurfaceMeshPayload,
    pub voxel_mesh: VoxelMesh,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub num_timesteps: usize,
    /// Simulated seconds covered by the run.
    pub simulated_time: f64,
    pub final_temperature: TemperatureRange,
    /// Wall-clock seconds spent.
    pub computation_time: f64,
    pub defects_detected: usize,
}

/// Everything a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub run_id: UID,
    pub timesteps: Vec<TimestepFrame>,
    pub mesh: MeshPayload,
    pub material: Material,
    pub defect_analysis: DefectSummary,
    pub summary: RunSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_counts_and_stats() {
        let al = Material::aluminum_a356();
        let temps = vec![700.0, 600.0, 500.0, 620.0];
        let frame = TimestepFrame::new(5.0, temps, &al, vec![0], vec![2]);
        assert_eq!(
            frame.phase_counts,
            PhaseCounts {
                liquid: 2,
                mushy: 1,
                solid: 1
            }
        );
        assert_eq!(frame.phase_counts.total(), frame.node_count());
        assert_eq!(frame.statistics.avg_temp, 605.0);
        assert_eq!(frame.statistics.min_temp, 500.0);
        assert_eq!(frame.statistics.max_temp, 700.0);
        assert_eq!(frame.statistics.hotspot_count, 1);
    }

    #[test]
    fn test_frame_json_shape() {
        let al = Material::aluminum_a356();
        let frame = TimestepFrame::new(0.0, vec![700.0], &al, vec![], vec![]);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["phase_counts"]["liquid"], 1);
        assert_eq!(json["statistics"]["porosity_risk_nodes"], 0);
        let back: TimestepFrame = serde_json::from_value(json).unwrap();
        assert_eq!(back, frame);
    }
}
