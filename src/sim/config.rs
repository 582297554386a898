use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::sim::heat_transfer::sparse::SparseSolverConfig;
use crate::sim::materials::Material;

/// Pouring and cooling conditions for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CastingConditions {
    /// Uniform initial metal temperature in °C.
    pub pour_temperature: f64,
    /// Surrounding temperature in °C.
    pub ambient_temperature: f64,
    /// Convective heat transfer coefficient at the part surface in W/(m^2*K).
    pub heat_transfer_coefficient: f64,
}

impl Default for CastingConditions {
    fn default() -> Self {
        Self {
            pour_temperature: 700.0,
            ambient_temperature: 25.0,
            heat_transfer_coefficient: 300.0,
        }
    }
}

impl CastingConditions {
    pub fn validate(&self, material: &Material) -> Result<()> {
        let fields = [
            ("pour_temperature", self.pour_temperature),
            ("ambient_temperature", self.ambient_temperature),
            ("heat_transfer_coefficient", self.heat_transfer_coefficient),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SimError::InvalidInput(format!("{name} must be finite")));
        }
        if self.pour_temperature < material.solidus {
            return Err(SimError::InvalidInput(format!(
                "pour temperature {} °C is below the solidus of {} ({} °C)",
                self.pour_temperature, material.name, material.solidus
            )));
        }
        if self.ambient_temperature >= self.pour_temperature {
            return Err(SimError::InvalidInput(format!(
                "ambient temperature {} °C must be below the pour temperature {} °C",
                self.ambient_temperature, self.pour_temperature
            )));
        }
        if self.heat_transfer_coefficient < 0.0 {
            return Err(SimError::InvalidInput(
                "heat_transfer_coefficient must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Thresholds for the defect criteria.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefectCriteria {
    /// Share of nodes, ranked by solidification time, reported as hotspots.
    pub hotspot_fraction: f64,
    /// Maximum number of porosity zones in the summary.
    pub max_porosity_zones: usize,
    /// Distance (model units) beyond which a hotspot cluster counts as an
    /// isolated pool needing its own feeder.
    pub feeding_isolation_distance: f64,
    /// Floor for the cooling rate in the Niyama ratio, in K/s.
    pub min_cooling_rate: f64,
    /// Weight of late freezing against low Niyama in the cluster score.
    pub cluster_freeze_weight: f64,
    /// Score quantile above which a node joins a hotspot cluster.
    pub cluster_quantile: f64,
    /// Smallest gate diameter considered, in model units.
    pub min_gate_diameter: f64,
}

impl Default for DefectCriteria {
    fn default() -> Self {
        Self {
            hotspot_fraction: 0.02,
            max_porosity_zones: 50,
            feeding_isolation_distance: 30.0,
            min_cooling_rate: 1e-9,
            cluster_freeze_weight: 0.85,
            cluster_quantile: 0.85,
            min_gate_diameter: 8.0,
        }
    }
}

/// Configuration for a solidification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Grid cell size in model units. Derived from `target_nodes` when unset.
    pub cell_size: Option<f64>,
    /// Approximate grid node count used to derive the cell size.
    pub target_nodes: usize,
    /// Minimum number of interior cubes for a usable voxel mesh.
    pub min_cells: usize,
    /// Metres per model unit (1e-3 for millimetre geometry).
    pub length_scale: f64,
    /// Nominal time step in seconds.
    pub time_step: f64,
    /// Simulated seconds between saved frames.
    pub save_interval: f64,
    /// Simulation horizon in seconds.
    pub total_time: f64,
    /// Time-step halvings allowed before a step is declared divergent.
    pub max_retries: usize,
    /// Relative residual above which an unconverged linear solve fails.
    pub divergence_residual: f64,
    /// Linear solver settings.
    pub solver: SparseSolverConfig,
    /// Defect thresholds.
    pub defects: DefectCriteria,
    /// Capacity of the event channel used for streaming.
    pub channel_capacity: usize,
    /// Wall-clock limit for a run in seconds.
    pub timeout_secs: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cell_size: None,
            target_nodes: 200_000,
            min_cells: 8,
            length_scale: 1e-3,
            time_step: 1.0,
            save_interval: 5.0,
            total_time: 180.0 * 60.0,
            max_retries: 3,
            divergence_residual: 1e-4,
            solver: SparseSolverConfig::default(),
            defects: DefectCriteria::default(),
            channel_capacity: 16,
            timeout_secs: None,
        }
    }
}

impl SimulationConfig {
    /// Loads a configuration from a JSON file. Missing fields take their
    /// default values.
    pub fn from_json_file(path: &Path) -> AnyResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("length_scale", self.length_scale),
            ("time_step", self.time_step),
            ("save_interval", self.save_interval),
            ("total_time", self.total_time),
            ("divergence_residual", self.divergence_residual),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(SimError::InvalidInput(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if let Some(h) = self.cell_size {
            if !h.is_finite() || h <= 0.0 {
                return Err(SimError::InvalidInput(format!(
                    "cell_size must be positive, got {h}"
                )));
            }
        }
        if let Some(t) = self.timeout_secs {
            if !t.is_finite() || t <= 0.0 {
                return Err(SimError::InvalidInput(format!(
                    "timeout_secs must be positive, got {t}"
                )));
            }
        }
        if self.target_nodes == 0 || self.channel_capacity == 0 {
            return Err(SimError::InvalidInput(
                "target_nodes and channel_capacity must be non-zero".to_string(),
            ));
        }
        let f = self.defects.hotspot_fraction;
        if !(f > 0.0 && f <= 1.0) {
            return Err(SimError::InvalidInput(format!(
                "hotspot_fraction must be in (0, 1], got {f}"
            )));
        }
        let d = &self.defects;
        for (name, value) in [
            ("cluster_freeze_weight", d.cluster_freeze_weight),
            ("cluster_quantile", d.cluster_quantile),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::InvalidInput(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if !d.min_gate_diameter.is_finite() || d.min_gate_diameter < 0.0 {
            return Err(SimError::InvalidInput(format!(
                "min_gate_diameter must be >= 0, got {}",
                d.min_gate_diameter
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = SimulationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.total_time, 10_800.0);
        assert_eq!(config.solver.max_iterations, 2000);
    }

    #[test]
    fn test_partial_json() -> AnyResult<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"cell_size": 2.0, "time_step": 0.5, "defects": {"hotspot_fraction": 0.05}}"#,
        )?;
        let config = SimulationConfig::from_json_file(&path)?;
        assert_eq!(config.cell_size, Some(2.0));
        assert_eq!(config.time_step, 0.5);
        assert_eq!(config.defects.hotspot_fraction, 0.05);
        assert_eq!(config.defects.max_porosity_zones, 50);
        assert_eq!(config.save_interval, 5.0);
        Ok(())
    }

    #[test]
    fn test_invalid_config() {
        let mut config = SimulationConfig::default();
        config.time_step = 0.0;
        assert!(config.validate().is_err());
        let mut config = SimulationConfig::default();
        config.defects.hotspot_fraction = 1.5;
        assert!(config.validate().is_err());
        let mut config = SimulationConfig::default();
        config.defects.cluster_quantile = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_conditions() {
        let al = Material::aluminum_a356();
        CastingConditions::default().validate(&al).unwrap();
        let cold = CastingConditions {
            pour_temperature: 500.0,
            ..Default::default()
        };
        assert!(cold.validate(&al).is_err());
        let hot_room = CastingConditions {
            ambient_temperature: 800.0,
            ..Default::default()
        };
        assert!(hot_room.validate(&al).is_err());
    }
}
