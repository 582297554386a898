use std::collections::HashMap;

use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};

/// Phase of an alloy at a given temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Liquid,
    Mushy,
    Solid,
}

/// Casting alloy properties, constant over a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    /// Density in kg/m^3.
    pub density: f64,
    /// Thermal conductivity in W/(m*K).
    pub thermal_conductivity: f64,
    /// Specific heat capacity in J/(kg*K).
    pub specific_heat: f64,
    /// Latent heat of fusion in J/kg.
    pub latent_heat: f64,
    /// Liquidus temperature in °C.
    pub liquidus: f64,
    /// Solidus temperature in °C.
    pub solidus: f64,
    /// Volumetric contraction from liquid to solid, in percent.
    #[serde(default)]
    pub shrinkage_percent: f64,
    /// Niyama value below which a node is flagged as porosity risk,
    /// in (K*s)^0.5/mm.
    #[serde(default = "default_niyama_critical")]
    pub niyama_critical: f64,
}

fn default_niyama_critical() -> f64 {
    1.0
}

impl Material {
    /// Aluminium A356 casting alloy.
    pub fn aluminum_a356() -> Self {
        Self {
            name: "Aluminum A356".to_string(),
            density: 2685.0,
            thermal_conductivity: 150.0,
            specific_heat: 963.0,
            latent_heat: 389_000.0,
            liquidus: 615.0,
            solidus: 555.0,
            shrinkage_percent: 6.5,
            niyama_critical: 1.0,
        }
    }

    /// Plain carbon cast steel.
    pub fn carbon_steel() -> Self {
        Self {
            name: "Carbon Steel".to_string(),
            density: 7850.0,
            thermal_conductivity: 40.0,
            specific_heat: 620.0,
            latent_heat: 260_000.0,
            liquidus: 1495.0,
            solidus: 1450.0,
            shrinkage_percent: 3.0,
            niyama_critical: 0.5,
        }
    }

    /// Checks the properties the solver relies on.
    ///
    /// Conductivity is not checked here: the solver reports a non-physical
    /// diffusion operator itself.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("density", self.density),
            ("specific_heat", self.specific_heat),
            ("niyama_critical", self.niyama_critical),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(SimError::InvalidInput(format!(
                    "material '{}': {field} must be positive, got {value}",
                    self.name
                )));
            }
        }
        if !self.latent_heat.is_finite() || self.latent_heat < 0.0 {
            return Err(SimError::InvalidInput(format!(
                "material '{}': latent_heat must be >= 0",
                self.name
            )));
        }
        if !(self.liquidus.is_finite() && self.solidus.is_finite()) || self.liquidus <= self.solidus
        {
            return Err(SimError::InvalidInput(format!(
                "material '{}': liquidus ({}) must be above solidus ({})",
                self.name, self.liquidus, self.solidus
            )));
        }
        if !(0.0..100.0).contains(&self.shrinkage_percent) {
            return Err(SimError::InvalidInput(format!(
                "material '{}': shrinkage_percent must be in [0, 100)",
                self.name
            )));
        }
        Ok(())
    }

    pub fn phase(&self, t: f64) -> Phase {
        if t > self.liquidus {
            Phase::Liquid
        } else if t < self.solidus {
            Phase::Solid
        } else {
            Phase::Mushy
        }
    }

    /// Liquid fraction by the lever rule: 1 above liquidus, 0 below solidus.
    pub fn liquid_fraction(&self, t: f64) -> f64 {
        ((t - self.solidus) / (self.liquidus - self.solidus)).clamp(0.0, 1.0)
    }

    /// Effective specific heat in J/(kg*K).
    ///
    /// Latent heat is spread uniformly over the freezing range.
    pub fn effective_specific_heat(&self, t: f64) -> f64 {
        if t >= self.solidus && t <= self.liquidus {
            self.specific_heat + self.latent_heat / (self.liquidus - self.solidus)
        } else {
            self.specific_heat
        }
    }

    /// Specific enthalpy in J/kg relative to 0 °C solid.
    pub fn enthalpy(&self, t: f64) -> f64 {
        self.specific_heat * t + self.latent_heat * self.liquid_fraction(t)
    }

    /// Inverse of [`Material::enthalpy`].
    pub fn temperature_from_enthalpy(&self, h: f64) -> f64 {
        let h_sol = self.specific_heat * self.solidus;
        let h_liq = self.specific_heat * self.liquidus + self.latent_heat;
        if h < h_sol {
            h / self.specific_heat
        } else if h > h_liq {
            (h - self.latent_heat) / self.specific_heat
        } else {
            self.solidus + (h - h_sol) / (h_liq - h_sol) * (self.liquidus - self.solidus)
        }
    }
}

/// Named casting alloys.
#[derive(Debug, Clone)]
pub struct MaterialLibrary {
    materials: HashMap<String, Material>,
    aliases: HashMap<String, String>,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self {
            materials: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    pub fn add(&mut self, material: Material) {
        self.materials.insert(material.name.clone(), material);
    }

    /// Registers a short lookup key (e.g. `"aluminum"`) for a material.
    pub fn alias(&mut self, key: &str, material_name: &str) {
        self.aliases
            .insert(key.to_lowercase(), material_name.to_string());
    }

    /// Looks up a material by name or alias, case-insensitively for aliases.
    pub fn get(&self, name: &str) -> Option<&Material> {
        self.materials.get(name).or_else(|| {
            self.aliases
                .get(&name.to_lowercase())
                .and_then(|n| self.materials.get(n))
        })
    }

    /// Sorted lookup keys.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.aliases.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Library with the stock alloys under the keys `aluminum` and `steel`.
    pub fn with_presets() -> Self {
        let mut lib = Self::new();
        for (key, material) in [
            ("aluminum", Material::aluminum_a356()),
            ("steel", Material::carbon_steel()),
        ] {
            lib.alias(key, &material.name);
            lib.add(material);
        }
        lib
    }
}

impl Default for MaterialLibrary {
    fn default() -> Self {
        Self::with_presets()
    }
}
