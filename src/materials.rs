//! Deposition materials known to the thickness monitor.
//!
//! Density is in g/cm³, the Z-ratio is the acoustic impedance ratio of the
//! film material to quartz.

use crate::Error;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Material {
    pub id: u8,
    pub symbol: &'static str,
    pub density: f64,
    pub z_ratio: f64,
}

const fn material(id: u8, symbol: &'static str, density: f64, z_ratio: f64) -> Material {
    Material {
        id,
        symbol,
        density,
        z_ratio,
    }
}

pub const MATERIALS: [Material; 14] = [
    material(1, "Ag", 10.5, 0.53),
    material(2, "Al", 2.7, 1.08),
    material(3, "Au", 19.3, 0.38),
    material(4, "C", 2.25, 3.26),
    material(5, "Cr", 7.2, 0.31),
    material(6, "Cu", 8.93, 0.44),
    material(7, "Mo", 10.2, 0.26),
    material(8, "Ni", 8.91, 0.33),
    material(9, "Pd", 12.04, 0.36),
    material(10, "Pt", 21.4, 0.25),
    material(11, "Ti", 4.5, 0.63),
    material(12, "V", 5.96, 0.53),
    material(13, "W", 19.3, 0.16),
    material(14, "Zn", 7.04, 0.51),
];

impl Material {
    /// Looks a material up by its chemical symbol, ignoring case.
    pub fn by_symbol(symbol: &str) -> Option<&'static Material> {
        MATERIALS
            .iter()
            .find(|m| m.symbol.eq_ignore_ascii_case(symbol.trim()))
    }

    pub fn by_id(id: u8) -> Option<&'static Material> {
        MATERIALS.iter().find(|m| m.id == id)
    }
}

impl FromStr for Material {
    type Err = Error;

    /// Accepts a symbol (`"Au"`) or a numeric id (`"3"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let found = match s.trim().parse::<u8>() {
            Ok(id) => Material::by_id(id),
            Err(_) => Material::by_symbol(s),
        };
        found
            .copied()
            .ok_or_else(|| Error::UnknownMaterial(s.to_string()))
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (density {} g/cm³, Z-ratio {})",
            self.symbol, self.density, self.z_ratio
        )
    }
}

/// Frequency constant of AT-cut quartz in Hz·cm.
pub const QUARTZ_FREQUENCY_CONSTANT: f64 = 1.668e5;
/// Density of quartz in g/cm³.
pub const QUARTZ_DENSITY: f64 = 2.648;

/// Areal mass in g/cm² of a film that shifted the crystal from `f0` to `f1` Hz.
///
/// Z-match form of the Sauerbrey equation with the film's Z-ratio `z`.
pub fn areal_mass(f0: f64, f1: f64, z: f64) -> f64 {
    QUARTZ_FREQUENCY_CONSTANT * QUARTZ_DENSITY / (std::f64::consts::PI * z * f1)
        * (z * (std::f64::consts::PI * (f0 - f1) / f0).tan()).atan()
}

/// Film thickness in Å for a film of `density` g/cm³, see [`areal_mass`].
pub fn film_thickness(f0: f64, f1: f64, density: f64, z: f64) -> f64 {
    areal_mass(f0, f1, z) / density * 1e8
}
