//! Pressure from the analog output voltage of active gauges.

use crate::gauge::Gas;
use crate::Error;
use std::fmt;
use std::str::FromStr;

/// Reading of a TTR 101 N below its measuring range, in mbar.
pub const TTR_101_N_UNDERRANGE: f64 = 5e-5;
/// Reading of a TTR 101 N above its measuring range, in mbar.
pub const TTR_101_N_OVERRANGE: f64 = 1.5e3;
const TTR_101_N_MIN_VOLTAGE: f64 = 0.6119;
const TTR_101_N_MAX_VOLTAGE: f64 = 10.2275;

/// Gauge models with a known output characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AnalogGauge {
    /// Erstevak MTP4D Pirani/Penning gauge.
    Mtp4d,
    /// Erstevak MTM9D Pirani/Penning gauge.
    Mtm9d,
    /// Leybold Thermovac TTR 101 N.
    Ttr101n,
    /// Leybold gauges with the 0–10 V logarithmic output.
    Leybold,
    /// Edwards active gauges.
    Edwards,
}

impl AnalogGauge {
    /// Pressure in mbar for an output of `voltage` volts.
    pub fn voltage_to_pressure(&self, voltage: f64) -> f64 {
        match self {
            AnalogGauge::Mtp4d => 10f64.powf(voltage - 5.5),
            AnalogGauge::Mtm9d => 10f64.powf((voltage - 6.8) / 0.6),
            AnalogGauge::Ttr101n => {
                if voltage < TTR_101_N_MIN_VOLTAGE {
                    TTR_101_N_UNDERRANGE
                } else if voltage > TTR_101_N_MAX_VOLTAGE {
                    TTR_101_N_OVERRANGE
                } else {
                    10f64.powf((voltage - 6.143) / 1.286)
                }
            }
            AnalogGauge::Leybold => 10f64.powf(((voltage + 0.1) * 2.0 - 6.143) / 1.286),
            AnalogGauge::Edwards => 10f64.powf(voltage - 5.555),
        }
    }
}

impl FromStr for AnalogGauge {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MTP4D" => Ok(AnalogGauge::Mtp4d),
            "MTM9D" => Ok(AnalogGauge::Mtm9d),
            "TTR 101 N THERMOVAC" | "TTR 101 N" | "TTR101N" => Ok(AnalogGauge::Ttr101n),
            "LEYBOLD" => Ok(AnalogGauge::Leybold),
            "EDWARDS" => Ok(AnalogGauge::Edwards),
            _ => Err(Error::UnknownGaugeModel(s.to_string())),
        }
    }
}

impl fmt::Display for AnalogGauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnalogGauge::Mtp4d => "MTP4D",
            AnalogGauge::Mtm9d => "MTM9D",
            AnalogGauge::Ttr101n => "TTR 101 N",
            AnalogGauge::Leybold => "Leybold",
            AnalogGauge::Edwards => "Edwards",
        };
        f.write_str(name)
    }
}

/// Leybold Pirani correction factor for `gas`.
///
/// Valid from 3e-3 mbar up to 3e-1 mbar (1 mbar for argon, 2e-1 mbar for
/// hydrogen).
pub fn leybold_pirani_factor(gas: Gas) -> Option<f64> {
    match gas {
        Gas::Air | Gas::Co | Gas::N2 | Gas::O2 => Some(1.0),
        Gas::Ar => Some(1.57),
        Gas::H2 => Some(0.84),
        Gas::He => Some(1.4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= b.abs() * 1e-9
    }

    #[test]
    fn characteristics() {
        assert!(close(AnalogGauge::Mtp4d.voltage_to_pressure(5.5), 1.0));
        assert!(close(AnalogGauge::Mtp4d.voltage_to_pressure(8.5), 1000.0));
        assert!(close(AnalogGauge::Mtm9d.voltage_to_pressure(6.8), 1.0));
        assert!(close(AnalogGauge::Mtm9d.voltage_to_pressure(5.0), 1e-3));
        assert!(close(AnalogGauge::Edwards.voltage_to_pressure(5.555), 1.0));
        assert!(close(AnalogGauge::Leybold.voltage_to_pressure(2.9715), 1.0));
    }

    #[test]
    fn thermovac_is_clamped() {
        let gauge = AnalogGauge::Ttr101n;
        assert_eq!(gauge.voltage_to_pressure(0.0), TTR_101_N_UNDERRANGE);
        assert_eq!(gauge.voltage_to_pressure(10.5), TTR_101_N_OVERRANGE);
        assert!(close(gauge.voltage_to_pressure(6.143), 1.0));
        // continuous at the range limits
        let low = gauge.voltage_to_pressure(TTR_101_N_MIN_VOLTAGE);
        assert!((low - TTR_101_N_UNDERRANGE).abs() / TTR_101_N_UNDERRANGE < 0.01);
    }

    #[test]
    fn model_names() {
        assert_eq!(" mtp4d ".parse::<AnalogGauge>().unwrap(), AnalogGauge::Mtp4d);
        assert_eq!("TTR 101 N Thermovac".parse::<AnalogGauge>().unwrap(), AnalogGauge::Ttr101n);
        assert_eq!("edwards".parse::<AnalogGauge>().unwrap(), AnalogGauge::Edwards);
        assert_matches!("PKR 251".parse::<AnalogGauge>(), Err(Error::UnknownGaugeModel(_)));
        for gauge in [AnalogGauge::Mtm9d, AnalogGauge::Ttr101n, AnalogGauge::Leybold] {
            assert_eq!(gauge.to_string().parse::<AnalogGauge>().unwrap(), gauge);
        }
    }

    #[test]
    fn leybold_factors() {
        assert_eq!(leybold_pirani_factor(Gas::Ar), Some(1.57));
        assert_eq!(leybold_pirani_factor(Gas::O2), Some(1.0));
        assert_eq!(leybold_pirani_factor(Gas::Kr), None);
    }
}
