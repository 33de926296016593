//! Controlled potential and controlled current techniques.
//!
//! - [`ca`]: chronoamperometry, current decay at fixed potential
//! - [`cp`]: chronopotentiometry, potential response to a fixed current
//! - [`cv`]: cyclic voltammetry, current response to a triangular potential sweep
//!
//! All analyzers take current in A, potential in V, time in s and the electrode description in
//! [`ElectrodeConstants`].

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub mod ca;
pub mod cp;
pub mod cv;

/// C/mol
pub const FARADAY: f64 = 96_485.332_12;
/// J/(mol K)
pub const GAS_CONSTANT: f64 = 8.314;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectrodeConstants {
    /// Electrons transferred per reaction
    pub electrons: f64,
    /// cm²
    pub area: f64,
    /// Bulk concentration of the active species in mol/cm³
    pub concentration: f64,
}

impl Default for ElectrodeConstants {
    fn default() -> Self {
        Self {
            electrons: 1.0,
            area: 1.0,
            concentration: 1e-5,
        }
    }
}

impl ElectrodeConstants {
    /// n F A c, the scale shared by the Cottrell, Sand and Randles–Sevcik relations
    pub fn charge_scale(&self) -> f64 {
        self.electrons * FARADAY * self.area * self.concentration
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if positive(self.electrons) && positive(self.area) && positive(self.concentration) {
            Ok(())
        } else {
            Err(Error::invalid(format!(
                "electrode constants must be positive, got {self:?}"
            )))
        }
    }
}

/// A quantity given either once for the whole measurement or per sample
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Signal {
    Constant(f64),
    Series(Vec<f64>),
}

impl Signal {
    pub fn at(&self, idx: usize) -> f64 {
        match self {
            Self::Constant(value) => *value,
            Self::Series(values) => values.get(idx).copied().unwrap_or(f64::NAN),
        }
    }

    /// Every sample of a series of length `n`
    pub fn expand(&self, n: usize) -> Vec<f64> {
        match self {
            Self::Constant(value) => vec![*value; n],
            Self::Series(values) => values.clone(),
        }
    }

    pub(crate) fn validate(&self, name: &str, n: usize) -> Result<()> {
        match self {
            Self::Constant(value) => ensure_finite(name, &[*value]),
            Self::Series(values) => {
                ensure_length(name, values, n)?;
                ensure_finite(name, values)
            }
        }
    }
}

pub(crate) fn ensure_length(name: &str, values: &[f64], expected: usize) -> Result<()> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(Error::invalid(format!(
            "{name} has {} samples, expected {expected}",
            values.len()
        )))
    }
}

pub(crate) fn ensure_finite(name: &str, values: &[f64]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(idx) => Err(Error::invalid(format!(
            "{name} is not finite at sample {idx}"
        ))),
        None => Ok(()),
    }
}

/// Time stamps must be finite and strictly increasing
pub(crate) fn ensure_increasing(time: &[f64]) -> Result<()> {
    ensure_finite("time", time)?;
    match time.windows(2).position(|pair| pair[1] <= pair[0]) {
        Some(idx) => Err(Error::invalid(format!(
            "time is not strictly increasing at sample {}",
            idx + 1
        ))),
        None => Ok(()),
    }
}

/// Shared checks for a (current, voltage, time) trace
pub(crate) fn validate_trace(current: &[f64], voltage: &[f64], time: &[f64]) -> Result<()> {
    if current.len() < 2 {
        return Err(Error::InsufficientData {
            required: 2,
            available: current.len(),
        });
    }
    ensure_finite("current", current)?;
    ensure_length("voltage", voltage, current.len())?;
    ensure_finite("voltage", voltage)?;
    ensure_length("time", time, current.len())?;
    ensure_increasing(time)
}
