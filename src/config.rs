use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::circuit::{CircuitGuess, CircuitLibrary};
use crate::eis::EisConfig;
use crate::voltammetry::ca::CaConfig;
use crate::voltammetry::cp::CpConfig;
use crate::voltammetry::cv::CvConfig;
use crate::voltammetry::ElectrodeConstants;
use crate::Result;

/// Settings for every procedure, read from a TOML file
///
/// Every table is optional and falls back to its defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub eis: EisConfig,
    /// Replaces the built-in circuit library when non-empty
    pub circuits: Vec<CircuitGuess>,
    pub electrode: ElectrodeConstants,
    pub chronoamperometry: CaConfig,
    pub chronopotentiometry: CpConfig,
    pub cyclic_voltammetry: CvConfig,
}

impl Config {
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid configuration.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn circuit_library(&self) -> CircuitLibrary {
        if self.circuits.is_empty() {
            CircuitLibrary::default()
        } else {
            CircuitLibrary::new(self.circuits.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::circuit::CircuitLibrary;
    use crate::Result;

    #[test]
    fn an_empty_file_gives_the_defaults() -> Result<()> {
        let config: Config = toml::from_str("")?;
        assert_eq!(config, Config::default());
        assert_eq!(config.eis.max_rc_elements, 50);
        approx::assert_relative_eq!(config.eis.cut_off, 0.85);
        approx::assert_relative_eq!(config.chronopotentiometry.transition_sigma, 3.0);
        assert_eq!(config.circuit_library(), CircuitLibrary::default());
        Ok(())
    }

    #[test]
    fn tables_override_their_fields_only() -> Result<()> {
        let config: Config = toml::from_str(
            r#"
            [eis]
            cell_constant = 0.5
            suggested_circuit = "R0-p(R1,C1)"
            initial_guess = [10.0, 100.0, 1e-5]

            [[circuits]]
            topology = "R0-p(R1,CPE1)"
            initial_guess = [10.0, 100.0, 1e-5, 0.9]

            [electrode]
            electrons = 2.0

            [cyclic_voltammetry]
            scan_rate = 0.05
            "#,
        )?;

        assert_eq!(config.eis.cell_constant, Some(0.5));
        assert_eq!(config.eis.max_iters, 100);
        assert!(config.eis.suggestion().is_some());
        assert_eq!(config.circuit_library().len(), 1);
        approx::assert_relative_eq!(config.electrode.electrons, 2.0);
        approx::assert_relative_eq!(config.electrode.area, 1.0);
        assert_eq!(config.cyclic_voltammetry.scan_rate, Some(0.05));
        assert_eq!(config.chronoamperometry.window_size, 10);
        Ok(())
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(toml::from_str::<Config>("[eis]\nmax_rc_elements = \"many\"").is_err());
    }
}
