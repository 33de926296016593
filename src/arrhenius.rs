//! Arrhenius analysis of conductivity against temperature.
//!
//! Thermally activated conduction follows
//!
//! $$
//!     \sigma = A \exp\left(-\frac{E_a}{R T}\right)
//! $$
//!
//! so $\ln \sigma$ is linear in $1000 / T$ with slope $-E_a / (1000 R)$. The activation energy is
//! reported in kJ/mol.

use serde::Serialize;
use slog::{info, o, Discard, Logger};

use crate::math::linear_fit;
use crate::persist::ResultsStore;
use crate::procedure::{PlotSink, Procedure};
use crate::voltammetry::GAS_CONSTANT;
use crate::{Error, Result};

const ZERO_CELSIUS: f64 = 273.15;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ArrheniusFit {
    /// kJ/mol
    pub activation_energy: f64,
    /// S/cm
    pub pre_exponential_factor: f64,
    pub r_squared: f64,
    pub mean_squared_error: f64,
    /// 1000 / T with T in kelvin
    pub inverse_temperature: Vec<f64>,
    pub log_conductivity: Vec<f64>,
    pub fitted_log_conductivity: Vec<f64>,
}

pub struct ArrheniusAnalyzer {
    /// °C
    temperature: Vec<f64>,
    /// S/cm
    conductivity: Vec<f64>,
    logger: Logger,
}

impl ArrheniusAnalyzer {
    /// # Errors
    /// Returns an error if the series differ in length, hold fewer than two points, contain
    /// non-finite values or temperatures at or below absolute zero.
    pub fn new(temperature: Vec<f64>, conductivity: Vec<f64>) -> Result<Self> {
        if temperature.len() != conductivity.len() {
            return Err(Error::invalid(format!(
                "{} temperatures for {} conductivities",
                temperature.len(),
                conductivity.len()
            )));
        }
        if temperature.len() < 2 {
            return Err(Error::InsufficientData {
                required: 2,
                available: temperature.len(),
            });
        }
        if temperature.iter().chain(&conductivity).any(|v| !v.is_finite()) {
            return Err(Error::invalid("temperature and conductivity must be finite"));
        }
        if temperature.iter().any(|t| *t <= -ZERO_CELSIUS) {
            return Err(Error::invalid("temperature below absolute zero"));
        }
        Ok(Self {
            temperature,
            conductivity,
            logger: Logger::root(Discard, o!()),
        })
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger.new(o!("procedure" => "arrhenius"));
        self
    }
}

impl Procedure for ArrheniusAnalyzer {
    type Output = ArrheniusFit;

    fn name(&self) -> &'static str {
        "arrhenius"
    }

    fn analyze(&self) -> Result<ArrheniusFit> {
        if let Some(sigma) = self.conductivity.iter().find(|s| **s <= 0.0) {
            return Err(Error::degenerate(format!(
                "conductivity {sigma} has no logarithm"
            )));
        }
        let first = self.temperature[0];
        if self.temperature.iter().all(|t| (t - first).abs() < f64::EPSILON) {
            return Err(Error::degenerate("fewer than two distinct temperatures"));
        }

        let inverse_temperature = self
            .temperature
            .iter()
            .map(|t| 1000.0 / (t + ZERO_CELSIUS))
            .collect::<Vec<_>>();
        let log_conductivity = self.conductivity.iter().map(|s| s.ln()).collect::<Vec<_>>();

        let fit = linear_fit(&inverse_temperature, &log_conductivity)
            .ok_or_else(|| Error::degenerate("Arrhenius regression is undefined"))?;

        let activation_energy = -fit.slope * GAS_CONSTANT;
        let fitted_log_conductivity = inverse_temperature
            .iter()
            .map(|x| fit.predict(*x))
            .collect();
        info!(self.logger, "Arrhenius fit";
            "activation_energy" => activation_energy, "r_squared" => fit.r_squared);

        Ok(ArrheniusFit {
            activation_energy,
            pre_exponential_factor: fit.intercept.exp(),
            r_squared: fit.r_squared,
            mean_squared_error: fit.mean_squared_error,
            inverse_temperature,
            log_conductivity,
            fitted_log_conductivity,
        })
    }

    fn plot(&self, output: &ArrheniusFit, sink: &mut dyn PlotSink) -> Result<()> {
        let plot = ArrheniusPlot::LogConductivity.as_str();
        sink.draw(
            plot,
            "measured",
            &output.inverse_temperature,
            &output.log_conductivity,
        )?;
        sink.draw(
            plot,
            "fitted",
            &output.inverse_temperature,
            &output.fitted_log_conductivity,
        )
    }

    fn save_data(&self, output: &ArrheniusFit, store: &ResultsStore) -> Result<()> {
        #[derive(Serialize)]
        struct Record {
            activation_energy: f64,
            pre_exponential_factor: f64,
            r_squared: f64,
            mean_squared_error: f64,
        }
        store.write_record(
            self.name(),
            &Record {
                activation_energy: output.activation_energy,
                pre_exponential_factor: output.pre_exponential_factor,
                r_squared: output.r_squared,
                mean_squared_error: output.mean_squared_error,
            },
        )?;
        store.write_series(
            "arrhenius_fit",
            &[
                ("temperature", &self.temperature),
                ("conductivity", &self.conductivity),
                ("inverse_temperature", &output.inverse_temperature),
                ("fitted_log_conductivity", &output.fitted_log_conductivity),
            ],
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrheniusPlot {
    LogConductivity,
}

impl ArrheniusPlot {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LogConductivity => "arrhenius",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ArrheniusAnalyzer;
    use crate::procedure::Procedure;
    use crate::voltammetry::GAS_CONSTANT;
    use crate::{Error, Result};

    #[test]
    fn activation_energy_is_recovered() -> Result<()> {
        let activation = 30_000.0;
        let prefactor = 2.5;
        let temperature = (-3..=6).map(|ii| f64::from(ii) * 10.0).collect::<Vec<_>>();
        let conductivity = temperature
            .iter()
            .map(|t| prefactor * (-activation / (GAS_CONSTANT * (t + 273.15))).exp())
            .collect();

        let fit = ArrheniusAnalyzer::new(temperature, conductivity)?.analyze()?;

        approx::assert_relative_eq!(fit.activation_energy, 30.0, max_relative = 1e-9);
        approx::assert_relative_eq!(fit.pre_exponential_factor, prefactor, max_relative = 1e-9);
        approx::assert_relative_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
        assert!(fit.mean_squared_error < 1e-20);
        Ok(())
    }

    #[test]
    fn non_positive_conductivity_is_degenerate() -> Result<()> {
        let analyzer = ArrheniusAnalyzer::new(vec![20.0, 30.0], vec![1e-3, 0.0])?;
        assert!(matches!(analyzer.analyze(), Err(Error::DegenerateMath(_))));
        Ok(())
    }

    #[test]
    fn a_single_temperature_is_degenerate() -> Result<()> {
        let analyzer = ArrheniusAnalyzer::new(vec![25.0, 25.0, 25.0], vec![1e-3, 2e-3, 3e-3])?;
        assert!(matches!(analyzer.analyze(), Err(Error::DegenerateMath(_))));
        Ok(())
    }

    #[test]
    fn malformed_series_are_rejected() {
        assert!(ArrheniusAnalyzer::new(vec![20.0], vec![1e-3]).is_err());
        assert!(ArrheniusAnalyzer::new(vec![20.0, 30.0], vec![1e-3]).is_err());
        assert!(ArrheniusAnalyzer::new(vec![20.0, -300.0], vec![1e-3, 1e-3]).is_err());
    }
}
