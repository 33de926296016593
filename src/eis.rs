//! Electrochemical impedance spectroscopy.
//!
//! The analysis runs in four steps:
//! 1. Kramers–Kronig validation of the raw spectrum, reported as a chi-square.
//! 2. Removal of inductive points (positive imaginary part).
//! 3. Equivalent circuit fitting on the remaining points, either of a suggested topology or of
//!    every candidate in a [`CircuitLibrary`], keeping the one with the lowest RMSE against the
//!    raw spectrum.
//! 4. Ionic conductivity from the series resistance when a cell constant is known.

use ndarray_linalg::c64;
use serde::{Deserialize, Serialize};
use slog::{debug, info, o, warn, Discard, Logger};

use crate::circuit::{Circuit, CircuitGuess, CircuitLibrary};
use crate::kramers_kronig::{KkValidation, KramersKronig};
use crate::minimisation::{Problem, SolverSettings};
use crate::persist::ResultsStore;
use crate::procedure::{PlotSink, Procedure};
use crate::spectrum::ImpedanceSpectrum;
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EisConfig {
    /// Largest number of RC elements tried by the Kramers–Kronig test
    pub max_rc_elements: usize,
    /// μ threshold ending the Kramers–Kronig element search
    pub cut_off: f64,
    /// Add a series capacitance to the Kramers–Kronig model
    pub add_capacitance: bool,
    /// Cell constant in cm⁻¹; conductivity is only computed when present
    pub cell_constant: Option<f64>,
    pub max_iters: u64,
    /// Log every solver iteration to the terminal
    pub trace_solver: bool,
    pub suggested_circuit: Option<String>,
    pub initial_guess: Option<Vec<f64>>,
}

impl Default for EisConfig {
    fn default() -> Self {
        Self {
            max_rc_elements: 50,
            cut_off: 0.85,
            add_capacitance: false,
            cell_constant: None,
            max_iters: 100,
            trace_solver: false,
            suggested_circuit: None,
            initial_guess: None,
        }
    }
}

impl EisConfig {
    /// The suggested circuit, if both a topology and an initial guess are configured
    pub fn suggestion(&self) -> Option<CircuitGuess> {
        self.suggested_circuit
            .as_ref()
            .zip(self.initial_guess.as_ref())
            .map(|(topology, guess)| CircuitGuess::new(topology.clone(), guess.clone()))
    }
}

/// An equivalent circuit with fitted parameter values
#[derive(Clone, Debug)]
pub struct FittedCircuit {
    circuit: Circuit,
    parameters: Vec<f64>,
    uncertainties: Vec<f64>,
}

impl FittedCircuit {
    pub fn topology(&self) -> &str {
        self.circuit.topology()
    }

    pub fn parameter_names(&self) -> &[String] {
        self.circuit.parameter_names()
    }

    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    /// One standard error per parameter, NaN where the fit does not determine it
    pub fn uncertainties(&self) -> &[f64] {
        &self.uncertainties
    }

    /// Impedance of the fitted circuit at each frequency in Hz
    pub fn predict(&self, frequency: &[f64]) -> Vec<c64> {
        self.circuit.predict(&self.parameters, frequency)
    }
}

/// RMSE reached by one library candidate, `None` if its fit failed
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CandidateReport {
    pub topology: String,
    pub rmse: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct EisAnalysis {
    pub circuit: FittedCircuit,
    /// Root mean square of |Z_fit - Z| over the raw spectrum
    pub rmse: f64,
    /// Ionic conductivity in S/cm
    pub conductivity: Option<f64>,
    pub chi_square: f64,
    pub validation: KkValidation,
    /// Number of inductive points removed before fitting
    pub truncated_points: usize,
    pub candidates: Vec<CandidateReport>,
}

pub struct EisAnalyzer {
    spectrum: ImpedanceSpectrum,
    config: EisConfig,
    library: CircuitLibrary,
    suggestion: Option<CircuitGuess>,
    logger: Logger,
}

impl EisAnalyzer {
    pub fn new(spectrum: ImpedanceSpectrum, config: EisConfig) -> Self {
        let suggestion = config.suggestion();
        Self {
            spectrum,
            config,
            library: CircuitLibrary::default(),
            suggestion,
            logger: Logger::root(Discard, o!()),
        }
    }

    #[must_use]
    pub fn with_library(mut self, library: CircuitLibrary) -> Self {
        self.library = library;
        self
    }

    /// Fit only `guess` instead of searching the library
    #[must_use]
    pub fn with_suggested_circuit(mut self, guess: CircuitGuess) -> Self {
        self.suggestion = Some(guess);
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger.new(o!("procedure" => "impedance"));
        self
    }

    pub const fn spectrum(&self) -> &ImpedanceSpectrum {
        &self.spectrum
    }

    /// Kramers–Kronig validation of the raw spectrum
    ///
    /// # Errors
    /// Returns an error if the validation settings are out of range.
    pub fn validate(&self) -> Result<KkValidation> {
        KramersKronig {
            max_rc_elements: self.config.max_rc_elements,
            cut_off: self.config.cut_off,
            add_capacitance: self.config.add_capacitance,
        }
        .validate(&self.spectrum)
    }

    /// The spectrum without inductive points, and how many were removed
    pub fn truncate_inductive(&self) -> (ImpedanceSpectrum, usize) {
        let imaginary = self.spectrum.imaginary();
        let truncated = self.spectrum.retain(|ii| imaginary[ii] <= 0.0);
        let removed = self.spectrum.len() - truncated.len();
        (truncated, removed)
    }

    fn settings(&self) -> SolverSettings {
        SolverSettings {
            max_iters: self.config.max_iters,
            trace: self.config.trace_solver,
        }
    }

    /// Fit a single candidate to `spectrum`
    fn fit(&self, guess: &CircuitGuess, spectrum: &ImpedanceSpectrum) -> Result<FittedCircuit> {
        let circuit = Circuit::parse(&guess.topology)?;
        let solution =
            Problem::build(&circuit, spectrum).solve(&guess.initial_guess, self.settings())?;
        Ok(FittedCircuit {
            circuit,
            parameters: solution.parameters,
            uncertainties: solution.uncertainties,
        })
    }

    fn rmse(&self, circuit: &FittedCircuit) -> f64 {
        let fitted = circuit.predict(self.spectrum.frequency());
        let squares = fitted
            .iter()
            .zip(self.spectrum.impedance())
            .map(|(fit, observed)| (fit - observed).norm_sqr())
            .sum::<f64>();
        #[allow(clippy::cast_precision_loss)]
        let n = fitted.len() as f64;
        (squares / n).sqrt()
    }

    /// Fit every library candidate and keep the one with the lowest RMSE
    fn select(
        &self,
        spectrum: &ImpedanceSpectrum,
    ) -> Result<(FittedCircuit, f64, Vec<CandidateReport>)> {
        let mut best: Option<(FittedCircuit, f64)> = None;
        let mut reports = Vec::with_capacity(self.library.len());
        for guess in self.library.iter() {
            let rmse = match self.fit(guess, spectrum) {
                Ok(circuit) => {
                    let rmse = self.rmse(&circuit);
                    debug!(self.logger, "candidate fitted";
                        "topology" => &guess.topology, "rmse" => rmse);
                    let lowest = best.as_ref().map_or(f64::INFINITY, |(_, lowest)| *lowest);
                    if rmse.is_finite() && rmse < lowest {
                        best = Some((circuit, rmse));
                    }
                    Some(rmse)
                }
                Err(err) => {
                    warn!(self.logger, "candidate failed";
                        "topology" => &guess.topology, "error" => %err);
                    None
                }
            };
            reports.push(CandidateReport {
                topology: guess.topology.clone(),
                rmse,
            });
        }
        let (circuit, rmse) = best.ok_or(Error::NoCircuitConverged {
            attempted: self.library.len(),
        })?;
        Ok((circuit, rmse, reports))
    }

    fn conductivity(&self, circuit: &FittedCircuit) -> Result<Option<f64>> {
        let Some(cell_constant) = self.config.cell_constant else {
            return Ok(None);
        };
        let resistance = circuit.parameters().first().copied().unwrap_or(f64::NAN);
        if !resistance.is_finite() || resistance.abs() < f64::EPSILON {
            return Err(Error::degenerate(format!(
                "series resistance {resistance} cannot give a conductivity"
            )));
        }
        Ok(Some(cell_constant / resistance))
    }
}

impl Procedure for EisAnalyzer {
    type Output = EisAnalysis;

    fn name(&self) -> &'static str {
        "impedance"
    }

    fn analyze(&self) -> Result<EisAnalysis> {
        let validation = self.validate()?;
        let chi_square = validation.chi_square();
        info!(self.logger, "Kramers-Kronig validation";
            "elements" => validation.elements_used,
            "mu" => validation.mu,
            "chi_square" => chi_square);

        let (truncated, truncated_points) = self.truncate_inductive();
        if truncated_points > 0 {
            debug!(self.logger, "removed inductive points"; "count" => truncated_points);
        }
        if truncated.is_empty() {
            return Err(Error::invalid("spectrum has no capacitive points to fit"));
        }

        let (circuit, rmse, candidates) = match &self.suggestion {
            Some(guess) => {
                let circuit = self.fit(guess, &truncated)?;
                let rmse = self.rmse(&circuit);
                let report = CandidateReport {
                    topology: guess.topology.clone(),
                    rmse: Some(rmse),
                };
                (circuit, rmse, vec![report])
            }
            None => self.select(&truncated)?,
        };
        info!(self.logger, "selected circuit"; "topology" => circuit.topology(), "rmse" => rmse);

        let conductivity = self.conductivity(&circuit)?;
        if let Some(sigma) = conductivity {
            info!(self.logger, "ionic conductivity"; "S/cm" => sigma);
        }

        Ok(EisAnalysis {
            circuit,
            rmse,
            conductivity,
            chi_square,
            validation,
            truncated_points,
            candidates,
        })
    }

    fn plot(&self, output: &EisAnalysis, sink: &mut dyn PlotSink) -> Result<()> {
        let frequency = self.spectrum.frequency();
        let fitted = output.circuit.predict(frequency);
        let fitted_re = fitted.iter().map(|z| z.re).collect::<Vec<_>>();
        let fitted_minus_im = fitted.iter().map(|z| -z.im).collect::<Vec<_>>();
        let minus_im = self.spectrum.imaginary().iter().map(|v| -v).collect::<Vec<_>>();

        let nyquist = EisPlot::Nyquist.as_str();
        sink.draw(nyquist, "measured", self.spectrum.real(), &minus_im)?;
        sink.draw(nyquist, output.circuit.topology(), &fitted_re, &fitted_minus_im)?;

        let log_frequency = frequency.iter().map(|f| f.log10()).collect::<Vec<_>>();
        let fitted_modulus = fitted.iter().map(|z| z.norm()).collect::<Vec<_>>();
        let fitted_phase = fitted
            .iter()
            .map(|z| crate::spectrum::phase_shift(z.re, z.im))
            .collect::<Vec<_>>();
        let (modulus, phase) = (EisPlot::BodeModulus.as_str(), EisPlot::BodePhase.as_str());
        sink.draw(modulus, "measured", &log_frequency, &self.spectrum.modulus())?;
        sink.draw(modulus, "fitted", &log_frequency, &fitted_modulus)?;
        sink.draw(phase, "measured", &log_frequency, self.spectrum.phase_shift())?;
        sink.draw(phase, "fitted", &log_frequency, &fitted_phase)?;

        sink.draw(
            EisPlot::KramersKronigResiduals.as_str(),
            "real",
            &log_frequency,
            &output.validation.real_residuals,
        )?;
        sink.draw(
            EisPlot::KramersKronigResiduals.as_str(),
            "imaginary",
            &log_frequency,
            &output.validation.imag_residuals,
        )
    }

    fn save_data(&self, output: &EisAnalysis, store: &ResultsStore) -> Result<()> {
        let record = EisRecord {
            topology: output.circuit.topology(),
            parameter_names: output.circuit.parameter_names(),
            parameters: output.circuit.parameters(),
            uncertainties: output.circuit.uncertainties(),
            rmse: output.rmse,
            conductivity: output.conductivity,
            chi_square: output.chi_square,
            kk_elements: output.validation.elements_used,
            kk_mu: output.validation.mu,
            truncated_points: output.truncated_points,
            candidates: &output.candidates,
        };
        store.write_record(self.name(), &record)?;

        let fitted = output.circuit.predict(self.spectrum.frequency());
        let fitted_re = fitted.iter().map(|z| z.re).collect::<Vec<_>>();
        let fitted_im = fitted.iter().map(|z| z.im).collect::<Vec<_>>();
        store.write_series(
            "impedance_fit",
            &[
                ("frequency", self.spectrum.frequency()),
                ("real", self.spectrum.real()),
                ("imaginary", self.spectrum.imaginary()),
                ("fitted_real", &fitted_re),
                ("fitted_imaginary", &fitted_im),
                ("kk_real_residual", &output.validation.real_residuals),
                ("kk_imaginary_residual", &output.validation.imag_residuals),
            ],
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EisPlot {
    Nyquist,
    BodeModulus,
    BodePhase,
    KramersKronigResiduals,
}

impl EisPlot {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nyquist => "nyquist",
            Self::BodeModulus => "bode_modulus",
            Self::BodePhase => "bode_phase",
            Self::KramersKronigResiduals => "kramers_kronig_residuals",
        }
    }
}

#[derive(Serialize)]
struct EisRecord<'a> {
    topology: &'a str,
    parameter_names: &'a [String],
    parameters: &'a [f64],
    uncertainties: &'a [f64],
    rmse: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    conductivity: Option<f64>,
    chi_square: f64,
    kk_elements: usize,
    kk_mu: f64,
    truncated_points: usize,
    candidates: &'a [CandidateReport],
}
