//! Chronopotentiometry.
//!
//! The potential response to a constant applied current is analysed three ways:
//! - differential capacity dQ/dV with its positive and negative peaks
//! - the rate dV/dt, segmented into an initial relaxation ending at the stabilisation time and
//!   later transitions where the smoothed rate changes abruptly
//! - the diffusion coefficient from Sand's equation

use serde::{Deserialize, Serialize};
use slog::{debug, info, o, Discard, Logger};

use super::{validate_trace, ElectrodeConstants};
use crate::changepoint::{ChangePointDetector, L1ChangePoint};
use crate::math::{cumulative_trapezoid, gradient, impute_non_finite, mean, std_dev};
use crate::peaks::{PeakFinder, ProminencePeakFinder};
use crate::persist::ResultsStore;
use crate::procedure::{PlotSink, Procedure};
use crate::smoothing::savitzky_golay;
use crate::{Error, Result};

/// A·s per mAh
const COULOMB_PER_MAH: f64 = 3.6;
const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpConfig {
    /// A; the mean of the current series when absent
    pub applied_current: Option<f64>,
    pub savgol_window: usize,
    pub savgol_order: usize,
    /// Transition threshold in standard deviations of the rate derivative
    pub transition_sigma: f64,
    pub change_point_penalty: f64,
    pub change_point_min_size: usize,
    pub change_point_jump: usize,
    /// Peak prominence relative to the range of dQ/dV
    pub peak_prominence: f64,
}

impl Default for CpConfig {
    fn default() -> Self {
        let detector = L1ChangePoint::default();
        Self {
            applied_current: None,
            savgol_window: 11,
            savgol_order: 3,
            transition_sigma: 3.0,
            change_point_penalty: detector.penalty,
            change_point_min_size: detector.min_size,
            change_point_jump: detector.jump,
            peak_prominence: ProminencePeakFinder::default().relative_prominence,
        }
    }
}

/// A detected regime change
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ChangePoint {
    pub index: usize,
    /// s
    pub time: f64,
    /// V
    pub value: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DqdvPeaks {
    /// (voltage, dQ/dV) of the maxima
    pub positive: Vec<(f64, f64)>,
    /// (voltage, dQ/dV) of the minima
    pub negative: Vec<(f64, f64)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CpAnalysis {
    /// Cumulative charge in mAh
    pub charge: Vec<f64>,
    /// Smoothed dQ/dV in mAh/V
    pub dqdv: Vec<f64>,
    pub dqdv_peaks: DqdvPeaks,
    /// V/h
    pub dvdt: Vec<f64>,
    /// End of the initial relaxation, absent if the potential never settles
    pub stabilization: Option<ChangePoint>,
    /// (time, voltage) of each transition after stabilisation, in time order
    pub transitions: Vec<(f64, f64)>,
    /// cm²/s
    pub diffusion_coefficient: f64,
}

pub struct ChronopotentiometryAnalyzer {
    current: Vec<f64>,
    voltage: Vec<f64>,
    time: Vec<f64>,
    electrode: ElectrodeConstants,
    config: CpConfig,
    change_points: Box<dyn ChangePointDetector>,
    peak_finder: Box<dyn PeakFinder>,
    logger: Logger,
}

impl ChronopotentiometryAnalyzer {
    /// # Errors
    /// Returns an error if the series are malformed, time does not increase or the smoothing
    /// settings are invalid.
    pub fn new(
        current: Vec<f64>,
        voltage: Vec<f64>,
        time: Vec<f64>,
        electrode: ElectrodeConstants,
        config: CpConfig,
    ) -> Result<Self> {
        validate_trace(&current, &voltage, &time)?;
        electrode.validate()?;
        if config.savgol_window % 2 == 0 || config.savgol_window <= config.savgol_order {
            return Err(Error::invalid(format!(
                "smoothing window {} must be odd and exceed the order {}",
                config.savgol_window, config.savgol_order
            )));
        }
        Ok(Self {
            current,
            voltage,
            time,
            electrode,
            config,
            change_points: Box::new(L1ChangePoint {
                penalty: config.change_point_penalty,
                min_size: config.change_point_min_size,
                jump: config.change_point_jump,
            }),
            peak_finder: Box::new(ProminencePeakFinder::new(config.peak_prominence)),
            logger: Logger::root(Discard, o!()),
        })
    }

    #[must_use]
    pub fn with_change_point_detector(mut self, detector: Box<dyn ChangePointDetector>) -> Self {
        self.change_points = detector;
        self
    }

    #[must_use]
    pub fn with_peak_finder(mut self, finder: Box<dyn PeakFinder>) -> Self {
        self.peak_finder = finder;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger.new(o!("procedure" => "chronopotentiometry"));
        self
    }

    /// Cumulative charge in mAh
    pub fn charge(&self) -> Vec<f64> {
        cumulative_trapezoid(&self.current, &self.time)
            .into_iter()
            .map(|q| q / COULOMB_PER_MAH)
            .collect()
    }

    /// Smoothed dQ/dV for the cumulative charge `charge`
    ///
    /// # Errors
    /// Returns an error if smoothing fails.
    pub fn differential_capacity(&self, charge: &[f64]) -> Result<Vec<f64>> {
        let raw = impute_non_finite(&gradient(charge, &self.voltage));
        savitzky_golay(&raw, self.config.savgol_window, self.config.savgol_order)
    }

    pub fn dqdv_peaks(&self, dqdv: &[f64]) -> DqdvPeaks {
        let negated = dqdv.iter().map(|v| -v).collect::<Vec<_>>();
        let located = |indices: Vec<usize>| {
            indices
                .into_iter()
                .map(|idx| (self.voltage[idx], dqdv[idx]))
                .collect::<Vec<_>>()
        };
        DqdvPeaks {
            positive: located(self.peak_finder.find_peaks(dqdv)),
            negative: located(self.peak_finder.find_peaks(&negated)),
        }
    }

    /// dV/dt in V/h
    pub fn potential_rate(&self) -> Vec<f64> {
        gradient(&self.voltage, &self.time)
            .into_iter()
            .map(|rate| rate * SECONDS_PER_HOUR)
            .collect()
    }

    /// First change point of the raw potential
    pub fn stabilization(&self) -> Option<ChangePoint> {
        self.change_points
            .detect(&self.voltage)
            .filter(|index| *index < self.voltage.len())
            .map(|index| ChangePoint {
                index,
                time: self.time[index],
                value: self.voltage[index],
            })
    }

    /// Samples after `stabilization` where the derivative of the smoothed rate exceeds the
    /// configured number of standard deviations
    ///
    /// # Errors
    /// Returns an error if smoothing fails.
    pub fn transitions(
        &self,
        dvdt: &[f64],
        stabilization: &ChangePoint,
    ) -> Result<Vec<(f64, f64)>> {
        let smoothed = savitzky_golay(dvdt, self.config.savgol_window, self.config.savgol_order)?;
        let curvature = gradient(&smoothed, &self.time);
        let threshold = self.config.transition_sigma * std_dev(&curvature);
        if !threshold.is_finite() {
            return Ok(vec![]);
        }
        Ok(curvature
            .iter()
            .enumerate()
            .filter(|(idx, d)| *idx > stabilization.index && d.abs() > threshold)
            .map(|(idx, _)| (self.time[idx], self.voltage[idx]))
            .collect())
    }

    /// Sand's equation without the transition time, D = 4 I² / (π (n F A c)²)
    ///
    /// # Errors
    /// Returns an error if the applied current is zero or not finite.
    pub fn diffusion_coefficient(&self) -> Result<f64> {
        let current = self
            .config
            .applied_current
            .unwrap_or_else(|| mean(&self.current))
            .abs();
        if !current.is_finite() || current < f64::EPSILON * f64::EPSILON {
            return Err(Error::degenerate(format!(
                "applied current {current} A cannot drive a Sand analysis"
            )));
        }
        let scale = self.electrode.charge_scale();
        Ok(4.0 * current * current / (std::f64::consts::PI * scale * scale))
    }
}

impl Procedure for ChronopotentiometryAnalyzer {
    type Output = CpAnalysis;

    fn name(&self) -> &'static str {
        "chronopotentiometry"
    }

    fn analyze(&self) -> Result<CpAnalysis> {
        let charge = self.charge();
        let dqdv = self.differential_capacity(&charge)?;
        let dqdv_peaks = self.dqdv_peaks(&dqdv);
        debug!(self.logger, "dQ/dV peaks";
            "positive" => dqdv_peaks.positive.len(), "negative" => dqdv_peaks.negative.len());

        let dvdt = self.potential_rate();
        let stabilization = self.stabilization();
        let transitions = match &stabilization {
            Some(point) => {
                info!(self.logger, "potential stabilised";
                    "time" => point.time, "voltage" => point.value);
                self.transitions(&dvdt, point)?
            }
            None => {
                info!(self.logger, "no stabilisation point, skipping transition search");
                vec![]
            }
        };
        debug!(self.logger, "transitions"; "count" => transitions.len());

        let diffusion_coefficient = self.diffusion_coefficient()?;

        Ok(CpAnalysis {
            charge,
            dqdv,
            dqdv_peaks,
            dvdt,
            stabilization,
            transitions,
            diffusion_coefficient,
        })
    }

    fn plot(&self, output: &CpAnalysis, sink: &mut dyn PlotSink) -> Result<()> {
        sink.draw(CpPlot::Potential.as_str(), "voltage", &self.time, &self.voltage)?;
        if let Some(point) = output.stabilization {
            sink.draw(CpPlot::Potential.as_str(), "stabilization", &[point.time], &[point.value])?;
        }
        let (times, voltages): (Vec<f64>, Vec<f64>) = output.transitions.iter().copied().unzip();
        sink.draw(CpPlot::Potential.as_str(), "transitions", &times, &voltages)?;

        sink.draw(CpPlot::DifferentialCapacity.as_str(), "dq/dv", &self.voltage, &output.dqdv)?;
        for (label, peaks) in [
            ("positive peaks", &output.dqdv_peaks.positive),
            ("negative peaks", &output.dqdv_peaks.negative),
        ] {
            let (x, y): (Vec<f64>, Vec<f64>) = peaks.iter().copied().unzip();
            sink.draw(CpPlot::DifferentialCapacity.as_str(), label, &x, &y)?;
        }

        sink.draw(CpPlot::PotentialRate.as_str(), "dv/dt", &self.time, &output.dvdt)
    }

    fn save_data(&self, output: &CpAnalysis, store: &ResultsStore) -> Result<()> {
        #[derive(Serialize)]
        struct Record<'a> {
            diffusion_coefficient: f64,
            #[serde(skip_serializing_if = "Option::is_none")]
            stabilization_time: Option<f64>,
            transition_times: Vec<f64>,
            transition_voltages: Vec<f64>,
            positive_peaks: &'a [(f64, f64)],
            negative_peaks: &'a [(f64, f64)],
        }
        let (transition_times, transition_voltages) = output.transitions.iter().copied().unzip();
        store.write_record(
            self.name(),
            &Record {
                diffusion_coefficient: output.diffusion_coefficient,
                stabilization_time: output.stabilization.map(|point| point.time),
                transition_times,
                transition_voltages,
                positive_peaks: &output.dqdv_peaks.positive,
                negative_peaks: &output.dqdv_peaks.negative,
            },
        )?;
        store.write_series(
            "chronopotentiometry_series",
            &[
                ("time", self.time.as_slice()),
                ("voltage", &self.voltage),
                ("current", &self.current),
                ("charge_mah", &output.charge),
                ("dqdv", &output.dqdv),
                ("dvdt", &output.dvdt),
            ],
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpPlot {
    Potential,
    DifferentialCapacity,
    PotentialRate,
}

impl CpPlot {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Potential => "chronopotentiometry_potential",
            Self::DifferentialCapacity => "differential_capacity",
            Self::PotentialRate => "potential_rate",
        }
    }
}
