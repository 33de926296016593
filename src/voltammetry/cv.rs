//! Cyclic voltammetry.
//!
//! A trace is segmented into sweeps by scan direction, and pairs of forward and backward sweeps
//! form numbered cycles. Anodic peaks are sought on forward sweeps and cathodic peaks on backward
//! sweeps. Within each cycle the anodic and cathodic peaks whose currents cancel best define the
//! half-wave potential, and the largest peak of each type gives a Randles–Sevcik diffusion
//! coefficient.

use std::ops::Range;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use slog::{debug, info, o, Discard, Logger};

use super::{ensure_finite, ensure_increasing, ensure_length, ElectrodeConstants, Signal};
use super::{FARADAY, GAS_CONSTANT};
use crate::math::{gradient, mean};
use crate::peaks::{PeakFinder, ProminencePeakFinder};
use crate::persist::ResultsStore;
use crate::procedure::{PlotSink, Procedure};
use crate::smoothing::moving_average;
use crate::{Error, Result};

/// Randles–Sevcik prefactor at 298 K in A s^(1/2) / (V^(1/2) mol cm)
const RANDLES_SEVCIK_298: f64 = 2.69e5;
const RANDLES_SEVCIK_THERMAL: f64 = 0.4463;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    /// V/s; estimated per sweep from the time series when absent
    pub scan_rate: Option<f64>,
    /// K
    pub temperature: f64,
    /// Width of the moving average applied to each sweep before peak search
    pub smoothing_window: usize,
    pub peak_prominence: f64,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            scan_rate: None,
            temperature: 298.15,
            smoothing_window: 5,
            peak_prominence: ProminencePeakFinder::default().relative_prominence,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDirection {
    Forward,
    Backward,
}

impl ScanDirection {
    const fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakType {
    Anodic,
    Cathodic,
}

/// Contiguous samples sharing one cycle and direction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sweep {
    pub cycle: usize,
    pub direction: ScanDirection,
    pub samples: Range<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PeakRecord {
    pub index: usize,
    /// A
    pub current: f64,
    /// V
    pub voltage: f64,
    pub cycle: usize,
    pub direction: ScanDirection,
    pub peak_type: PeakType,
    /// V/s
    pub scan_rate: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PeakPair {
    pub cycle: usize,
    pub anodic: PeakRecord,
    pub cathodic: PeakRecord,
    /// V
    pub half_wave_potential: f64,
    /// A, on the line joining the two peaks
    pub half_wave_current: f64,
    /// V
    pub peak_separation: f64,
    pub anodic_overpotential: f64,
    pub cathodic_overpotential: f64,
}

/// Randles–Sevcik diffusion coefficients of one cycle in cm²/s
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CycleDiffusion {
    pub cycle: usize,
    pub anodic: Option<f64>,
    pub cathodic: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CvAnalysis {
    pub directions: Vec<ScanDirection>,
    pub cycles: Vec<usize>,
    pub sweeps: Vec<Sweep>,
    pub peaks: Vec<PeakRecord>,
    pub pairs: Vec<PeakPair>,
    pub diffusion: Vec<CycleDiffusion>,
}

impl CvAnalysis {
    pub fn anodic_peaks(&self, cycle: usize) -> impl Iterator<Item = &PeakRecord> {
        self.peaks_of(cycle, PeakType::Anodic)
    }

    pub fn cathodic_peaks(&self, cycle: usize) -> impl Iterator<Item = &PeakRecord> {
        self.peaks_of(cycle, PeakType::Cathodic)
    }

    fn peaks_of(&self, cycle: usize, peak_type: PeakType) -> impl Iterator<Item = &PeakRecord> {
        self.peaks
            .iter()
            .filter(move |peak| peak.cycle == cycle && peak.peak_type == peak_type)
    }
}

/// Scan direction of each sample
///
/// The initial direction follows the first three samples. A sample that tops a forward sweep,
/// or bottoms a backward one, keeps the old direction and the next sample starts the new one.
pub fn scan_directions(voltage: &[f64]) -> Vec<ScanDirection> {
    let n = voltage.len();
    let mut direction = match voltage {
        [v0, _, v2, ..] if v2 < v0 => ScanDirection::Backward,
        [v0, v1] if v1 < v0 => ScanDirection::Backward,
        _ => ScanDirection::Forward,
    };
    let mut directions = Vec::with_capacity(n);
    for ii in 0..n {
        directions.push(direction);
        if ii == 0 || ii + 1 == n {
            continue;
        }
        let (previous, here, next) = (voltage[ii - 1], voltage[ii], voltage[ii + 1]);
        let vertex = match direction {
            ScanDirection::Forward => here >= previous && here > next,
            ScanDirection::Backward => here <= previous && here < next,
        };
        if vertex {
            direction = direction.reversed();
        }
    }
    directions
}

/// Cycle index of each sample: every second direction change starts a new cycle
pub fn cycle_indices(directions: &[ScanDirection]) -> Vec<usize> {
    let mut changes = 0;
    directions
        .iter()
        .enumerate()
        .map(|(ii, direction)| {
            if ii > 0 && directions[ii - 1] != *direction {
                changes += 1;
            }
            changes / 2
        })
        .collect()
}

pub fn sweeps(directions: &[ScanDirection], cycles: &[usize]) -> Vec<Sweep> {
    let runs = directions
        .iter()
        .zip(cycles)
        .enumerate()
        .group_by(|(_, (direction, cycle))| (**direction, **cycle));
    let sweeps = runs
        .into_iter()
        .map(|((direction, cycle), mut run)| {
            let start = run.next().map_or(0, |(ii, _)| ii);
            Sweep {
                cycle,
                direction,
                samples: start..start + 1 + run.count(),
            }
        })
        .collect();
    sweeps
}

/// The anodic/cathodic pair of one cycle minimising |I_a + I_c|
///
/// The first pair reaching the minimum wins.
pub fn pair_peaks(anodic: &[PeakRecord], cathodic: &[PeakRecord]) -> Option<PeakPair> {
    let (a, c) = anodic
        .iter()
        .cartesian_product(cathodic)
        .fold(None, |best: Option<(&PeakRecord, &PeakRecord)>, (a, c)| {
            let imbalance = (a.current + c.current).abs();
            match best {
                Some((ba, bc)) if (ba.current + bc.current).abs() <= imbalance => best,
                _ => Some((a, c)),
            }
        })?;
    let half_wave_potential = 0.5 * (a.voltage + c.voltage);
    Some(PeakPair {
        cycle: a.cycle,
        anodic: *a,
        cathodic: *c,
        half_wave_potential,
        // the line through both peaks, read at their mid-potential
        half_wave_current: 0.5 * (a.current + c.current),
        peak_separation: (a.voltage - c.voltage).abs(),
        anodic_overpotential: a.voltage - half_wave_potential,
        cathodic_overpotential: c.voltage - half_wave_potential,
    })
}

/// Diffusion coefficient in cm²/s from a peak current in A
///
/// Within half a kelvin of 298 K the tabulated 2.69e5 prefactor is used, otherwise the full
/// expression ip = 0.4463 n F A c sqrt(n F v D / (R T)).
pub fn randles_sevcik(
    peak_current: f64,
    scan_rate: f64,
    temperature: f64,
    electrode: &ElectrodeConstants,
) -> Option<f64> {
    if !(scan_rate.is_finite() && scan_rate > 0.0 && peak_current.is_finite()) {
        return None;
    }
    let ip = peak_current.abs();
    let diffusion = if (temperature - 298.0).abs() < 0.5 {
        let scale = RANDLES_SEVCIK_298
            * electrode.electrons.powf(1.5)
            * electrode.area
            * electrode.concentration;
        (ip / scale).powi(2) / scan_rate
    } else {
        let scale = RANDLES_SEVCIK_THERMAL * electrode.charge_scale();
        (ip / scale).powi(2) * GAS_CONSTANT * temperature
            / (electrode.electrons * FARADAY * scan_rate)
    };
    diffusion.is_finite().then_some(diffusion)
}

pub struct CyclicVoltammetryAnalyzer {
    current: Vec<f64>,
    voltage: Vec<f64>,
    time: Option<Vec<f64>>,
    scan_rate: Option<Signal>,
    electrode: ElectrodeConstants,
    config: CvConfig,
    peak_finder: Box<dyn PeakFinder>,
    logger: Logger,
}

impl CyclicVoltammetryAnalyzer {
    /// # Errors
    /// Returns an error if the series are malformed, time does not increase or the temperature is
    /// not positive.
    pub fn new(
        current: Vec<f64>,
        voltage: Vec<f64>,
        time: Option<Vec<f64>>,
        electrode: ElectrodeConstants,
        config: CvConfig,
    ) -> Result<Self> {
        if current.len() < 3 {
            return Err(Error::InsufficientData {
                required: 3,
                available: current.len(),
            });
        }
        ensure_finite("current", &current)?;
        ensure_length("voltage", &voltage, current.len())?;
        ensure_finite("voltage", &voltage)?;
        if let Some(time) = &time {
            ensure_length("time", time, current.len())?;
            ensure_increasing(time)?;
        }
        electrode.validate()?;
        if !(config.temperature.is_finite() && config.temperature > 0.0) {
            return Err(Error::invalid(format!(
                "temperature must be positive, got {} K",
                config.temperature
            )));
        }
        let scan_rate = config.scan_rate.map(Signal::Constant);
        if let Some(rate) = &scan_rate {
            rate.validate("scan rate", current.len())?;
        }
        Ok(Self {
            current,
            voltage,
            time,
            scan_rate,
            electrode,
            config,
            peak_finder: Box::new(ProminencePeakFinder::new(config.peak_prominence)),
            logger: Logger::root(Discard, o!()),
        })
    }

    /// Replace the configured scan rate, e.g. with a per-sample series
    ///
    /// # Errors
    /// Returns an error if a series does not match the trace or is not finite.
    pub fn with_scan_rate(mut self, scan_rate: Signal) -> Result<Self> {
        scan_rate.validate("scan rate", self.current.len())?;
        self.scan_rate = Some(scan_rate);
        Ok(self)
    }

    #[must_use]
    pub fn with_peak_finder(mut self, finder: Box<dyn PeakFinder>) -> Self {
        self.peak_finder = finder;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger.new(o!("procedure" => "cyclic_voltammetry"));
        self
    }

    /// Scan rate attributed to each sweep's samples
    fn sweep_rates(&self, sweeps: &[Sweep]) -> Vec<Vec<Option<f64>>> {
        let rates = self
            .time
            .as_ref()
            .map(|time| gradient(&self.voltage, time));
        sweeps
            .iter()
            .map(|sweep| match (&self.scan_rate, &rates) {
                (Some(signal), _) => sweep.samples.clone().map(|ii| Some(signal.at(ii))).collect(),
                (None, Some(rates)) => {
                    let magnitudes = rates[sweep.samples.clone()]
                        .iter()
                        .map(|rate| rate.abs())
                        .collect::<Vec<_>>();
                    let estimate = mean(&magnitudes);
                    vec![estimate.is_finite().then_some(estimate); sweep.samples.len()]
                }
                (None, None) => vec![None; sweep.samples.len()],
            })
            .collect()
    }

    fn find_peaks(&self, sweep: &Sweep, rates: &[Option<f64>]) -> Vec<PeakRecord> {
        let window = &self.current[sweep.samples.clone()];
        let smoothed = moving_average(window, self.config.smoothing_window);
        let (signal, peak_type) = match sweep.direction {
            ScanDirection::Forward => (smoothed, PeakType::Anodic),
            ScanDirection::Backward => (smoothed.iter().map(|v| -v).collect(), PeakType::Cathodic),
        };
        self.peak_finder
            .find_peaks(&signal)
            .into_iter()
            .map(|offset| {
                let index = sweep.samples.start + offset;
                PeakRecord {
                    index,
                    current: self.current[index],
                    voltage: self.voltage[index],
                    cycle: sweep.cycle,
                    direction: sweep.direction,
                    peak_type,
                    scan_rate: rates[offset],
                }
            })
            .collect()
    }

    fn cycle_diffusion(&self, cycle: usize, peaks: &[PeakRecord]) -> CycleDiffusion {
        let largest = |peak_type: PeakType| {
            peaks
                .iter()
                .filter(|peak| peak.cycle == cycle && peak.peak_type == peak_type)
                .max_by(|a, b| a.current.abs().total_cmp(&b.current.abs()))
                .and_then(|peak| {
                    randles_sevcik(
                        peak.current,
                        peak.scan_rate?,
                        self.config.temperature,
                        &self.electrode,
                    )
                })
        };
        CycleDiffusion {
            cycle,
            anodic: largest(PeakType::Anodic),
            cathodic: largest(PeakType::Cathodic),
        }
    }
}

impl Procedure for CyclicVoltammetryAnalyzer {
    type Output = CvAnalysis;

    fn name(&self) -> &'static str {
        "cyclic_voltammetry"
    }

    fn analyze(&self) -> Result<CvAnalysis> {
        let directions = scan_directions(&self.voltage);
        let cycles = cycle_indices(&directions);
        let sweeps = sweeps(&directions, &cycles);
        let cycle_count = cycles.last().map_or(0, |last| last + 1);
        info!(self.logger, "segmented trace"; "cycles" => cycle_count, "sweeps" => sweeps.len());

        let rates = self.sweep_rates(&sweeps);
        let peaks = sweeps
            .iter()
            .zip(&rates)
            .flat_map(|(sweep, rates)| self.find_peaks(sweep, rates))
            .collect::<Vec<_>>();

        let mut pairs = vec![];
        let mut diffusion = vec![];
        for cycle in 0..cycle_count {
            let (anodic, cathodic): (Vec<PeakRecord>, Vec<PeakRecord>) = peaks
                .iter()
                .filter(|peak| peak.cycle == cycle)
                .partition(|peak| peak.peak_type == PeakType::Anodic);
            match pair_peaks(&anodic, &cathodic) {
                Some(pair) => {
                    debug!(self.logger, "paired peaks"; "cycle" => cycle,
                        "e_half" => pair.half_wave_potential, "separation" => pair.peak_separation);
                    pairs.push(pair);
                }
                None => info!(self.logger, "cycle has no peak pair";
                    "cycle" => cycle, "anodic" => anodic.len(), "cathodic" => cathodic.len()),
            }
            diffusion.push(self.cycle_diffusion(cycle, &peaks));
        }

        Ok(CvAnalysis {
            directions,
            cycles,
            sweeps,
            peaks,
            pairs,
            diffusion,
        })
    }

    fn plot(&self, output: &CvAnalysis, sink: &mut dyn PlotSink) -> Result<()> {
        let voltammogram = CvPlot::Voltammogram.as_str();
        for (cycle, group) in &output.sweeps.iter().group_by(|sweep| sweep.cycle) {
            let samples = group.flat_map(|sweep| sweep.samples.clone()).collect::<Vec<_>>();
            let voltage = samples.iter().map(|ii| self.voltage[*ii]).collect::<Vec<_>>();
            let current = samples.iter().map(|ii| self.current[*ii]).collect::<Vec<_>>();
            sink.draw(voltammogram, &format!("cycle {cycle}"), &voltage, &current)?;
        }

        for (label, peak_type) in [("anodic", PeakType::Anodic), ("cathodic", PeakType::Cathodic)] {
            let (voltage, current): (Vec<f64>, Vec<f64>) = output
                .peaks
                .iter()
                .filter(|peak| peak.peak_type == peak_type)
                .map(|peak| (peak.voltage, peak.current))
                .unzip();
            sink.draw(voltammogram, label, &voltage, &current)?;
        }

        #[allow(clippy::cast_precision_loss)]
        let cycles = output.pairs.iter().map(|pair| pair.cycle as f64).collect::<Vec<_>>();
        let e_half = output
            .pairs
            .iter()
            .map(|pair| pair.half_wave_potential)
            .collect::<Vec<_>>();
        sink.draw(CvPlot::HalfWavePotential.as_str(), "e_half", &cycles, &e_half)
    }

    fn save_data(&self, output: &CvAnalysis, store: &ResultsStore) -> Result<()> {
        #[derive(Serialize)]
        struct Record<'a> {
            cycles: usize,
            pairs: &'a [PeakPair],
            diffusion: &'a [CycleDiffusion],
        }
        store.write_record(
            self.name(),
            &Record {
                cycles: output.diffusion.len(),
                pairs: &output.pairs,
                diffusion: &output.diffusion,
            },
        )?;

        #[allow(clippy::cast_precision_loss)]
        let cycles = output.cycles.iter().map(|c| *c as f64).collect::<Vec<_>>();
        let directions = output
            .directions
            .iter()
            .map(|direction| match direction {
                ScanDirection::Forward => 1.0,
                ScanDirection::Backward => -1.0,
            })
            .collect::<Vec<_>>();
        let mut columns = vec![
            ("voltage", self.voltage.as_slice()),
            ("current", self.current.as_slice()),
            ("cycle", cycles.as_slice()),
            ("direction", directions.as_slice()),
        ];
        if let Some(time) = &self.time {
            columns.insert(0, ("time", time.as_slice()));
        }
        store.write_series("cyclic_voltammetry_segments", &columns)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CvPlot {
    Voltammogram,
    HalfWavePotential,
}

impl CvPlot {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Voltammogram => "voltammogram",
            Self::HalfWavePotential => "half_wave_potential",
        }
    }
}
