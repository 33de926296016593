//! Chronoamperometry.
//!
//! At a potential step the diffusion limited current decays following Cottrell,
//!
//! $$
//!     I(t) = n F A c \sqrt{\frac{D}{\pi t}}
//! $$
//!
//! so the slope of current against $t^{-1/2}$ over its most linear stretch gives the diffusion
//! coefficient. The same trace is also compared against first order ($\ln I$ linear in $t$) and
//! second order ($1 / I$ linear in $t$) decay.

use serde::{Deserialize, Serialize};
use slog::{debug, info, o, Discard, Logger};

use super::{validate_trace, ElectrodeConstants, Signal};
use crate::math::cumulative_trapezoid;
use crate::persist::ResultsStore;
use crate::procedure::{PlotSink, Procedure};
use crate::window::{find_best_linear_window, WindowFit};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaConfig {
    /// Number of samples in each window of the linear region search
    pub window_size: usize,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self { window_size: 10 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ReactionOrder {
    First,
    Second,
}

impl ReactionOrder {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::First => 1,
            Self::Second => 2,
        }
    }

    /// Unit of the rate constant of this order for a current in A
    pub const fn rate_unit(self) -> &'static str {
        match self {
            Self::First => "1/s",
            Self::Second => "1/(A s)",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReactionKinetics {
    pub order: ReactionOrder,
    /// In [`ReactionOrder::rate_unit`]
    pub rate_constant: f64,
    /// Window fit of the winning model, indices into the samples with t > 0 and I != 0
    pub fit: WindowFit,
}

impl ReactionKinetics {
    /// ln|I| = ln|I0| - k t
    fn first_order(fit: WindowFit) -> Self {
        Self {
            order: ReactionOrder::First,
            rate_constant: -fit.slope,
            fit,
        }
    }

    /// 1/|I| = 1/|I0| + k t
    fn second_order(fit: WindowFit) -> Self {
        Self {
            order: ReactionOrder::Second,
            rate_constant: fit.slope,
            fit,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaAnalysis {
    /// Cumulative charge in C, zero at the first sample
    pub charge: Vec<f64>,
    /// cm²/s
    pub diffusion_coefficient: f64,
    /// Window fit of current against t^(-1/2), indices into the samples with t > 0
    pub cottrell_fit: WindowFit,
    pub kinetics: ReactionKinetics,
}

pub struct ChronoamperometryAnalyzer {
    current: Vec<f64>,
    voltage: Signal,
    time: Vec<f64>,
    electrode: ElectrodeConstants,
    config: CaConfig,
    logger: Logger,
}

impl ChronoamperometryAnalyzer {
    /// # Errors
    /// Returns an error if the series are malformed or time does not increase.
    pub fn new(
        current: Vec<f64>,
        voltage: Signal,
        time: Vec<f64>,
        electrode: ElectrodeConstants,
        config: CaConfig,
    ) -> Result<Self> {
        let n = current.len();
        validate_trace(&current, &voltage.expand(n), &time)?;
        electrode.validate()?;
        Ok(Self {
            current,
            voltage,
            time,
            electrode,
            config,
            logger: Logger::root(Discard, o!()),
        })
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger.new(o!("procedure" => "chronoamperometry"));
        self
    }

    /// Cumulative charge in C
    pub fn charge(&self) -> Vec<f64> {
        cumulative_trapezoid(&self.current, &self.time)
    }

    /// Cottrell diffusion coefficient in cm²/s and the window it was read from
    ///
    /// # Errors
    /// Returns an error if fewer than two samples have t > 0 or no window can be fit.
    pub fn diffusion_coefficient(&self) -> Result<(f64, WindowFit)> {
        let (inverse_root_time, current): (Vec<f64>, Vec<f64>) = self
            .time
            .iter()
            .zip(&self.current)
            .filter(|(t, _)| **t > 0.0)
            .map(|(t, i)| (1.0 / t.sqrt(), *i))
            .unzip();
        let window = self.config.window_size.min(current.len());
        let fit = find_best_linear_window(&inverse_root_time, &current, window)?
            .ok_or_else(|| Error::Convergence("no linear Cottrell region".into()))?;
        debug!(self.logger, "Cottrell window";
            "start" => fit.start, "end" => fit.end, "r_squared" => fit.r_squared);

        let diffusion = std::f64::consts::PI * (fit.slope / self.electrode.charge_scale()).powi(2);
        Ok((diffusion, fit))
    }

    /// Compare first and second order decay of the current magnitude, first order winning ties
    ///
    /// Only samples with t > 0 and a non-zero current take part, so cathodic traces and traces
    /// starting from zero current are fit on |I|.
    ///
    /// # Errors
    /// Returns [`Error::DegenerateMath`] if fewer than two samples remain or neither model can be
    /// fit.
    pub fn reaction_kinetics(&self) -> Result<ReactionKinetics> {
        let (time, magnitude): (Vec<f64>, Vec<f64>) = self
            .time
            .iter()
            .zip(&self.current)
            .filter(|(t, i)| **t > 0.0 && i.abs() > 0.0)
            .map(|(t, i)| (*t, i.abs()))
            .unzip();
        if time.len() < 2 {
            return Err(Error::degenerate(format!(
                "{} samples with t > 0 and non-zero current, reaction order needs 2",
                time.len()
            )));
        }
        let window = self.config.window_size.min(time.len());
        let log_current = magnitude.iter().map(|i| i.ln()).collect::<Vec<_>>();
        let inverse_current = magnitude.iter().map(|i| i.recip()).collect::<Vec<_>>();
        let first = find_best_linear_window(&time, &log_current, window)?;
        let second = find_best_linear_window(&time, &inverse_current, window)?;

        let kinetics = match (first, second) {
            (None, None) => {
                return Err(Error::degenerate("neither decay model could be fit"));
            }
            (Some(first), Some(second)) if second.r_squared > first.r_squared => {
                ReactionKinetics::second_order(second)
            }
            (None, Some(second)) => ReactionKinetics::second_order(second),
            (Some(first), _) => ReactionKinetics::first_order(first),
        };
        if let (Some(first), Some(second)) = (first, second) {
            if (first.r_squared - second.r_squared).abs() <= f64::EPSILON {
                debug!(self.logger, "decay models tie, taking first order");
            }
        }
        info!(self.logger, "reaction order";
            "order" => kinetics.order.as_u8(),
            "rate_constant" => kinetics.rate_constant,
            "first_r_squared" => first.map_or(f64::NAN, |fit| fit.r_squared),
            "second_r_squared" => second.map_or(f64::NAN, |fit| fit.r_squared));
        Ok(kinetics)
    }
}

impl Procedure for ChronoamperometryAnalyzer {
    type Output = CaAnalysis;

    fn name(&self) -> &'static str {
        "chronoamperometry"
    }

    fn analyze(&self) -> Result<CaAnalysis> {
        let charge = self.charge();
        let (diffusion_coefficient, cottrell_fit) = self.diffusion_coefficient()?;
        let kinetics = self.reaction_kinetics()?;
        Ok(CaAnalysis {
            charge,
            diffusion_coefficient,
            cottrell_fit,
            kinetics,
        })
    }

    fn plot(&self, output: &CaAnalysis, sink: &mut dyn PlotSink) -> Result<()> {
        sink.draw(CaPlot::Current.as_str(), "current", &self.time, &self.current)?;
        sink.draw(CaPlot::Charge.as_str(), "charge", &self.time, &output.charge)?;

        let (inverse_root_time, current): (Vec<f64>, Vec<f64>) = self
            .time
            .iter()
            .zip(&self.current)
            .filter(|(t, _)| **t > 0.0)
            .map(|(t, i)| (1.0 / t.sqrt(), *i))
            .unzip();
        sink.draw(CaPlot::Cottrell.as_str(), "measured", &inverse_root_time, &current)?;
        let window = &inverse_root_time[output.cottrell_fit.start..output.cottrell_fit.end];
        let fitted = window
            .iter()
            .map(|x| output.cottrell_fit.slope.mul_add(*x, output.cottrell_fit.intercept))
            .collect::<Vec<_>>();
        sink.draw(CaPlot::Cottrell.as_str(), "fitted", window, &fitted)
    }

    fn save_data(&self, output: &CaAnalysis, store: &ResultsStore) -> Result<()> {
        #[derive(Serialize)]
        struct Record {
            diffusion_coefficient: f64,
            cottrell_r_squared: f64,
            reaction_order: u8,
            rate_constant: f64,
            rate_constant_unit: &'static str,
            kinetics_r_squared: f64,
        }
        store.write_record(
            self.name(),
            &Record {
                diffusion_coefficient: output.diffusion_coefficient,
                cottrell_r_squared: output.cottrell_fit.r_squared,
                reaction_order: output.kinetics.order.as_u8(),
                rate_constant: output.kinetics.rate_constant,
                rate_constant_unit: output.kinetics.order.rate_unit(),
                kinetics_r_squared: output.kinetics.fit.r_squared,
            },
        )?;
        store.write_series(
            "chronoamperometry_charge",
            &[
                ("time", self.time.as_slice()),
                ("voltage", &self.voltage.expand(self.time.len())),
                ("current", &self.current),
                ("charge", &output.charge),
            ],
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaPlot {
    Current,
    Charge,
    Cottrell,
}

impl CaPlot {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Current => "chronoamperometry_current",
            Self::Charge => "chronoamperometry_charge",
            Self::Cottrell => "cottrell",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CaConfig, ChronoamperometryAnalyzer, ReactionOrder};
    use crate::math::differentiate_cumulative;
    use crate::procedure::Procedure;
    use crate::voltammetry::{ElectrodeConstants, Signal};
    use crate::{Error, Result};

    fn analyzer(
        current: Vec<f64>,
        time: Vec<f64>,
        window_size: usize,
    ) -> ChronoamperometryAnalyzer {
        ChronoamperometryAnalyzer::new(
            current,
            Signal::Constant(0.5),
            time,
            ElectrodeConstants::default(),
            CaConfig { window_size },
        )
        .unwrap()
    }

    #[test]
    fn cottrell_decay_gives_back_the_diffusion_coefficient() -> Result<()> {
        let electrode = ElectrodeConstants::default();
        let diffusion = 1e-5;
        let time = (1..=50).map(|ii| f64::from(ii) * 0.1).collect::<Vec<_>>();
        let current = time
            .iter()
            .map(|t| electrode.charge_scale() * (diffusion / (std::f64::consts::PI * t)).sqrt())
            .collect();

        let (estimate, fit) = analyzer(current, time, 10).diffusion_coefficient()?;

        approx::assert_relative_eq!(estimate, diffusion, max_relative = 1e-9);
        assert_eq!(fit.len(), 10);
        Ok(())
    }

    #[test]
    fn exponential_decay_is_first_order() -> Result<()> {
        let time = (0..30).map(f64::from).collect::<Vec<_>>();
        let current = time.iter().map(|t| 1e-3 * (-0.2 * t).exp()).collect();

        let kinetics = analyzer(current, time, 10).reaction_kinetics()?;

        assert_eq!(kinetics.order, ReactionOrder::First);
        approx::assert_relative_eq!(kinetics.rate_constant, 0.2, max_relative = 1e-9);
        Ok(())
    }

    #[test]
    fn hyperbolic_decay_is_second_order() -> Result<()> {
        let time = (0..30).map(f64::from).collect::<Vec<_>>();
        // 1 / I = 1 / I0 + k t
        let current = time.iter().map(|t| 1.0 / 50.0f64.mul_add(*t, 100.0)).collect();

        let kinetics = analyzer(current, time, 10).reaction_kinetics()?;

        assert_eq!(kinetics.order, ReactionOrder::Second);
        approx::assert_relative_eq!(kinetics.rate_constant, 50.0, max_relative = 1e-9);
        Ok(())
    }

    #[test]
    fn charge_integration_inverts() {
        let time = vec![0.0, 0.5, 1.7, 2.0, 3.1, 4.4];
        let current = vec![1e-3, 8e-4, 5e-4, 4.5e-4, 3e-4, 2e-4];
        let ca = analyzer(current.clone(), time.clone(), 4);

        let recovered = differentiate_cumulative(&ca.charge(), &time, current[0]);

        for (expected, actual) in current.iter().zip(&recovered) {
            approx::assert_relative_eq!(expected, actual, max_relative = 1e-9);
        }
    }

    #[test]
    fn cathodic_exponential_decay_recovers_its_rate() -> Result<()> {
        let time = (0..30).map(f64::from).collect::<Vec<_>>();
        let current = time.iter().map(|t| -2e-3 * (-0.15 * t).exp()).collect();

        let kinetics = analyzer(current, time, 10).reaction_kinetics()?;

        assert_eq!(kinetics.order, ReactionOrder::First);
        approx::assert_relative_eq!(kinetics.rate_constant, 0.15, max_relative = 1e-9);
        assert_eq!(kinetics.order.rate_unit(), "1/s");
        Ok(())
    }

    #[test]
    fn cathodic_hyperbolic_decay_is_second_order() -> Result<()> {
        let time = (0..30).map(f64::from).collect::<Vec<_>>();
        let current = time.iter().map(|t| -1.0 / 20.0f64.mul_add(*t, 400.0)).collect();

        let kinetics = analyzer(current, time, 10).reaction_kinetics()?;

        assert_eq!(kinetics.order, ReactionOrder::Second);
        approx::assert_relative_eq!(kinetics.rate_constant, 20.0, max_relative = 1e-9);
        Ok(())
    }

    #[test]
    fn a_zero_start_is_left_out_of_the_kinetics() -> Result<()> {
        // |I| = 0.1 / t, so 1/|I| is linear in time once t = 0 is dropped
        let ca = analyzer(
            vec![0.0, -0.1, -0.05, -0.033, -0.025],
            vec![0.0, 1.0, 2.0, 3.0, 4.0],
            10,
        );
        let output = ca.analyze()?;

        assert!(output.diffusion_coefficient.is_finite());
        assert!(output.diffusion_coefficient > 0.0);
        assert_eq!(output.kinetics.order, ReactionOrder::Second);
        assert_eq!(output.kinetics.fit.len(), 4);
        approx::assert_relative_eq!(output.kinetics.rate_constant, 10.0, max_relative = 2e-2);
        Ok(())
    }

    #[test]
    fn a_trace_without_current_has_no_kinetics() {
        let ca = analyzer(vec![0.0; 6], (0..6).map(f64::from).collect(), 10);
        assert!(matches!(ca.reaction_kinetics(), Err(Error::DegenerateMath(_))));
    }
}
