//! Kramers–Kronig consistency of an impedance spectrum.
//!
//! A causal, linear and stable system can be represented by a series of RC elements with time
//! constants spread over the measured frequency range. The test fits such a series (plus a series
//! resistance, inductance and optionally a capacitance) by linear least squares and increases the
//! number of RC elements until the fit starts to need negative resistances, as measured by
//!
//! $$
//!     \mu = 1 - \frac{\sum_{R_k < 0} |R_k|}{\sum_{R_k \ge 0} |R_k|}
//! $$
//!
//! dropping to the cut-off. The residuals of the final fit, relative to the measured modulus,
//! quantify how far the spectrum is from a valid one.

use ndarray::{Array1, Array2};
use ndarray_linalg::{c64, LeastSquaresSvd};

use crate::spectrum::ImpedanceSpectrum;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug)]
pub struct KramersKronig {
    pub max_rc_elements: usize,
    pub cut_off: f64,
    pub add_capacitance: bool,
}

impl Default for KramersKronig {
    fn default() -> Self {
        Self {
            max_rc_elements: 50,
            cut_off: 0.85,
            add_capacitance: false,
        }
    }
}

/// Outcome of a Kramers–Kronig validation
#[derive(Clone, Debug)]
pub struct KkValidation {
    /// Number of RC elements in the final fit
    pub elements_used: usize,
    /// Fit quality score μ of the final fit
    pub mu: f64,
    /// Whether μ reached the cut-off before the element limit
    pub converged: bool,
    pub fitted: Vec<c64>,
    /// (Z - Z_fit) / |Z| for the real part
    pub real_residuals: Vec<f64>,
    /// (Z - Z_fit) / |Z| for the imaginary part
    pub imag_residuals: Vec<f64>,
}

impl KkValidation {
    /// Summed squares of the real and imaginary residuals
    pub fn chi_square(&self) -> f64 {
        self.real_residuals
            .iter()
            .chain(&self.imag_residuals)
            .map(|r| r * r)
            .sum()
    }
}

/// Fitted series of RC elements for a fixed number of time constants
struct RcSeries {
    time_constants: Vec<f64>,
    /// series resistance, RC resistances, optional inverse capacitance, inductance
    coefficients: Array1<f64>,
    add_capacitance: bool,
}

impl RcSeries {
    fn resistances(&self) -> &[f64] {
        let m = self.time_constants.len();
        self.coefficients
            .as_slice()
            .map_or(&[][..], |coeffs| &coeffs[1..=m])
    }

    fn mu(&self) -> f64 {
        let (negative, positive) = self
            .resistances()
            .iter()
            .fold((0.0, 0.0), |(neg, pos), &r| {
                if r < 0.0 {
                    (neg + r.abs(), pos)
                } else {
                    (neg, pos + r)
                }
            });
        if positive > 0.0 {
            1.0 - negative / positive
        } else {
            0.0
        }
    }

    fn impedance(&self, omega: f64) -> c64 {
        let m = self.time_constants.len();
        let mut z = c64::new(self.coefficients[0], 0.0);
        for (tau, r) in self.time_constants.iter().zip(self.resistances()) {
            z += c64::new(*r, 0.0) / c64::new(1.0, omega * tau);
        }
        let mut next = m + 1;
        if self.add_capacitance {
            z += c64::new(0.0, -self.coefficients[next] / omega);
            next += 1;
        }
        z + c64::new(0.0, omega * self.coefficients[next])
    }
}

impl KramersKronig {
    /// Validate `spectrum`
    ///
    /// # Errors
    /// Returns an error if the settings are out of range or the least squares solve fails.
    pub fn validate(&self, spectrum: &ImpedanceSpectrum) -> Result<KkValidation> {
        if self.max_rc_elements == 0 {
            return Err(Error::invalid("at least one RC element is required"));
        }
        if !(self.cut_off > 0.0 && self.cut_off <= 1.0) {
            return Err(Error::invalid(format!(
                "Kramers-Kronig cut-off must lie in (0, 1], got {}",
                self.cut_off
            )));
        }

        let omega = spectrum.angular_frequency();
        let observed = spectrum.impedance();
        let modulus = spectrum.modulus();

        let mut fit = self.fit(&omega, &observed, &modulus, 1)?;
        let mut converged = fit.mu() <= self.cut_off;
        let mut elements = 1;
        while !converged && elements < self.max_rc_elements {
            elements += 1;
            fit = self.fit(&omega, &observed, &modulus, elements)?;
            converged = fit.mu() <= self.cut_off;
        }

        let fitted = omega.iter().map(|&w| fit.impedance(w)).collect::<Vec<_>>();
        let (real_residuals, imag_residuals) = observed
            .iter()
            .zip(&fitted)
            .zip(&modulus)
            .map(|((z, z_fit), m)| ((z.re - z_fit.re) / m, (z.im - z_fit.im) / m))
            .unzip();

        Ok(KkValidation {
            elements_used: elements,
            mu: fit.mu(),
            converged,
            fitted,
            real_residuals,
            imag_residuals,
        })
    }

    fn fit(
        &self,
        omega: &[f64],
        observed: &[c64],
        modulus: &[f64],
        elements: usize,
    ) -> Result<RcSeries> {
        let time_constants = time_constants(omega, elements);
        let n = omega.len();
        let columns = elements + 2 + usize::from(self.add_capacitance);

        let mut design = Array2::zeros((2 * n, columns));
        let mut rhs = Array1::zeros(2 * n);
        for (ii, ((&w, z), m)) in omega.iter().zip(observed).zip(modulus).enumerate() {
            let weight = 1.0 / m;
            design[[ii, 0]] = weight;
            for (kk, tau) in time_constants.iter().enumerate() {
                let wt = w * tau;
                let denominator = wt.mul_add(wt, 1.0);
                design[[ii, kk + 1]] = weight / denominator;
                design[[n + ii, kk + 1]] = -weight * wt / denominator;
            }
            let mut next = elements + 1;
            if self.add_capacitance {
                design[[n + ii, next]] = -weight / w;
                next += 1;
            }
            design[[n + ii, next]] = weight * w;

            rhs[ii] = z.re * weight;
            rhs[n + ii] = z.im * weight;
        }

        let coefficients = design.least_squares(&rhs)?.solution;

        Ok(RcSeries {
            time_constants,
            coefficients,
            add_capacitance: self.add_capacitance,
        })
    }
}

/// `count` time constants spaced logarithmically between the inverse maximum and minimum angular
/// frequency
fn time_constants(omega: &[f64], count: usize) -> Vec<f64> {
    let (lo, hi) = omega
        .iter()
        .fold((f64::INFINITY, 0.0f64), |(lo, hi), &w| (lo.min(w), hi.max(w)));
    let tau_min = (1.0 / hi).log10();
    let tau_max = (1.0 / lo).log10();
    if count == 1 {
        return vec![10f64.powf(tau_min)];
    }
    #[allow(clippy::cast_precision_loss)]
    let step = (tau_max - tau_min) / (count - 1) as f64;
    (0..count)
        .map(|kk| {
            #[allow(clippy::cast_precision_loss)]
            let exponent = (kk as f64).mul_add(step, tau_min);
            10f64.powf(exponent)
        })
        .collect()
}
