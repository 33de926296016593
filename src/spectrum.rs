use std::marker::PhantomData;

use ndarray_linalg::c64;

use crate::{Error, Result};

/// One measured impedance spectrum
///
/// The frequency, real and imaginary series are fixed at construction. The phase shift is either
/// supplied with the measurement or derived from the impedance while building, so every
/// `ImpedanceSpectrum` carries a resolved phase.
#[derive(Clone, Debug)]
pub struct ImpedanceSpectrum {
    /// Measurement frequency in Hz
    frequency: Vec<f64>,
    /// Real part of the impedance in Ohm
    real: Vec<f64>,
    /// Imaginary part of the impedance in Ohm
    imaginary: Vec<f64>,
    /// Phase shift in degrees
    phase_shift: Vec<f64>,
}

pub enum PhasePending {}
pub enum PhaseResolved {}

/// Two-phase construction of an [`ImpedanceSpectrum`]
///
/// The builder only exposes `build` once the phase shift has been resolved, either by passing the
/// measured phase or by asking for it to be derived.
pub struct SpectrumBuilder<N> {
    frequency: Vec<f64>,
    real: Vec<f64>,
    imaginary: Vec<f64>,
    phase_shift: Vec<f64>,
    phantom_data: PhantomData<N>,
}

impl SpectrumBuilder<PhasePending> {
    /// Attach a measured phase shift in degrees, checked against the impedance by `build`
    pub fn with_phase_shift(self, phase_shift: Vec<f64>) -> SpectrumBuilder<PhaseResolved> {
        SpectrumBuilder {
            frequency: self.frequency,
            real: self.real,
            imaginary: self.imaginary,
            phase_shift,
            phantom_data: PhantomData,
        }
    }

    pub fn derive_phase_shift(self) -> SpectrumBuilder<PhaseResolved> {
        let phase_shift = self
            .real
            .iter()
            .zip(&self.imaginary)
            .map(|(&re, &im)| phase_shift(re, im))
            .collect();
        SpectrumBuilder {
            frequency: self.frequency,
            real: self.real,
            imaginary: self.imaginary,
            phase_shift,
            phantom_data: PhantomData,
        }
    }
}

impl SpectrumBuilder<PhaseResolved> {
    /// Validate the series and build the spectrum
    ///
    /// # Errors
    /// Returns an error if the series (phase shift included) are empty or of unequal length, if
    /// any value is non-finite, or if any frequency is not strictly positive.
    pub fn build(self) -> Result<ImpedanceSpectrum> {
        let n = self.frequency.len();
        if n == 0 {
            return Err(Error::invalid("impedance spectrum is empty"));
        }
        if self.real.len() != n || self.imaginary.len() != n || self.phase_shift.len() != n {
            return Err(Error::invalid(format!(
                "impedance series lengths differ: frequency {n}, real {}, imaginary {}, phase {}",
                self.real.len(),
                self.imaginary.len(),
                self.phase_shift.len()
            )));
        }
        if let Some(bad) = self.frequency.iter().find(|&&f| !(f.is_finite() && f > 0.0)) {
            return Err(Error::invalid(format!(
                "frequencies must be finite and positive, found {bad}"
            )));
        }
        if self
            .real
            .iter()
            .chain(&self.imaginary)
            .any(|v| !v.is_finite())
        {
            return Err(Error::invalid("impedance contains non-finite values"));
        }
        if self.phase_shift.iter().any(|p| !p.is_finite()) {
            return Err(Error::invalid("phase shift contains non-finite values"));
        }

        Ok(ImpedanceSpectrum {
            frequency: self.frequency,
            real: self.real,
            imaginary: self.imaginary,
            phase_shift: self.phase_shift,
        })
    }
}

/// Phase angle of `re + j im` in degrees
pub fn phase_shift(re: f64, im: f64) -> f64 {
    im.atan2(re).to_degrees()
}

impl ImpedanceSpectrum {
    pub fn builder(
        frequency: Vec<f64>,
        real: Vec<f64>,
        imaginary: Vec<f64>,
    ) -> SpectrumBuilder<PhasePending> {
        SpectrumBuilder {
            frequency,
            real,
            imaginary,
            phase_shift: vec![],
            phantom_data: PhantomData,
        }
    }

    /// Build a spectrum, deriving the phase shift when it is not supplied
    ///
    /// # Errors
    /// See [`SpectrumBuilder::build`]
    pub fn new(
        frequency: Vec<f64>,
        real: Vec<f64>,
        imaginary: Vec<f64>,
        phase_shift: Option<Vec<f64>>,
    ) -> Result<Self> {
        let builder = Self::builder(frequency, real, imaginary);
        match phase_shift {
            Some(phase) => builder.with_phase_shift(phase).build(),
            None => builder.derive_phase_shift().build(),
        }
    }

    pub fn frequency(&self) -> &[f64] {
        &self.frequency
    }

    pub fn real(&self) -> &[f64] {
        &self.real
    }

    pub fn imaginary(&self) -> &[f64] {
        &self.imaginary
    }

    pub fn phase_shift(&self) -> &[f64] {
        &self.phase_shift
    }

    pub fn len(&self) -> usize {
        self.frequency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
    }

    pub fn angular_frequency(&self) -> Vec<f64> {
        self.frequency
            .iter()
            .map(|f| 2.0 * std::f64::consts::PI * f)
            .collect()
    }

    pub fn impedance(&self) -> Vec<c64> {
        self.real
            .iter()
            .zip(&self.imaginary)
            .map(|(&re, &im)| c64::new(re, im))
            .collect()
    }

    pub fn modulus(&self) -> Vec<f64> {
        self.real
            .iter()
            .zip(&self.imaginary)
            .map(|(re, im)| re.hypot(*im))
            .collect()
    }

    /// The sub-spectrum of samples for which `keep` holds
    pub(crate) fn retain(&self, keep: impl Fn(usize) -> bool) -> Self {
        let pick = |series: &[f64]| {
            series
                .iter()
                .enumerate()
                .filter(|(ii, _)| keep(*ii))
                .map(|(_, v)| *v)
                .collect::<Vec<_>>()
        };
        Self {
            frequency: pick(&self.frequency),
            real: pick(&self.real),
            imaginary: pick(&self.imaginary),
            phase_shift: pick(&self.phase_shift),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ImpedanceSpectrum;
    use crate::Error;

    #[test]
    fn phase_is_derived_when_absent() {
        let spectrum =
            ImpedanceSpectrum::new(vec![1., 10.], vec![1., 1.], vec![-1., 0.], None).unwrap();
        approx::assert_relative_eq!(spectrum.phase_shift()[0], -45.);
        approx::assert_relative_eq!(spectrum.phase_shift()[1], 0.);
    }

    #[test]
    fn a_phase_with_gaps_is_rejected() {
        let result = ImpedanceSpectrum::builder(vec![1., 10.], vec![0., 1.], vec![-1., 0.])
            .with_phase_shift(vec![f64::NAN, 12.])
            .build();
        assert!(matches!(result, Err(Error::InputValidation(_))));
    }

    #[test]
    fn a_phase_of_the_wrong_length_is_rejected() {
        let result =
            ImpedanceSpectrum::new(vec![1., 10.], vec![1., 1.], vec![-1., 0.], Some(vec![-45.]));
        assert!(matches!(result, Err(Error::InputValidation(_))));
    }

    #[test]
    fn measured_phase_is_kept() {
        let spectrum =
            ImpedanceSpectrum::new(vec![1.], vec![1.], vec![-1.], Some(vec![-44.])).unwrap();
        approx::assert_relative_eq!(spectrum.phase_shift()[0], -44.);
    }

    #[test]
    fn non_positive_frequencies_are_rejected() {
        let result = ImpedanceSpectrum::new(vec![0., 10.], vec![1., 1.], vec![-1., 0.], None);
        assert!(matches!(result, Err(Error::InputValidation(_))));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let result = ImpedanceSpectrum::new(vec![1., 10.], vec![1.], vec![-1., 0.], None);
        assert!(matches!(result, Err(Error::InputValidation(_))));
    }
}
