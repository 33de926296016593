use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::Normal;
use rand_isaac::Isaac64Rng;

use electrochem::circuit::{Circuit, CircuitGuess, CircuitLibrary};
use electrochem::eis::{EisAnalyzer, EisConfig};
use electrochem::procedure::Procedure;
use electrochem::spectrum::ImpedanceSpectrum;
use electrochem::{Error, Result};

/// Ten points per decade from 100 kHz down to 0.1 Hz
fn frequencies() -> Vec<f64> {
    (0..=60).map(|ii| 10f64.powf(5.0 - f64::from(ii) * 0.1)).collect()
}

fn synthetic(topology: &str, parameters: &[f64]) -> ImpedanceSpectrum {
    let frequency = frequencies();
    let impedance = Circuit::parse(topology)
        .unwrap()
        .predict(parameters, &frequency);
    ImpedanceSpectrum::new(
        frequency,
        impedance.iter().map(|z| z.re).collect(),
        impedance.iter().map(|z| z.im).collect(),
        None,
    )
    .unwrap()
}

#[test]
fn a_suggested_circuit_recovers_its_parameters() -> Result<()> {
    let truth = [12.0, 150.0, 2e-6, 0.85];
    let spectrum = synthetic("R0-p(R1,CPE1)", &truth);

    let analysis = EisAnalyzer::new(spectrum, EisConfig::default())
        .with_suggested_circuit(CircuitGuess::new("R0-p(R1,CPE1)", vec![10.0, 100.0, 1e-6, 0.9]))
        .analyze()?;

    assert_eq!(analysis.circuit.topology(), "R0-p(R1,CPE1)");
    for (expected, actual) in truth.iter().zip(analysis.circuit.parameters()) {
        approx::assert_relative_eq!(expected, actual, max_relative = 1e-2);
    }
    assert_eq!(
        analysis.circuit.parameter_names(),
        &["R0", "R1", "CPE1_0", "CPE1_1"]
    );
    assert_eq!(analysis.circuit.uncertainties().len(), truth.len());
    assert!(analysis.rmse < 1e-3);
    assert_eq!(analysis.conductivity, None);
    assert_eq!(analysis.truncated_points, 0);
    assert_eq!(analysis.candidates.len(), 1);
    Ok(())
}

#[test]
fn an_exact_suggestion_is_accepted_as_converged() -> Result<()> {
    let truth = [12.0, 150.0, 2e-6, 0.85];
    let spectrum = synthetic("R0-p(R1,CPE1)", &truth);

    let analysis = EisAnalyzer::new(spectrum, EisConfig::default())
        .with_suggested_circuit(CircuitGuess::new("R0-p(R1,CPE1)", truth.to_vec()))
        .analyze()?;

    for (expected, actual) in truth.iter().zip(analysis.circuit.parameters()) {
        approx::assert_relative_eq!(expected, actual, max_relative = 1e-9);
    }
    assert!(analysis.rmse < 1e-9, "rmse {}", analysis.rmse);
    Ok(())
}

#[test]
fn the_library_picks_the_lowest_rmse() -> Result<()> {
    let spectrum = synthetic("R0-p(R1,C1)", &[15.0, 250.0, 3e-6]);
    let config = EisConfig {
        cell_constant: Some(0.5),
        ..EisConfig::default()
    };

    let analysis = EisAnalyzer::new(spectrum.clone(), config).analyze()?;

    assert_eq!(analysis.candidates.len(), CircuitLibrary::default().len());
    assert!(analysis.rmse < 1e-3, "rmse {}", analysis.rmse);
    assert!(analysis
        .candidates
        .iter()
        .filter_map(|candidate| candidate.rmse)
        .all(|rmse| analysis.rmse <= rmse));

    let fitted = analysis.circuit.predict(spectrum.frequency());
    for (z, (re, im)) in fitted
        .iter()
        .zip(spectrum.real().iter().zip(spectrum.imaginary()))
    {
        approx::assert_abs_diff_eq!(z.re, *re, epsilon = 1e-2);
        approx::assert_abs_diff_eq!(z.im, *im, epsilon = 1e-2);
    }
    approx::assert_relative_eq!(
        analysis.conductivity.unwrap(),
        0.5 / analysis.circuit.parameters()[0],
        max_relative = 1e-12
    );
    Ok(())
}

#[test]
fn noisy_spectra_still_fit() -> Result<()> {
    let truth = [15.0, 250.0, 3e-6];
    let clean = synthetic("R0-p(R1,C1)", &truth);
    let mut rng = Isaac64Rng::seed_from_u64(11);
    let noise = Normal::new(0.0, 1e-3).unwrap();
    let (real, imaginary): (Vec<f64>, Vec<f64>) = clean
        .real()
        .iter()
        .zip(clean.imaginary())
        .map(|(re, im)| {
            (
                re * (1.0 + rng.sample(noise)),
                im * (1.0 + rng.sample(noise)),
            )
        })
        .unzip();
    let spectrum = ImpedanceSpectrum::new(clean.frequency().to_vec(), real, imaginary, None)?;

    let analysis = EisAnalyzer::new(spectrum, EisConfig::default())
        .with_suggested_circuit(CircuitGuess::new("R0-p(R1,C1)", vec![10.0, 100.0, 1e-6]))
        .analyze()?;

    for (expected, actual) in truth.iter().zip(analysis.circuit.parameters()) {
        approx::assert_relative_eq!(expected, actual, max_relative = 2e-2);
    }
    assert!(analysis
        .circuit
        .uncertainties()
        .iter()
        .zip(analysis.circuit.parameters())
        .all(|(sigma, p)| sigma.is_finite() && *sigma < 0.05 * p));
    Ok(())
}

#[test]
fn inductive_points_are_dropped_before_fitting() -> Result<()> {
    let truth = [15.0, 250.0, 3e-6];
    let clean = synthetic("R0-p(R1,C1)", &truth);
    let mut frequency = vec![1e6, 5e5, 2e5];
    let mut real = vec![15.0; 3];
    let mut imaginary = frequency
        .iter()
        .map(|f| 2.0 * std::f64::consts::PI * f * 1e-6)
        .collect::<Vec<_>>();
    frequency.extend_from_slice(clean.frequency());
    real.extend_from_slice(clean.real());
    imaginary.extend_from_slice(clean.imaginary());
    let spectrum = ImpedanceSpectrum::new(frequency, real, imaginary, None)?;

    let analysis = EisAnalyzer::new(spectrum, EisConfig::default())
        .with_suggested_circuit(CircuitGuess::new("R0-p(R1,C1)", vec![10.0, 100.0, 1e-6]))
        .analyze()?;

    assert_eq!(analysis.truncated_points, 3);
    for (expected, actual) in truth.iter().zip(analysis.circuit.parameters()) {
        approx::assert_relative_eq!(expected, actual, max_relative = 1e-2);
    }
    Ok(())
}

#[test]
fn a_library_without_working_candidates_fails() {
    let spectrum = synthetic("R0-p(R1,C1)", &[15.0, 250.0, 3e-6]);
    let library = CircuitLibrary::new(vec![
        CircuitGuess::new("R0-p(R1,C1)", vec![10.0, 100.0]),
        CircuitGuess::new("R0-p(R1,", vec![10.0, 100.0, 1e-6]),
    ]);

    let result = EisAnalyzer::new(spectrum, EisConfig::default())
        .with_library(library)
        .analyze();

    assert!(matches!(result, Err(Error::NoCircuitConverged { attempted: 2 })));
}

#[test]
fn failing_candidates_are_reported_and_a_later_one_wins() -> Result<()> {
    let spectrum = synthetic("R0-p(R1,C1)", &[15.0, 250.0, 3e-6]);
    let library = CircuitLibrary::new(vec![
        CircuitGuess::new("R0-p(R1,C1)", vec![10.0, 100.0]),
        CircuitGuess::new("R0-p(R1,", vec![10.0, 100.0, 1e-6]),
        CircuitGuess::new("R0-p(R1,C1)", vec![10.0, 100.0, 1e-6]),
    ]);

    let analysis = EisAnalyzer::new(spectrum, EisConfig::default())
        .with_library(library)
        .analyze()?;

    assert_eq!(analysis.candidates.len(), 3);
    assert_eq!(analysis.candidates[0].rmse, None);
    assert_eq!(analysis.candidates[1].topology, "R0-p(R1,");
    assert_eq!(analysis.candidates[1].rmse, None);
    assert_eq!(analysis.candidates[2].rmse, Some(analysis.rmse));
    assert_eq!(analysis.circuit.topology(), "R0-p(R1,C1)");
    assert!(analysis.rmse < 1e-3, "rmse {}", analysis.rmse);
    Ok(())
}

#[test]
fn a_malformed_suggestion_is_reported() {
    let spectrum = synthetic("R0-p(R1,C1)", &[15.0, 250.0, 3e-6]);
    let result = EisAnalyzer::new(spectrum, EisConfig::default())
        .with_suggested_circuit(CircuitGuess::new("R0-q(R1,C1)", vec![1.0, 1.0, 1.0]))
        .analyze();
    assert!(matches!(result, Err(Error::CircuitSyntax { .. })));
}

#[test]
fn conductivity_uses_the_leading_resistance() -> Result<()> {
    let spectrum = synthetic("p(R1,C1)", &[250.0, 3e-6]);
    let config = EisConfig {
        cell_constant: Some(0.5),
        suggested_circuit: Some("p(R1,C1)".into()),
        initial_guess: Some(vec![100.0, 1e-6]),
        ..EisConfig::default()
    };
    let analysis = EisAnalyzer::new(spectrum, config).analyze()?;

    approx::assert_relative_eq!(
        analysis.conductivity.unwrap(),
        0.5 / 250.0,
        max_relative = 1e-2
    );
    Ok(())
}

#[test]
fn kramers_kronig_flags_a_distorted_spectrum() -> Result<()> {
    let good = synthetic("R0-p(R1,C1)", &[15.0, 250.0, 3e-6]);
    let distorted = ImpedanceSpectrum::new(
        good.frequency().to_vec(),
        good.real()
            .iter()
            .enumerate()
            .map(|(ii, re)| if ii % 7 == 3 { re * 1.3 } else { *re })
            .collect(),
        good.imaginary().to_vec(),
        None,
    )?;

    let good = EisAnalyzer::new(good, EisConfig::default()).validate()?;
    let bad = EisAnalyzer::new(distorted, EisConfig::default()).validate()?;

    assert!(bad.chi_square() > 100.0 * good.chi_square());
    Ok(())
}

#[test]
fn a_series_capacitance_is_absorbed_when_enabled() -> Result<()> {
    let blocking = synthetic("R0-p(R1,C1)-C2", &[15.0, 250.0, 3e-6, 1e-4]);

    let plain = EisAnalyzer::new(blocking.clone(), EisConfig::default()).validate()?;
    let capacitive = EisAnalyzer::new(
        blocking,
        EisConfig {
            add_capacitance: true,
            ..EisConfig::default()
        },
    )
    .validate()?;

    assert!(
        100.0 * capacitive.chi_square() < plain.chi_square(),
        "{} vs {}",
        capacitive.chi_square(),
        plain.chi_square()
    );
    assert_eq!(capacitive.fitted.len(), frequencies().len());
    Ok(())
}
