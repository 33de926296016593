use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempdir::TempDir;

use electrochem::persist::ResultsStore;
use electrochem::Result;

fn echem(args: &[&str], output: &Path) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_echem"))
        .args(args)
        .arg("--output")
        .arg(output)
        .output()?)
}

fn arrhenius_csv() -> String {
    // σ = 10 exp(-Ea / RT) with Ea = 30 kJ/mol
    let mut csv = String::from("Temperature (C),Conductivity (S/cm)\n");
    for celsius in [20.0f64, 40.0, 60.0, 80.0, 100.0] {
        let sigma = 10.0 * (-30_000.0 / (8.314 * (celsius + 273.15))).exp();
        csv.push_str(&format!("{celsius},{sigma:e}\n"));
    }
    csv
}

#[test]
fn arrhenius_results_are_written() -> Result<()> {
    let dir = TempDir::new("arrhenius_results_are_written")?;
    let data = dir.path().join("conductivity.csv");
    fs::write(&data, arrhenius_csv())?;
    let results = dir.path().join("results");

    let output = echem(
        &["--data", data.to_str().unwrap(), "--procedure", "arrhenius"],
        &results,
    )?;

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let record = ResultsStore::new(&results)?.read_record("arrhenius")?;
    approx::assert_relative_eq!(
        record["activation_energy"].as_float().unwrap(),
        30.0,
        max_relative = 1e-6
    );
    assert!(results.join("arrhenius_fit.csv").is_file());
    assert!(results.join("plots").join("arrhenius.csv").is_file());
    Ok(())
}

#[test]
fn chronoamperometry_reads_tab_separated_text() -> Result<()> {
    let dir = TempDir::new("chronoamperometry_reads_tab_separated_text")?;
    let data = dir.path().join("trace.txt");
    fs::write(
        &data,
        concat!(
            "time\tcurrent\tvoltage\n",
            "0\t0\t0.5\n1\t-0.1\t0.5\n2\t-0.05\t0.5\n3\t-0.033\t0.5\n4\t-0.025\t0.5\n",
        ),
    )?;
    let config = dir.path().join("settings.toml");
    fs::write(&config, "[electrode]\nelectrons = 2.0\n\n[chronoamperometry]\nwindow_size = 4\n")?;
    let results = dir.path().join("results");

    let output = echem(
        &[
            "--data",
            data.to_str().unwrap(),
            "--procedure",
            "voltammetry",
            "--technique",
            "ca",
            "--config",
            config.to_str().unwrap(),
        ],
        &results,
    )?;

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let record = ResultsStore::new(&results)?.read_record("chronoamperometry")?;
    assert_eq!(record["reaction_order"].as_integer(), Some(2));
    assert!(record["diffusion_coefficient"].as_float().unwrap() > 0.0);
    Ok(())
}

#[test]
fn unsupported_formats_fail() -> Result<()> {
    let dir = TempDir::new("unsupported_formats_fail")?;
    let data = dir.path().join("conductivity.xlsx");
    fs::write(&data, arrhenius_csv())?;
    let results = dir.path().join("results");

    let output = echem(
        &["--data", data.to_str().unwrap(), "--procedure", "arrhenius"],
        &results,
    )?;

    assert!(!output.status.success());
    assert!(!results.join("arrhenius.toml").exists());
    Ok(())
}

#[test]
fn voltammetry_needs_a_technique() -> Result<()> {
    let dir = TempDir::new("voltammetry_needs_a_technique")?;
    let data = dir.path().join("trace.csv");
    fs::write(&data, "time,current,voltage\n0,1,0\n")?;

    let output = echem(
        &["--data", data.to_str().unwrap(), "--procedure", "voltammetry"],
        &dir.path().join("results"),
    )?;

    assert!(!output.status.success());
    Ok(())
}

#[test]
fn missing_columns_fail() -> Result<()> {
    let dir = TempDir::new("missing_columns_fail")?;
    let data = dir.path().join("conductivity.json");
    fs::write(&data, r#"{"temperature": [20, 40, 60]}"#)?;

    let output = echem(
        &["--data", data.to_str().unwrap(), "--procedure", "arrhenius"],
        &dir.path().join("results"),
    )?;

    assert!(!output.status.success());
    Ok(())
}
