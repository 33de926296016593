use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, ValueEnum, ValueHint};
use slog::{crit, info, o, Drain, Logger};

use electrochem::arrhenius::ArrheniusAnalyzer;
use electrochem::config::Config;
use electrochem::eis::EisAnalyzer;
use electrochem::ingest::{MeasurementTable, Quantity};
use electrochem::persist::{CsvPlotSink, ResultsStore};
use electrochem::procedure::{Lifecycle, PlotSink, Procedure};
use electrochem::voltammetry::ca::ChronoamperometryAnalyzer;
use electrochem::voltammetry::cp::ChronopotentiometryAnalyzer;
use electrochem::voltammetry::cv::CyclicVoltammetryAnalyzer;
use electrochem::voltammetry::Signal;
use electrochem::Result;

#[derive(Parser, Debug)]
#[command(author, version, about = "Electrochemical measurement analysis", long_about = None)]
struct Args {
    /// Measurement table (.csv, .txt or .json)
    #[arg(long, value_hint = ValueHint::FilePath)]
    data: PathBuf,

    #[arg(long, value_enum)]
    procedure: ProcedureKind,

    /// Voltammetric technique, required for voltammetry
    #[arg(long, value_enum, required_if_eq("procedure", "voltammetry"))]
    technique: Option<Technique>,

    /// TOML configuration; defaults apply when absent
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Directory receiving result records and plot data
    #[arg(short, long, default_value = "results", value_hint = ValueHint::DirPath)]
    output: PathBuf,

    /// Log every circuit fit iteration
    #[arg(long, action = ArgAction::SetTrue)]
    trace_solver: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProcedureKind {
    Arrhenius,
    Impedance,
    Voltammetry,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Technique {
    /// Chronoamperometry
    Ca,
    /// Chronopotentiometry
    Cp,
    /// Cyclic voltammetry
    Cv,
}

fn terminal_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

/// Drive `procedure` through every stage
fn execute<P: Procedure>(
    procedure: &P,
    sink: &mut dyn PlotSink,
    store: &ResultsStore,
    logger: &Logger,
) -> Result<P::Output> {
    let mut lifecycle = Lifecycle::new(procedure).with_logger(logger.clone());
    lifecycle.analyze()?;
    lifecycle.plot(sink)?;
    lifecycle.persist(store)?;
    lifecycle.into_output()
}

fn run(args: &Args, logger: &Logger) -> Result<()> {
    let mut config = args
        .config
        .as_deref()
        .map(Config::from_file)
        .transpose()?
        .unwrap_or_default();
    config.eis.trace_solver |= args.trace_solver;

    let table = MeasurementTable::from_file(&args.data)?;
    info!(logger, "loaded measurement"; "path" => %args.data.display(), "rows" => table.len());

    let store = ResultsStore::new(&args.output)?;
    let mut sink = CsvPlotSink::new(args.output.join("plots"))?;

    match (args.procedure, args.technique) {
        (ProcedureKind::Arrhenius, _) => {
            let analyzer = ArrheniusAnalyzer::new(
                table.require(Quantity::Temperature)?.to_vec(),
                table.require(Quantity::Conductivity)?.to_vec(),
            )?
            .with_logger(logger.clone());
            let fit = execute(&analyzer, &mut sink, &store, logger)?;
            info!(logger, "activation energy";
                "kJ/mol" => fit.activation_energy, "prefactor" => fit.pre_exponential_factor);
        }
        (ProcedureKind::Impedance, _) => {
            let analyzer = EisAnalyzer::new(table.impedance_spectrum()?, config.eis.clone())
                .with_library(config.circuit_library())
                .with_logger(logger.clone());
            let analysis = execute(&analyzer, &mut sink, &store, logger)?;
            info!(logger, "equivalent circuit";
                "topology" => analysis.circuit.topology(), "rmse" => analysis.rmse);
        }
        (ProcedureKind::Voltammetry, technique) => {
            run_voltammetry(&table, &config, technique, &mut sink, &store, logger)?;
        }
    }
    info!(logger, "results written"; "directory" => %store.directory().display());
    Ok(())
}

fn run_voltammetry(
    table: &MeasurementTable,
    config: &Config,
    technique: Option<Technique>,
    sink: &mut dyn PlotSink,
    store: &ResultsStore,
    logger: &Logger,
) -> Result<()> {
    let current = table.require(Quantity::Current)?.to_vec();
    let voltage = table.require(Quantity::Voltage)?.to_vec();
    match technique.unwrap_or(Technique::Cv) {
        Technique::Ca => {
            let analyzer = ChronoamperometryAnalyzer::new(
                current,
                Signal::Series(voltage),
                table.require(Quantity::Time)?.to_vec(),
                config.electrode,
                config.chronoamperometry,
            )?
            .with_logger(logger.clone());
            let analysis = execute(&analyzer, sink, store, logger)?;
            info!(logger, "chronoamperometry";
                "diffusion_coefficient" => analysis.diffusion_coefficient,
                "reaction_order" => analysis.kinetics.order.as_u8());
        }
        Technique::Cp => {
            let analyzer = ChronopotentiometryAnalyzer::new(
                current,
                voltage,
                table.require(Quantity::Time)?.to_vec(),
                config.electrode,
                config.chronopotentiometry,
            )?
            .with_logger(logger.clone());
            let analysis = execute(&analyzer, sink, store, logger)?;
            info!(logger, "chronopotentiometry";
                "diffusion_coefficient" => analysis.diffusion_coefficient,
                "transitions" => analysis.transitions.len());
        }
        Technique::Cv => {
            let mut analyzer = CyclicVoltammetryAnalyzer::new(
                current,
                voltage,
                table.find(Quantity::Time).map(<[f64]>::to_vec),
                config.electrode,
                config.cyclic_voltammetry,
            )?
            .with_logger(logger.clone());
            if let Some(rates) = table.find(Quantity::ScanRate) {
                analyzer = analyzer.with_scan_rate(Signal::Series(rates.to_vec()))?;
            }
            let analysis = execute(&analyzer, sink, store, logger)?;
            info!(logger, "cyclic voltammetry";
                "cycles" => analysis.diffusion.len(), "pairs" => analysis.pairs.len());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let logger = terminal_logger();
    let status = match run(&args, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            crit!(logger, "analysis failed"; "data" => %args.data.display(), "error" => %err);
            ExitCode::FAILURE
        }
    };
    drop(logger);
    status
}
