use std::fmt;

use slog::{debug, o, Discard, Logger};

use crate::persist::ResultsStore;
use crate::{Error, Result};

/// Receiver for the data behind a procedure's figures
///
/// Procedures describe each figure as named `(x, y)` series; how they are drawn is up to the
/// implementation. Sinks never see the procedure itself, only copies of derived data.
pub trait PlotSink {
    fn draw(&mut self, plot: &str, series: &str, x: &[f64], y: &[f64]) -> Result<()>;
}

/// Capability shared by every analysis procedure
pub trait Procedure {
    type Output;

    /// Short name used for result files
    fn name(&self) -> &'static str;

    /// Run the analysis
    ///
    /// # Errors
    /// Returns an error if the measurement cannot be analysed.
    fn analyze(&self) -> Result<Self::Output>;

    /// Hand the figure data of `output` to `sink`
    ///
    /// # Errors
    /// Propagates errors raised by the sink.
    fn plot(&self, output: &Self::Output, sink: &mut dyn PlotSink) -> Result<()>;

    /// Persist `output` to `store`
    ///
    /// # Errors
    /// Propagates errors raised by the store.
    fn save_data(&self, output: &Self::Output, store: &ResultsStore) -> Result<()>;

    /// Analyse, plot and persist in order
    ///
    /// # Errors
    /// Propagates the first failing stage.
    fn perform_all_actions(
        &self,
        sink: &mut dyn PlotSink,
        store: &ResultsStore,
    ) -> Result<Self::Output>
    where
        Self: Sized,
    {
        let mut lifecycle = Lifecycle::new(self);
        lifecycle.analyze()?;
        lifecycle.plot(sink)?;
        lifecycle.persist(store)?;
        lifecycle.into_output()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Created,
    Analyzed,
    Plotted,
    Persisted,
}

impl Stage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Analyzed => "analyzed",
            Self::Plotted => "plotted",
            Self::Persisted => "persisted",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives one procedure through `Created → Analyzed → Plotted → Persisted`
///
/// Each stage runs once, and only after the stage before it.
pub struct Lifecycle<'a, P: Procedure> {
    procedure: &'a P,
    stage: Stage,
    output: Option<P::Output>,
    logger: Logger,
}

impl<'a, P: Procedure> Lifecycle<'a, P> {
    pub fn new(procedure: &'a P) -> Self {
        Self {
            procedure,
            stage: Stage::Created,
            output: None,
            logger: Logger::root(Discard, o!()),
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger.new(o!("procedure" => self.procedure.name()));
        self
    }

    pub const fn stage(&self) -> Stage {
        self.stage
    }

    pub const fn output(&self) -> Option<&P::Output> {
        self.output.as_ref()
    }

    fn advance(&mut self, attempted: &'static str, from: Stage, to: Stage) -> Result<()> {
        if self.stage != from {
            return Err(Error::Lifecycle {
                attempted,
                stage: self.stage.as_str(),
            });
        }
        debug!(self.logger, "stage transition"; "from" => from.as_str(), "to" => to.as_str());
        self.stage = to;
        Ok(())
    }

    /// # Errors
    /// Returns [`Error::Lifecycle`] unless the procedure is freshly created, or the analysis
    /// error.
    pub fn analyze(&mut self) -> Result<&P::Output> {
        if self.stage != Stage::Created {
            return Err(Error::Lifecycle {
                attempted: "analyze",
                stage: self.stage.as_str(),
            });
        }
        let output = self.procedure.analyze()?;
        self.advance("analyze", Stage::Created, Stage::Analyzed)?;
        Ok(self.output.insert(output))
    }

    /// # Errors
    /// Returns [`Error::Lifecycle`] unless the procedure has just been analysed, or the sink
    /// error.
    pub fn plot(&mut self, sink: &mut dyn PlotSink) -> Result<()> {
        let Some(output) = self.output.as_ref().filter(|_| self.stage == Stage::Analyzed) else {
            return Err(Error::Lifecycle {
                attempted: "plot",
                stage: self.stage.as_str(),
            });
        };
        self.procedure.plot(output, sink)?;
        self.advance("plot", Stage::Analyzed, Stage::Plotted)
    }

    /// # Errors
    /// Returns [`Error::Lifecycle`] unless the procedure has just been plotted, or the store
    /// error.
    pub fn persist(&mut self, store: &ResultsStore) -> Result<()> {
        let Some(output) = self.output.as_ref().filter(|_| self.stage == Stage::Plotted) else {
            return Err(Error::Lifecycle {
                attempted: "persist",
                stage: self.stage.as_str(),
            });
        };
        self.procedure.save_data(output, store)?;
        self.advance("persist", Stage::Plotted, Stage::Persisted)
    }

    /// # Errors
    /// Returns [`Error::Lifecycle`] if the procedure was never analysed.
    pub fn into_output(self) -> Result<P::Output> {
        let stage = self.stage;
        self.output.ok_or(Error::Lifecycle {
            attempted: "take the output of",
            stage: stage.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tempdir::TempDir;

    use super::{Lifecycle, PlotSink, Procedure, Stage};
    use crate::persist::ResultsStore;
    use crate::{Error, Result};

    #[derive(Default)]
    struct Counting {
        analyses: Cell<usize>,
    }

    impl Procedure for Counting {
        type Output = usize;

        fn name(&self) -> &'static str {
            "counting"
        }

        fn analyze(&self) -> Result<usize> {
            self.analyses.set(self.analyses.get() + 1);
            Ok(self.analyses.get())
        }

        fn plot(&self, output: &usize, sink: &mut dyn PlotSink) -> Result<()> {
            #[allow(clippy::cast_precision_loss)]
            sink.draw("count", "analyses", &[0.0], &[*output as f64])
        }

        fn save_data(&self, output: &usize, store: &ResultsStore) -> Result<()> {
            #[derive(serde::Serialize)]
            struct Record {
                analyses: usize,
            }
            store.write_record(self.name(), &Record { analyses: *output })
        }
    }

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl PlotSink for Recorder {
        fn draw(&mut self, plot: &str, series: &str, _x: &[f64], _y: &[f64]) -> Result<()> {
            self.0.push(format!("{plot}/{series}"));
            Ok(())
        }
    }

    #[test]
    fn stages_run_in_order() -> Result<()> {
        let dir = TempDir::new("stages_run_in_order")?;
        let store = ResultsStore::new(dir.path())?;
        let procedure = Counting::default();
        let mut sink = Recorder::default();

        let output = procedure.perform_all_actions(&mut sink, &store)?;

        assert_eq!(output, 1);
        assert_eq!(sink.0, vec!["count/analyses".to_owned()]);
        assert!(dir.path().join("counting.toml").exists());
        Ok(())
    }

    #[test]
    fn out_of_order_stages_are_rejected() -> Result<()> {
        let dir = TempDir::new("out_of_order_stages_are_rejected")?;
        let store = ResultsStore::new(dir.path())?;
        let procedure = Counting::default();
        let mut sink = Recorder::default();

        let mut lifecycle = Lifecycle::new(&procedure);
        assert!(matches!(
            lifecycle.plot(&mut sink),
            Err(Error::Lifecycle {
                attempted: "plot",
                stage: "created"
            })
        ));

        lifecycle.analyze()?;
        assert!(matches!(lifecycle.analyze(), Err(Error::Lifecycle { .. })));
        assert!(matches!(lifecycle.persist(&store), Err(Error::Lifecycle { .. })));
        assert_eq!(lifecycle.stage(), Stage::Analyzed);
        assert_eq!(procedure.analyses.get(), 1);

        lifecycle.plot(&mut sink)?;
        lifecycle.persist(&store)?;
        assert_eq!(lifecycle.stage(), Stage::Persisted);
        Ok(())
    }
}
