use serde::{Deserialize, Serialize};

/// A candidate topology together with the parameters the fit starts from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CircuitGuess {
    pub topology: String,
    pub initial_guess: Vec<f64>,
}

impl CircuitGuess {
    pub fn new(topology: impl Into<String>, initial_guess: Vec<f64>) -> Self {
        Self {
            topology: topology.into(),
            initial_guess,
        }
    }
}

/// Candidate circuits tried in turn when no circuit is suggested for a spectrum
///
/// The default library covers single and double RC arcs, with and without constant phase
/// elements and diffusion tails. A configuration file may replace it wholesale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CircuitLibrary(Vec<CircuitGuess>);

impl Default for CircuitLibrary {
    fn default() -> Self {
        Self(vec![
            CircuitGuess::new("R0-p(R1,C1)", vec![10.0, 100.0, 1e-6]),
            CircuitGuess::new("R0-p(R1,CPE1)", vec![10.0, 100.0, 1e-6, 0.9]),
            CircuitGuess::new("R0-p(R1,C1)-W1", vec![10.0, 100.0, 1e-6, 10.0]),
            CircuitGuess::new("R0-p(R1,CPE1)-W1", vec![10.0, 100.0, 1e-6, 0.9, 10.0]),
            CircuitGuess::new("R0-p(R1,C1)-p(R2,C2)", vec![10.0, 100.0, 1e-6, 100.0, 1e-4]),
            CircuitGuess::new(
                "R0-p(R1,CPE1)-p(R2,CPE2)",
                vec![10.0, 100.0, 1e-6, 0.9, 100.0, 1e-4, 0.9],
            ),
            CircuitGuess::new("R0-p(R1-W1,C1)", vec![10.0, 100.0, 10.0, 1e-6]),
            CircuitGuess::new(
                "R0-p(R1,CPE1)-Wo1",
                vec![10.0, 100.0, 1e-6, 0.9, 100.0, 1.0],
            ),
        ])
    }
}

impl CircuitLibrary {
    pub fn new(candidates: Vec<CircuitGuess>) -> Self {
        Self(candidates)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CircuitGuess> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
