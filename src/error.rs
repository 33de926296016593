use thiserror::Error;

/// Errors raised by the analysis procedures and their collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or inconsistent input series or configuration values
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// Fewer samples than an algorithm needs
    #[error("insufficient data: {required} points required, {available} available")]
    InsufficientData { required: usize, available: usize },

    /// Every candidate equivalent circuit failed to fit
    #[error("no candidate circuit converged ({attempted} attempted)")]
    NoCircuitConverged { attempted: usize },

    /// A search produced no result where the procedure requires one
    #[error("convergence failure: {0}")]
    Convergence(String),

    /// Division by ~0, logarithm of a non-positive value and friends
    #[error("degenerate input: {0}")]
    DegenerateMath(String),

    /// The measurement file cannot be read by this crate
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid circuit topology `{topology}`: {reason}")]
    CircuitSyntax { topology: String, reason: String },

    /// A procedure stage was attempted out of order
    #[error("cannot {attempted} a procedure in stage {stage}")]
    Lifecycle {
        attempted: &'static str,
        stage: &'static str,
    },

    /// The nonlinear solver bailed out
    #[error("solver failure: {0}")]
    Solver(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InputValidation(msg.into())
    }

    pub(crate) fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateMath(msg.into())
    }
}
