use std::path::PathBuf;

/// Crate-wide result alias for calibration operations.
pub type Result<T> = std::result::Result<T, CalibError>;

/// Errors raised while configuring, running or scoring a calibration candidate.
#[derive(Debug, thiserror::Error)]
pub enum CalibError {
    // ---- Runfile ----
    #[error("'{0}' not in runfile")]
    KeyNotFound(String),

    #[error("'{key}' is duplicated in runfile ({count} assignments)")]
    AmbiguousKey { key: String, count: usize },

    #[error("'{key}' holds '{value}', expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    // ---- Simulator ----
    #[error("simulation '{name}' failed: {reason}")]
    SimulationFailed { name: String, reason: String },

    // ---- Output tables ----
    #[error("output file missing: {}", .0.display())]
    MissingOutputFile(PathBuf),

    #[error("malformed output in {}: {reason}", .path.display())]
    MalformedOutput { path: PathBuf, reason: String },

    #[error("series length mismatch: observed={observed}, simulated={simulated}")]
    LengthMismatch { observed: usize, simulated: usize },

    // ---- Objective / search ----
    #[error("degenerate objective: {0}")]
    DegenerateObjective(&'static str),

    #[error("invalid bracket [{lower}, {upper}]: bias {bias_lower:.4} and {bias_upper:.4} share a sign")]
    InvalidBracket {
        lower: f64,
        upper: f64,
        bias_lower: f64,
        bias_upper: f64,
    },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("round {round}: no candidate produced a score")]
    NoViableCandidate { round: usize, best: Option<(f64, f64)> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CalibError {
    /// Errors that must stop a whole search instead of discarding one candidate.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CalibError::DegenerateObjective(_)
                | CalibError::InvalidBracket { .. }
                | CalibError::InvalidSettings(_)
        )
    }
}
