//! Calibration search strategies.
//!
//! Both strategies are driven by a caller-supplied evaluation closure, so
//! they can be exercised with analytic functions as well as full simulator
//! runs.

pub mod grid;
pub mod regula_falsi;

use crate::error::CalibError;
use crate::objective::ObjectiveScore;
use serde::Serialize;

pub use grid::{GridConfig, GridOutcome, GridSearch};
pub use regula_falsi::{FalsiConfig, FalsiOutcome, RegulaFalsi};

/// Terminal state of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStatus {
    /// Target reached
    Converged,
    /// Budget spent before the target was reached
    Exhausted,
}

/// One parameter value proposed by a search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candidate {
    /// Grid round or regula falsi iteration (0 = initial bracket)
    pub round: usize,
    pub index: usize,
    pub k: f64,
}

impl Candidate {
    /// Short unique label, used to name run directories.
    pub fn label(&self) -> String {
        format!("r{:02}_c{:02}", self.round, self.index)
    }
}

/// Outcome of one candidate evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub candidate: Candidate,
    pub score: Option<ObjectiveScore>,
    pub error: Option<String>,
}

impl Evaluation {
    pub fn scored(candidate: Candidate, score: ObjectiveScore) -> Self {
        Self {
            candidate,
            score: Some(score),
            error: None,
        }
    }

    pub fn failed(candidate: Candidate, err: &CalibError) -> Self {
        Self {
            candidate,
            score: None,
            error: Some(err.to_string()),
        }
    }
}
