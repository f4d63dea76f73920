//! Goodness-of-fit scores for simulated against observed discharge.

use crate::error::{CalibError, Result};
use crate::timeseries::TimeSeries;
use serde::Serialize;
use std::fmt;

/// NSE in (-inf, 1] (1 = perfect) and percentage bias (0 = unbiased).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ObjectiveScore {
    pub nse: f64,
    pub pbias: f64,
}

impl fmt::Display for ObjectiveScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NSE={:.4} pBias={:+.2}%", self.nse, self.pbias)
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Nash-Sutcliffe Efficiency of index-aligned slices.
pub fn nse(observed: &[f64], simulated: &[f64]) -> Result<f64> {
    check_lengths(observed, simulated)?;
    let mean_obs = mean(observed);
    let numerator: f64 = observed
        .iter()
        .zip(simulated)
        .map(|(o, s)| (s - o).powi(2))
        .sum();
    let denominator: f64 = observed.iter().map(|o| (o - mean_obs).powi(2)).sum();
    if denominator == 0.0 {
        return Err(CalibError::DegenerateObjective("observed series is constant"));
    }
    Ok(1.0 - numerator / denominator)
}

/// Percent bias of the simulated mean relative to the observed mean.
pub fn pbias(observed: &[f64], simulated: &[f64]) -> Result<f64> {
    check_lengths(observed, simulated)?;
    let mean_obs = mean(observed);
    if mean_obs == 0.0 {
        return Err(CalibError::DegenerateObjective("observed mean is zero"));
    }
    Ok((mean(simulated) - mean_obs) / mean_obs * 100.0)
}

fn check_lengths(observed: &[f64], simulated: &[f64]) -> Result<()> {
    if observed.len() != simulated.len() || observed.is_empty() {
        return Err(CalibError::LengthMismatch {
            observed: observed.len(),
            simulated: simulated.len(),
        });
    }
    Ok(())
}

/// Scores two index-aligned series.
///
/// NSE must be defined. pBias is NaN when the observed mean is zero, since
/// grid refinement ranks on NSE alone.
pub fn score(observed: &TimeSeries, simulated: &TimeSeries) -> Result<ObjectiveScore> {
    let nse = nse(&observed.values, &simulated.values)?;
    let pbias = match pbias(&observed.values, &simulated.values) {
        Ok(b) => b,
        Err(CalibError::DegenerateObjective(_)) => f64::NAN,
        Err(e) => return Err(e),
    };
    Ok(ObjectiveScore { nse, pbias })
}
