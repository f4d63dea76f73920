//! Regula falsi (false position) root finding on the percentage bias.

use super::{Candidate, SearchStatus};
use crate::error::{CalibError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Regula falsi configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct FalsiConfig {
    pub min_k: f64,
    pub max_k: f64,
    /// Stop once |bias| drops below this value
    pub epsilon: f64,
    /// Iteration budget after the two bracket evaluations
    pub max_iter: usize,
}

impl Default for FalsiConfig {
    fn default() -> Self {
        Self {
            min_k: 1.0,
            max_k: 30.0,
            epsilon: 0.5,
            max_iter: 20,
        }
    }
}

impl FalsiConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_k.is_finite() && self.max_k.is_finite()) || self.min_k >= self.max_k {
            return Err(CalibError::InvalidSettings(
                "regula_falsi: min_k must be finite and below max_k".to_string(),
            ));
        }
        if !(self.epsilon > 0.0) {
            return Err(CalibError::InvalidSettings(
                "regula_falsi: epsilon must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// One evaluated point of the search.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct FalsiStep {
    pub candidate: Candidate,
    pub bias: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct FalsiOutcome {
    pub status: SearchStatus,
    /// Root estimate (last interpolated point)
    pub root: f64,
    pub bias: f64,
    pub iterations: usize,
    /// Bracket after the last update
    pub bracket: (f64, f64),
    pub history: Vec<FalsiStep>,
}

pub struct RegulaFalsi {
    config: FalsiConfig,
}

impl RegulaFalsi {
    pub fn new(config: FalsiConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FalsiConfig {
        &self.config
    }

    /// Searches for a root of `bias` inside the configured bracket.
    ///
    /// The endpoints are evaluated as round 0 (indices 0 and 1) and must have
    /// opposite signs. Any evaluation error aborts the search. Reaching the
    /// iteration budget is not an error; the last estimate is returned with
    /// [`SearchStatus::Exhausted`].
    pub fn run<F>(&self, mut bias: F) -> Result<FalsiOutcome>
    where
        F: FnMut(&Candidate) -> Result<f64>,
    {
        let cfg = &self.config;
        let mut history = Vec::new();

        let mut probe = |round: usize, index: usize, k: f64, history: &mut Vec<FalsiStep>| {
            let candidate = Candidate { round, index, k };
            let b = bias(&candidate)?;
            info!(iteration = round, k, bias = b, "regula falsi probe");
            history.push(FalsiStep { candidate, bias: b });
            Ok::<f64, CalibError>(b)
        };

        let (mut a, mut b) = (cfg.min_k, cfg.max_k);
        let mut fa = probe(0, 0, a, &mut history)?;
        let mut fb = probe(0, 1, b, &mut history)?;

        for (k, fk) in [(a, fa), (b, fb)] {
            if fk.abs() < cfg.epsilon {
                return Ok(FalsiOutcome {
                    status: SearchStatus::Converged,
                    root: k,
                    bias: fk,
                    iterations: 0,
                    bracket: (a, b),
                    history,
                });
            }
        }

        if fa.signum() == fb.signum() {
            return Err(CalibError::InvalidBracket {
                lower: a,
                upper: b,
                bias_lower: fa,
                bias_upper: fb,
            });
        }

        let (mut c, mut fc) = if fa.abs() < fb.abs() { (a, fa) } else { (b, fb) };
        for iteration in 1..=cfg.max_iter {
            c = (a * fb - b * fa) / (fb - fa);
            fc = probe(iteration, 0, c, &mut history)?;

            if fc.abs() < cfg.epsilon {
                return Ok(FalsiOutcome {
                    status: SearchStatus::Converged,
                    root: c,
                    bias: fc,
                    iterations: iteration,
                    bracket: (a, b),
                    history,
                });
            }

            if fc.signum() == fa.signum() {
                a = c;
                fa = fc;
            } else {
                b = c;
                fb = fc;
            }
        }

        Ok(FalsiOutcome {
            status: SearchStatus::Exhausted,
            root: c,
            bias: fc,
            iterations: cfg.max_iter,
            bracket: (a, b),
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn falsi(min_k: f64, max_k: f64, epsilon: f64, max_iter: usize) -> RegulaFalsi {
        RegulaFalsi::new(FalsiConfig {
            min_k,
            max_k,
            epsilon,
            max_iter,
        })
        .unwrap()
    }

    #[test]
    fn linear_bias_converges_in_one_step() {
        let out = falsi(0.0, 20.0, 0.001, 10).run(|c| Ok(c.k - 7.0)).unwrap();
        assert_eq!(out.status, SearchStatus::Converged);
        assert_relative_eq!(out.root, 7.0, epsilon = 1e-9);
        assert_eq!(out.iterations, 1);
        assert_eq!(out.history.len(), 3);
    }

    #[test]
    fn same_sign_bracket_is_rejected_before_iterating() {
        let mut calls = 0;
        let err = falsi(0.0, 1.0, 0.001, 10)
            .run(|c| {
                calls += 1;
                Ok(c.k - 7.0)
            })
            .unwrap_err();
        assert!(matches!(err, CalibError::InvalidBracket { .. }));
        assert_eq!(calls, 2);
    }

    #[test]
    fn nonlinear_root() {
        // k^3 - 2k - 5 has its real root near 2.0945515
        let out = falsi(2.0, 3.0, 1e-9, 100)
            .run(|c| Ok(c.k.powi(3) - 2.0 * c.k - 5.0))
            .unwrap();
        assert_eq!(out.status, SearchStatus::Converged);
        assert_relative_eq!(out.root, 2.0945514815, epsilon = 1e-6);
        let (a, b) = out.bracket;
        assert!(a <= out.root && out.root <= b);
    }

    #[test]
    fn budget_returns_estimate() {
        let out = falsi(2.0, 3.0, 1e-12, 3)
            .run(|c| Ok(c.k.powi(3) - 2.0 * c.k - 5.0))
            .unwrap();
        assert_eq!(out.status, SearchStatus::Exhausted);
        assert_eq!(out.iterations, 3);
        assert_eq!(out.history.len(), 5);
        assert!((out.root - 2.0945514815).abs() < 0.01);
    }

    #[test]
    fn endpoint_root_is_accepted() {
        let out = falsi(7.0, 20.0, 0.001, 10).run(|c| Ok(c.k - 7.0)).unwrap();
        assert_eq!(out.status, SearchStatus::Converged);
        assert_eq!(out.root, 7.0);
        assert_eq!(out.iterations, 0);
    }

    #[test]
    fn evaluation_error_aborts() {
        let err = falsi(0.0, 20.0, 0.001, 10)
            .run(|c| {
                if c.round == 1 {
                    Err(CalibError::MissingOutputFile("totalseries.csv".into()))
                } else {
                    Ok(c.k.powi(2) - 49.0)
                }
            })
            .unwrap_err();
        assert!(matches!(err, CalibError::MissingOutputFile(_)));
    }
}
