//! Coarse-to-fine grid refinement ("try and error") maximizing NSE.
//!
//! Every round evaluates evenly spaced candidates across the current bracket
//! and re-centers the bracket on the round winner with a half-width of one
//! grid step. The new bracket is not clipped to the initial bounds.

use super::{Candidate, Evaluation, SearchStatus};
use crate::error::{CalibError, Result};
use crate::objective::ObjectiveScore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Grid refinement configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct GridConfig {
    /// Lower bound of the first round
    pub min_k: f64,
    /// Upper bound of the first round
    pub max_k: f64,
    /// Candidates per round, bounds included
    pub steps: usize,
    /// Stop once the round winner reaches this NSE
    pub target_nse: f64,
    /// Maximum number of rounds
    pub max_rounds: usize,
    /// Concurrent simulator runs per round
    pub workers: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            min_k: 1.0,
            max_k: 30.0,
            steps: 10,
            target_nse: 0.8,
            max_rounds: 10,
            workers: 1,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(CalibError::InvalidSettings(format!("grid: {}", msg)));
        if !(self.min_k.is_finite() && self.max_k.is_finite()) || self.min_k >= self.max_k {
            return invalid("min_k must be finite and below max_k");
        }
        if self.steps < 2 {
            return invalid("steps must be >= 2");
        }
        if self.max_rounds == 0 {
            return invalid("max_rounds must be >= 1");
        }
        if self.workers == 0 {
            return invalid("workers must be >= 1");
        }
        Ok(())
    }
}

/// Result of a grid refinement run
#[derive(Clone, Debug, Serialize)]
pub struct GridOutcome {
    pub status: SearchStatus,
    /// Best value seen over all rounds
    pub best_k: f64,
    pub best_score: ObjectiveScore,
    pub rounds: usize,
    /// Bracket of the last evaluated round
    pub bracket: (f64, f64),
    pub history: Vec<Evaluation>,
}

/// Grid refinement driver
pub struct GridSearch {
    config: GridConfig,
    pool: Option<rayon::ThreadPool>,
}

impl GridSearch {
    pub fn new(config: GridConfig) -> Result<Self> {
        config.validate()?;
        let pool = if config.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.workers)
                .thread_name(|i| format!("grid-worker-{}", i))
                .build()
                .map_err(|e| CalibError::InvalidSettings(e.to_string()))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Evenly spaced candidates over `[lower, upper]`, both bounds included.
    pub fn candidates(&self, round: usize, lower: f64, upper: f64) -> Vec<Candidate> {
        let n = self.config.steps;
        let step = (upper - lower) / (n - 1) as f64;
        (0..n)
            .map(|index| Candidate {
                round,
                index,
                k: lower + step * index as f64,
            })
            .collect()
    }

    fn evaluate_round<F>(&self, candidates: &[Candidate], eval: &F) -> Vec<Result<ObjectiveScore>>
    where
        F: Fn(&Candidate) -> Result<ObjectiveScore> + Sync,
    {
        match &self.pool {
            Some(pool) => pool.install(|| candidates.par_iter().map(eval).collect()),
            None => {
                let mut results = Vec::with_capacity(candidates.len());
                for c in candidates {
                    let result = eval(c);
                    let fatal = matches!(&result, Err(e) if e.is_fatal());
                    results.push(result);
                    if fatal {
                        break;
                    }
                }
                results
            }
        }
    }

    /// Runs rounds until the target NSE is met or the round budget is spent.
    ///
    /// Candidates whose evaluation fails are dropped from their round;
    /// errors flagged by [`CalibError::is_fatal`] abort the search.
    pub fn run<F>(&self, eval: F) -> Result<GridOutcome>
    where
        F: Fn(&Candidate) -> Result<ObjectiveScore> + Sync,
    {
        let cfg = &self.config;
        let (mut lower, mut upper) = (cfg.min_k, cfg.max_k);
        let mut history = Vec::new();
        let mut best: Option<(f64, ObjectiveScore)> = None;
        let mut round = 0;

        loop {
            let step = (upper - lower) / (cfg.steps - 1) as f64;
            let candidates = self.candidates(round, lower, upper);
            let results = self.evaluate_round(&candidates, &eval);

            let mut winner: Option<(Candidate, ObjectiveScore)> = None;
            for (c, result) in candidates.iter().zip(results) {
                match result {
                    Ok(score) => {
                        info!(
                            round,
                            run = c.index,
                            of = cfg.steps,
                            k = c.k,
                            nse = score.nse,
                            pbias = score.pbias,
                            "grid candidate"
                        );
                        // strict comparison: first occurrence wins ties
                        if winner.map_or(true, |(_, w)| score.nse > w.nse) {
                            winner = Some((*c, score));
                        }
                        history.push(Evaluation::scored(*c, score));
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(round, k = c.k, error = %e, "grid candidate dropped");
                        history.push(Evaluation::failed(*c, &e));
                    }
                }
            }

            let Some((top, top_score)) = winner else {
                return Err(CalibError::NoViableCandidate {
                    round,
                    best: best.map(|(k, s)| (k, s.nse)),
                });
            };

            let (best_k, best_score) = match best {
                Some((k, s)) if s.nse >= top_score.nse => (k, s),
                _ => (top.k, top_score),
            };
            best = Some((best_k, best_score));
            round += 1;

            info!(round, k_opt = top.k, nse = top_score.nse, lower, upper, "grid round complete");

            let status = if top_score.nse >= cfg.target_nse {
                Some(SearchStatus::Converged)
            } else if round >= cfg.max_rounds {
                Some(SearchStatus::Exhausted)
            } else {
                None
            };

            if let Some(status) = status {
                return Ok(GridOutcome {
                    status,
                    best_k,
                    best_score,
                    rounds: round,
                    bracket: (lower, upper),
                    history,
                });
            }

            lower = top.k - step;
            upper = top.k + step;
        }
    }
}
