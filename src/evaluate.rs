//! One calibration candidate end to end: configure, run, extract, score.

use crate::config::{Root, Scoring};
use crate::error::{CalibError, Result};
use crate::objective::{self, ObjectiveScore};
use crate::output::{self, OutputLayout};
use crate::runfile::RunFile;
use crate::runner::{ModelRunner, RunnerOptions};
use crate::timeseries::{self, TimeSeries};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Name of the filtered discharge table written into kept result directories.
pub const FILTERED_FILE: &str = "filtered_data.csv";

/// Shared, read-only state for scoring candidates.
///
/// Every call to [`Evaluator::evaluate`] works on its own runfile copy and
/// result directory, so one evaluator can serve a whole worker pool.
#[derive(Debug, Clone)]
pub struct Evaluator {
    executable: PathBuf,
    template_path: PathBuf,
    template: RunFile,
    observed: TimeSeries,
    layout: OutputLayout,
    process: RunnerOptions,
    scoring: Scoring,
    keep_results: bool,
    prefix: String,
}

fn required<'a>(value: &'a Option<PathBuf>, what: &str) -> Result<&'a Path> {
    value
        .as_deref()
        .ok_or_else(|| CalibError::InvalidSettings(format!("{} is required", what)))
}

impl Evaluator {
    pub fn from_config(cfg: &Root) -> Result<Self> {
        let executable = required(&cfg.simulator.executable, "simulator.executable")?;
        let template_path = required(&cfg.simulator.runfile, "simulator.runfile")?;
        let observed_path = required(&cfg.observation.path, "observation.path")?;

        let mut template = RunFile::load(template_path, cfg.runfile.format)?;
        for (alias, key) in &cfg.runfile.aliases {
            template.add_alias(alias, key);
        }
        // fail early instead of once per candidate
        template.ksat()?;
        template.result_dir()?;

        let observed = output::load_observed(observed_path, cfg.observation.delimiter)?;
        let observed = if cfg.scoring.observed_incremental {
            observed.incremental()
        } else {
            observed
        };

        Ok(Self {
            executable: executable.to_path_buf(),
            template_path: template_path.to_path_buf(),
            template,
            observed,
            layout: cfg.output.clone(),
            process: cfg.simulator.process.clone(),
            scoring: cfg.scoring.clone(),
            keep_results: cfg.simulator.keep_results,
            prefix: cfg.project.name.clone(),
        })
    }

    pub fn template(&self) -> &RunFile {
        &self.template
    }

    /// Observed series after the configured differencing.
    pub fn observed(&self) -> &TimeSeries {
        &self.observed
    }

    pub fn run_name(&self, label: &str) -> String {
        format!("{}_{}", self.prefix, label)
    }

    pub fn runner(&self, label: &str) -> Result<ModelRunner> {
        ModelRunner::from_template(
            &self.executable,
            &self.template_path,
            &self.template,
            &self.run_name(label),
            self.process.clone(),
        )
    }

    /// Runs the simulator with Ksat set to `k` and applies `measure` to the
    /// result directory. Run files are removed afterwards unless results are
    /// kept, whether or not the run succeeded.
    fn with_run<T, F>(&self, label: &str, k: f64, measure: F) -> Result<T>
    where
        F: FnOnce(&Path) -> Result<T>,
    {
        let mut runner = self.runner(label)?;
        runner.runfile_mut().set_ksat(k)?;

        let outcome = runner.run().and_then(|dir| measure(&dir));
        if !self.keep_results {
            if let Err(e) = runner.clean() {
                warn!(name = runner.name(), error = %e, "could not remove run files");
            }
        }
        outcome
    }

    /// Runs the simulator with Ksat set to `k` and scores the result.
    pub fn evaluate(&self, label: &str, k: f64) -> Result<ObjectiveScore> {
        let score = self.with_run(label, k, |dir| self.score_result(dir))?;
        info!(name = %self.run_name(label), k, nse = score.nse, pbias = score.pbias, "candidate scored");
        Ok(score)
    }

    /// Percentage bias of the run with Ksat set to `k`.
    ///
    /// Only the bias is computed, so a constant observed series is accepted.
    pub fn bias(&self, label: &str, k: f64) -> Result<f64> {
        let bias = self.with_run(label, k, |dir| {
            let (obs, sim) = self.aligned(dir)?;
            objective::pbias(&obs.values, &sim.values)
        })?;
        info!(name = %self.run_name(label), k, pbias = bias, "candidate scored");
        Ok(bias)
    }

    /// Loads a result directory and pairs it with the observations.
    ///
    /// The simulated series goes through the same differencing rule as the
    /// observations, is shifted by the time offset and both series are
    /// restricted to their common time stamps. No common time stamp at all
    /// is a settings error.
    pub fn aligned(&self, result_dir: &Path) -> Result<(TimeSeries, TimeSeries)> {
        let raw = output::load_result(result_dir, &self.layout)?;
        let simulated = if self.scoring.simulated_incremental {
            raw.incremental()
        } else {
            raw
        };
        let simulated = simulated.shift_time(self.scoring.time_offset);

        if self.keep_results {
            output::write_series(&simulated, &result_dir.join(FILTERED_FILE))?;
        }

        let (obs, sim) = timeseries::align(&self.observed, &simulated);
        if obs.is_empty() {
            return Err(CalibError::InvalidSettings(format!(
                "observed and simulated series share no time stamp, check scoring.time_offset ({})",
                self.scoring.time_offset
            )));
        }
        Ok((obs, sim))
    }

    /// Scores an existing result directory against the observations.
    pub fn score_result(&self, result_dir: &Path) -> Result<ObjectiveScore> {
        let (obs, sim) = self.aligned(result_dir)?;
        objective::score(&obs, &sim)
    }
}
