use crate::output::OutputLayout;
use crate::runfile::FormatOptions;
use crate::runner::RunnerOptions;
use crate::search::{FalsiConfig, GridConfig};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Root {
    pub project: Project,
    pub simulator: Simulator,
    pub runfile: Runfile,
    pub output: OutputLayout,
    pub observation: Observation,
    pub scoring: Scoring,
    pub grid: GridConfig,
    pub regula_falsi: FalsiConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Project {
    /// Prefix of every run name and result directory
    pub name: String,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            name: "ksat".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Simulator {
    /// Path to the openLISEM executable
    pub executable: Option<PathBuf>,
    /// Template runfile
    pub runfile: Option<PathBuf>,
    #[serde(flatten)]
    pub process: RunnerOptions,
    /// Keep result directories and runfiles of scored candidates
    pub keep_results: bool,
}

impl Default for Simulator {
    fn default() -> Self {
        Self {
            executable: None,
            runfile: None,
            process: RunnerOptions::default(),
            keep_results: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Runfile {
    #[serde(flatten)]
    pub format: FormatOptions,
    /// Extra short names, e.g. `psi = "Psi calibration"`
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Observation {
    /// Table with `Time` and `Channels` columns
    pub path: Option<PathBuf>,
    pub delimiter: char,
}

impl Default for Observation {
    fn default() -> Self {
        Self {
            path: None,
            delimiter: ',',
        }
    }
}

/// How simulated and observed series are made comparable.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Scoring {
    /// Difference the cumulative simulator discharge
    pub simulated_incremental: bool,
    /// Difference the observed discharge
    pub observed_incremental: bool,
    /// Subtracted from simulated time before matching time stamps
    pub time_offset: f64,
}

impl Default for Scoring {
    fn default() -> Self {
        Self {
            simulated_incremental: true,
            observed_incremental: true,
            time_offset: 0.0,
        }
    }
}

impl Root {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.project.name.is_empty() || self.project.name.contains(|c: char| c == '/' || c == '\\') {
            bail!("project.name must be a non-empty name without path separators");
        }
        if let Some(t) = self.simulator.process.timeout_secs {
            if !(t > 0.0) {
                bail!("simulator.timeout_secs must be positive");
            }
        }
        if let Some(p) = self.runfile.format.precision {
            if !(1..=17).contains(&p) {
                bail!("runfile.precision must be in [1, 17]");
            }
        }
        if !self.output.delimiter.is_ascii() || !self.observation.delimiter.is_ascii() {
            bail!("table delimiters must be ASCII characters");
        }
        if self.output.time_column == self.output.discharge_column {
            bail!("output.time_column and output.discharge_column must differ");
        }
        if !self.scoring.time_offset.is_finite() {
            bail!("scoring.time_offset must be finite");
        }
        self.grid.validate()?;
        self.regula_falsi.validate()?;
        Ok(())
    }
}
