use anyhow::Result;
use ksatcal::search::regula_falsi::FalsiStep;
use ksatcal::search::Evaluation;
use std::fs::{self, File};
use std::path::Path;

/// Per-candidate history table shared by all search commands.
pub struct CsvWriter {
    w: csv::Writer<File>,
}

impl CsvWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        Ok(Self {
            w: csv::Writer::from_path(path)?,
        })
    }

    pub fn write_header(&mut self) -> Result<()> {
        self.w
            .write_record(["method", "round", "index", "k", "nse", "pbias", "error"])?;
        Ok(())
    }

    pub fn write_evaluation(&mut self, method: &str, e: &Evaluation) -> Result<()> {
        let (nse, pbias) = match &e.score {
            Some(s) => (format!("{:.6}", s.nse), format!("{:.6}", s.pbias)),
            None => (String::new(), String::new()),
        };
        self.w.write_record([
            method.to_string(),
            e.candidate.round.to_string(),
            e.candidate.index.to_string(),
            format!("{:.6}", e.candidate.k),
            nse,
            pbias,
            e.error.clone().unwrap_or_default(),
        ])?;
        Ok(())
    }

    pub fn write_step(&mut self, step: &FalsiStep) -> Result<()> {
        self.w.write_record([
            "regula_falsi".to_string(),
            step.candidate.round.to_string(),
            step.candidate.index.to_string(),
            format!("{:.6}", step.candidate.k),
            String::new(),
            format!("{:.6}", step.bias),
            String::new(),
        ])?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.w.flush()?;
        Ok(())
    }
}
