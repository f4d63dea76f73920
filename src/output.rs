//! Readers for simulator output tables and discharge observations.

use crate::error::{CalibError, Result};
use crate::timeseries::{TimeSeries, CHANNELS};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Positional contract of the simulator's output table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputLayout {
    /// File name inside the result directory
    #[serde(default = "default_file_name")]
    pub file_name: String,
    #[serde(default)]
    pub time_column: usize,
    #[serde(default = "default_discharge_column")]
    pub discharge_column: usize,
    /// Rows preceding the column header row
    #[serde(default = "default_skip_rows")]
    pub skip_rows: usize,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_file_name() -> String {
    "totalseries.csv".to_string()
}
fn default_discharge_column() -> usize { 10 }
fn default_skip_rows() -> usize { 1 }
fn default_delimiter() -> char { ',' }

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            file_name: default_file_name(),
            time_column: 0,
            discharge_column: default_discharge_column(),
            skip_rows: default_skip_rows(),
            delimiter: default_delimiter(),
        }
    }
}

fn malformed(path: &Path, reason: impl Into<String>) -> CalibError {
    CalibError::MalformedOutput {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Rejects a time stamp that does not follow the previous one.
fn check_order(path: &Path, row: usize, time: &[f64], t: f64) -> Result<()> {
    match time.last() {
        Some(&prev) if t <= prev => Err(malformed(
            path,
            format!("row {}: time {} does not increase after {}", row, t, prev),
        )),
        _ => Ok(()),
    }
}

fn parse_number(path: &Path, row: usize, column: &str, text: &str) -> Result<f64> {
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| malformed(path, format!("row {}: {} '{}' is not numeric", row, column, text)))
}

/// Loads the channel discharge of one simulation run.
///
/// Only rows with an integral time value are kept; the simulator also writes
/// sub-step rows that do not line up with observations.
pub fn load_result(result_dir: &Path, layout: &OutputLayout) -> Result<TimeSeries> {
    let path = result_dir.join(&layout.file_name);
    if !path.is_file() {
        return Err(CalibError::MissingOutputFile(path));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(layout.delimiter as u8)
        .from_path(&path)
        .map_err(|e| malformed(&path, e.to_string()))?;

    let mut records = reader.records().skip(layout.skip_rows);
    let header = records
        .next()
        .ok_or_else(|| malformed(&path, "missing column header row"))?
        .map_err(|e| malformed(&path, e.to_string()))?;

    let needed = layout.time_column.max(layout.discharge_column) + 1;
    if header.len() < needed {
        return Err(malformed(
            &path,
            format!("header has {} columns, expected at least {}", header.len(), needed),
        ));
    }

    let mut time = Vec::new();
    let mut values = Vec::new();
    for (row, record) in records.enumerate() {
        let record = record.map_err(|e| malformed(&path, e.to_string()))?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let (t, q) = match (record.get(layout.time_column), record.get(layout.discharge_column)) {
            (Some(t), Some(q)) => (t, q),
            _ => return Err(malformed(&path, format!("row {}: only {} columns", row, record.len()))),
        };

        let t = parse_number(&path, row, "time", t)?;
        if t.fract() != 0.0 {
            continue;
        }
        check_order(&path, row, &time, t)?;
        time.push(t);
        values.push(parse_number(&path, row, "discharge", q)?);
    }

    if time.is_empty() {
        return Err(malformed(&path, "no rows with integral time"));
    }
    Ok(TimeSeries::new(CHANNELS, time, values))
}

/// Loads an observation table with `Time` and `Channels` columns.
pub fn load_observed(path: &Path, delimiter: char) -> Result<TimeSeries> {
    if !path.is_file() {
        return Err(CalibError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("observation file not found: {}", path.display()),
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .delimiter(delimiter as u8)
        .from_path(path)
        .map_err(|e| malformed(path, e.to_string()))?;

    let headers = reader.headers().map_err(|e| malformed(path, e.to_string()))?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| malformed(path, format!("missing '{}' column", name)))
    };
    let time_col = column("Time")?;
    let value_col = column(CHANNELS)?;

    let mut time = Vec::new();
    let mut values = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| malformed(path, e.to_string()))?;
        let t = parse_number(path, row, "Time", record.get(time_col).unwrap_or(""))?;
        check_order(path, row, &time, t)?;
        time.push(t);
        values.push(parse_number(path, row, CHANNELS, record.get(value_col).unwrap_or(""))?);
    }
    Ok(TimeSeries::new(CHANNELS, time, values))
}

/// Writes `series` as a two-column `Time,<name>` table.
pub fn write_series(series: &TimeSeries, path: &Path) -> Result<PathBuf> {
    let mut w = csv::Writer::from_path(path).map_err(|e| malformed(path, e.to_string()))?;
    let io_err = |e: csv::Error| malformed(path, e.to_string());
    w.write_record(["Time", series.name.as_str()]).map_err(io_err)?;
    for (t, v) in series.iter() {
        w.write_record([t.to_string(), v.to_string()]).map_err(io_err)?;
    }
    w.flush()?;
    Ok(path.to_path_buf())
}
