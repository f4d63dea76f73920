//! Line-preserving key/value store for openLISEM runfiles.
//!
//! A runfile has no grammar beyond "one `Key = Value` assignment per line".
//! The text is parsed once into raw lines plus an index of the assignment
//! lines; mutations rewrite only the value part of a single line, so comments,
//! section headers, unknown keys and line endings survive untouched.

use crate::error::{CalibError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Short names accepted in place of the canonical runfile keys.
pub const DEFAULT_ALIASES: [(&str, &str); 4] = [
    ("ksat", "Ksat calibration"),
    ("result_dir", "Result Directory"),
    ("map_dir", "Map Directory"),
    ("n_cores", "Nr user Cores"),
];

/// Decimal separator the simulator expects in numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecimalSeparator {
    #[default]
    Point,
    Comma,
}

impl DecimalSeparator {
    pub fn as_char(self) -> char {
        match self {
            DecimalSeparator::Point => '.',
            DecimalSeparator::Comma => ',',
        }
    }
}

/// Number formatting applied when values are written to the runfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormatOptions {
    #[serde(default)]
    pub separator: DecimalSeparator,
    /// Fixed number of fractional digits; `None` writes the shortest text
    /// that reads back to the same `f64`.
    #[serde(default)]
    pub precision: Option<usize>,
}

/// A typed runfile value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

#[derive(Debug, Clone)]
struct Line {
    text: String,
    /// Line terminator exactly as read ("", "\n" or "\r\n").
    eol: &'static str,
}

#[derive(Debug, Clone)]
struct Assignment {
    line: usize,
    key: String,
    value_start: usize,
}

/// In-memory runfile with alias-aware typed access.
#[derive(Debug, Clone)]
pub struct RunFile {
    lines: Vec<Line>,
    assignments: Vec<Assignment>,
    aliases: HashMap<String, String>,
    format: FormatOptions,
}

impl RunFile {
    pub fn parse(text: &str, format: FormatOptions) -> Self {
        let mut lines = Vec::new();
        let mut assignments = Vec::new();

        for chunk in text.split_inclusive('\n') {
            let (body, eol) = if let Some(b) = chunk.strip_suffix("\r\n") {
                (b, "\r\n")
            } else if let Some(b) = chunk.strip_suffix('\n') {
                (b, "\n")
            } else {
                (chunk, "")
            };

            if let Some(eq) = body.find('=') {
                let key = body[..eq].trim();
                if !key.is_empty() {
                    let rest = &body[eq + 1..];
                    let pad = rest.len() - rest.trim_start().len();
                    assignments.push(Assignment {
                        line: lines.len(),
                        key: key.to_string(),
                        value_start: eq + 1 + pad,
                    });
                }
            }
            lines.push(Line {
                text: body.to_string(),
                eol,
            });
        }

        let aliases = DEFAULT_ALIASES
            .iter()
            .map(|(a, k)| (a.to_string(), k.to_string()))
            .collect();

        Self {
            lines,
            assignments,
            aliases,
            format,
        }
    }

    pub fn load(path: &Path, format: FormatOptions) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text, format))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.serialize())?;
        Ok(())
    }

    pub fn format(&self) -> FormatOptions {
        self.format
    }

    /// Register an extra short name for a canonical key.
    pub fn add_alias(&mut self, alias: &str, key: &str) {
        self.aliases.insert(alias.to_string(), key.to_string());
    }

    /// Map a user-facing name onto the key written in the runfile.
    ///
    /// Aliases win; otherwise an exact key is used as-is and underscores fall
    /// back to spaces (`canopy_openess` → `canopy openess`).
    pub fn resolve(&self, name: &str) -> String {
        if let Some(key) = self.aliases.get(name) {
            return key.clone();
        }
        if self.assignments.iter().any(|a| a.key == name) {
            return name.to_string();
        }
        name.replace('_', " ")
    }

    fn locate(&self, name: &str) -> Result<usize> {
        let key = self.resolve(name);
        let mut found = self
            .assignments
            .iter()
            .enumerate()
            .filter(|(_, a)| a.key == key)
            .map(|(i, _)| i);

        match (found.next(), found.count()) {
            (None, _) => Err(CalibError::KeyNotFound(key)),
            (Some(i), 0) => Ok(i),
            (Some(_), rest) => Err(CalibError::AmbiguousKey {
                key,
                count: rest + 1,
            }),
        }
    }

    fn raw_value(&self, a: &Assignment) -> &str {
        self.lines[a.line].text[a.value_start..].trim_end()
    }

    /// The value text of `name`, without any type coercion.
    pub fn get_raw(&self, name: &str) -> Result<&str> {
        let idx = self.locate(name)?;
        Ok(self.raw_value(&self.assignments[idx]))
    }

    /// Integer first, then separator-aware float, else the raw text.
    pub fn get(&self, name: &str) -> Result<ParamValue> {
        let raw = self.get_raw(name)?;
        Ok(parse_value(raw, self.format.separator))
    }

    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<()> {
        let idx = self.locate(name)?;
        let text = self.format_value(&value.into());
        if text.contains(|c: char| c == '\n' || c == '\r') {
            return Err(CalibError::InvalidValue {
                key: self.resolve(name),
                value: text,
                expected: "a single-line value",
            });
        }
        let a = &self.assignments[idx];
        let line = &mut self.lines[a.line];
        line.text.truncate(a.value_start);
        line.text.push_str(&text);
        Ok(())
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        let v = self.get(name)?;
        v.as_f64().ok_or_else(|| self.invalid(name, "a number"))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        let v = self.get(name)?;
        v.as_i64().ok_or_else(|| self.invalid(name, "an integer"))
    }

    pub fn get_str(&self, name: &str) -> Result<String> {
        Ok(self.get_raw(name)?.to_string())
    }

    fn invalid(&self, name: &str, expected: &'static str) -> CalibError {
        CalibError::InvalidValue {
            key: self.resolve(name),
            value: self.get_raw(name).unwrap_or_default().to_string(),
            expected,
        }
    }

    pub fn ksat(&self) -> Result<f64> {
        self.get_f64("ksat")
    }

    pub fn set_ksat(&mut self, k: f64) -> Result<()> {
        self.set("ksat", k)
    }

    pub fn result_dir(&self) -> Result<String> {
        self.get_str("result_dir")
    }

    pub fn set_result_dir(&mut self, dir: &str) -> Result<()> {
        self.set("result_dir", dir)
    }

    pub fn map_dir(&self) -> Result<String> {
        self.get_str("map_dir")
    }

    pub fn n_cores(&self) -> Result<i64> {
        self.get_i64("n_cores")
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.assignments.iter().map(|a| a.key.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> + '_ {
        self.assignments.iter().map(move |a| self.raw_value(a))
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.assignments
            .iter()
            .map(move |a| (a.key.as_str(), self.raw_value(a)))
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.lines.iter().map(|l| l.text.len() + 2).sum());
        for line in &self.lines {
            out.push_str(&line.text);
            out.push_str(line.eol);
        }
        out
    }

    fn format_value(&self, value: &ParamValue) -> String {
        match value {
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Text(s) => s.clone(),
            ParamValue::Float(f) => format_float(*f, self.format),
        }
    }
}

impl fmt::Display for RunFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

fn format_float(v: f64, format: FormatOptions) -> String {
    let text = match format.precision {
        Some(p) => format!("{:.*}", p, v),
        None => {
            let s = format!("{}", v);
            // keep a fractional part so the value reads back as a float
            if v.is_finite() && !s.contains('.') {
                format!("{}.0", s)
            } else {
                s
            }
        }
    };
    match format.separator {
        DecimalSeparator::Point => text,
        DecimalSeparator::Comma => text.replace('.', ","),
    }
}

fn parse_value(raw: &str, separator: DecimalSeparator) -> ParamValue {
    if let Ok(i) = raw.parse::<i64>() {
        return ParamValue::Int(i);
    }

    let sep = separator.as_char();
    let numeric = !raw.is_empty()
        && raw.chars().any(|c| c.is_ascii_digit())
        && raw
            .chars()
            .all(|c| c.is_ascii_digit() || c == sep || matches!(c, '+' | '-' | 'e' | 'E'));
    if numeric {
        if let Ok(f) = raw.replace(sep, ".").parse::<f64>() {
            return ParamValue::Float(f);
        }
    }
    ParamValue::Text(raw.to_string())
}
