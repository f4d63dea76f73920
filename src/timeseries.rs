use serde::Serialize;

/// Canonical name of the channel discharge series.
pub const CHANNELS: &str = "Channels";

/// Tolerance used when matching time stamps of two series.
const TIME_EPS: f64 = 1e-9;

/// Ordered `(time, value)` pairs; time is strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    pub name: String,
    pub time: Vec<f64>,
    pub values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(name: &str, time: Vec<f64>, values: Vec<f64>) -> Self {
        debug_assert_eq!(time.len(), values.len());
        Self {
            name: name.to_string(),
            time,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.time.iter().copied().zip(self.values.iter().copied())
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return f64::NAN;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Converts a cumulative series into per-step increments.
    ///
    /// The first element has no predecessor and is kept as-is.
    pub fn incremental(&self) -> TimeSeries {
        let values = self
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| if i == 0 { *v } else { v - self.values[i - 1] })
            .collect();
        TimeSeries {
            name: self.name.clone(),
            time: self.time.clone(),
            values,
        }
    }

    /// Subtracts `offset` from every time stamp.
    pub fn shift_time(&self, offset: f64) -> TimeSeries {
        TimeSeries {
            name: self.name.clone(),
            time: self.time.iter().map(|t| t - offset).collect(),
            values: self.values.clone(),
        }
    }
}

/// Restricts both series to the time stamps they have in common.
///
/// Both inputs must be sorted by time. The returned pair is index-aligned.
pub fn align(observed: &TimeSeries, simulated: &TimeSeries) -> (TimeSeries, TimeSeries) {
    let mut obs = TimeSeries::new(&observed.name, Vec::new(), Vec::new());
    let mut sim = TimeSeries::new(&simulated.name, Vec::new(), Vec::new());

    let (mut i, mut j) = (0, 0);
    while i < observed.len() && j < simulated.len() {
        let (to, ts) = (observed.time[i], simulated.time[j]);
        if (to - ts).abs() <= TIME_EPS {
            obs.time.push(to);
            obs.values.push(observed.values[i]);
            sim.time.push(to);
            sim.values.push(simulated.values[j]);
            i += 1;
            j += 1;
        } else if to < ts {
            i += 1;
        } else {
            j += 1;
        }
    }
    (obs, sim)
}
