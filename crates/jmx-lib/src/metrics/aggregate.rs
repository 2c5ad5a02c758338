use crate::metrics::interval::IntervalResult;
use serde::{Deserialize, Serialize};

/// Summary scalars of one analysed recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JmxRow {
    /// Mean signed jitter in seconds; `None` when nothing matched.
    pub jitter: Option<f64>,
    pub missed: usize,
    pub extra: usize,
    /// `None` when the recording had no annotations.
    pub sensitivity: Option<f64>,
}

impl JmxRow {
    pub fn from_result(result: &IntervalResult) -> Self {
        Self {
            jitter: result.mean_jitter_seconds(),
            missed: result.summary.missed,
            extra: result.summary.extra,
            sensitivity: result.summary.sensitivity,
        }
    }
}

/// Column-wise means over every row appended so far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunningMeans {
    pub rows: usize,
    pub jitter: Option<f64>,
    pub missed: f64,
    pub extra: f64,
    pub sensitivity: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Column {
    sum: f64,
    count: usize,
}

impl Column {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// Append-only table of per-recording rows with running column means.
///
/// Undefined entries (no matches, no annotations) are left out of their own
/// column's mean only; every row counts towards the missed and extra means.
#[derive(Debug, Clone, Default)]
pub struct RunningAggregate {
    rows: Vec<JmxRow>,
    jitter: Column,
    missed: Column,
    extra: Column,
    sensitivity: Column,
}

impl RunningAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one recording and return the updated means.
    pub fn append(&mut self, row: JmxRow) -> RunningMeans {
        self.jitter.push(row.jitter);
        self.missed.push(Some(row.missed as f64));
        self.extra.push(Some(row.extra as f64));
        self.sensitivity.push(row.sensitivity);
        self.rows.push(row);
        self.current()
    }

    pub fn means(&self) -> Option<RunningMeans> {
        if self.rows.is_empty() {
            None
        } else {
            Some(self.current())
        }
    }

    pub fn rows(&self) -> &[JmxRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn current(&self) -> RunningMeans {
        RunningMeans {
            rows: self.rows.len(),
            jitter: self.jitter.mean(),
            missed: self.missed.mean().unwrap_or(0.0),
            extra: self.extra.mean().unwrap_or(0.0),
            sensitivity: self.sensitivity.mean(),
        }
    }
}
