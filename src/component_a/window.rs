//! window.rs
//! Metric store: bounded FIFO of CQI samples and the statistics the policy reads.
//!
//! - `record` validates at ingestion; NaN, infinite and out-of-range readings never enter the window.
//! - Capacity is fixed at construction; the oldest sample is evicted on overflow.
//! - `median` governs decisions; `mean`/`trend` are reported only.

use std::collections::VecDeque;

use average::Mean;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{TunerError, TunerResult};

/// Lowest CQI index accepted at ingestion.
pub const CQI_MIN: f64 = 1.0;
/// Highest CQI index accepted at ingestion.
pub const CQI_MAX: f64 = 15.0;

/// One CQI observation. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualitySample {
    value: f64,
    timestamp: DateTime<Utc>,
}

impl QualitySample {
    /// Validates and timestamps a reading.
    pub fn new(value: f64) -> TunerResult<Self> {
        Self::at(value, Utc::now())
    }

    pub fn at(value: f64, timestamp: DateTime<Utc>) -> TunerResult<Self> {
        if value.is_nan() {
            return Err(TunerError::InvalidSample { value, reason: "not a number" });
        }
        if !value.is_finite() {
            return Err(TunerError::InvalidSample { value, reason: "not finite" });
        }
        if !(CQI_MIN..=CQI_MAX).contains(&value) {
            return Err(TunerError::InvalidSample { value, reason: "outside CQI range 1-15" });
        }
        Ok(Self { value, timestamp })
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    #[inline]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<QualitySample>,
    capacity: usize,
}

impl RollingWindow {
    /// A zero capacity is raised to one so the window can always hold the latest sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a sample, evicting the oldest when full. Returns the evicted sample, if any.
    pub fn record(&mut self, sample: QualitySample) -> Option<QualitySample> {
        let evicted = if self.samples.len() >= self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    /// Validates a raw reading and records it.
    pub fn record_value(&mut self, value: f64) -> TunerResult<()> {
        let sample = QualitySample::new(value)?;
        self.record(sample);
        Ok(())
    }

    /// Median of the present window; mean of the two middle values for even lengths.
    pub fn median(&self) -> TunerResult<f64> {
        if self.samples.is_empty() {
            return Err(TunerError::EmptyWindow);
        }
        let mut values: Vec<f64> = self.samples.iter().map(|s| s.value).collect();
        values.sort_by(|a, b| a.total_cmp(b));

        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            Ok((values[mid - 1] + values[mid]) / 2.0)
        } else {
            Ok(values[mid])
        }
    }

    /// Alias of `median`: the current smoothed quality.
    #[inline]
    pub fn current(&self) -> TunerResult<f64> {
        self.median()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mean: Mean = self.samples.iter().map(|s| s.value).collect();
        Some(mean.mean())
    }

    /// Least-squares slope of value over sample index; positive means improving.
    pub fn trend(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        let x_mean = (n - 1) as f64 / 2.0;
        let y_mean = self.mean().unwrap_or(0.0);

        let (num, den) = self
            .samples
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(num, den), (i, s)| {
                let dx = i as f64 - x_mean;
                (num + dx * (s.value - y_mean), den + dx * dx)
            });

        if den == 0.0 { 0.0 } else { num / den }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&QualitySample> {
        self.samples.back()
    }

    /// Oldest-first copy of the window contents.
    pub fn samples(&self) -> Vec<QualitySample> {
        self.samples.iter().copied().collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }
}
