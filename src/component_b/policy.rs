//! policy.rs
//! Policy engine: median CQI vs. a closed dead-band decides the MCS direction.
//!
//! - median < low  -> down (favour robustness)
//! - median > high -> up (favour throughput)
//! - low <= median <= high -> none; a median sitting exactly on a threshold never moves MCS
//! - empty window, or fewer than `min_samples` -> none
//!
//! `evaluate` is pure: it reads the window and thresholds and returns a new decision.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::component_a::window::RollingWindow;
use crate::error::{TunerError, TunerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    None,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::None => "none",
        }
    }

    /// Manual overrides accept only `up` and `down` (case-insensitive).
    pub fn parse_override(raw: &str) -> TunerResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            _ => Err(TunerError::InvalidDirection(raw.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = TunerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Direction::None),
            _ => Direction::parse_override(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub low: f64,
    pub high: f64,
    /// Samples required before the engine proposes anything.
    pub min_samples: usize,
}

impl Thresholds {
    pub fn new(low: f64, high: f64) -> Self {
        Self {
            low,
            high,
            min_samples: 1,
        }
    }

    pub fn with_min_samples(mut self, n: usize) -> Self {
        self.min_samples = n.max(1);
        self
    }

    /// True when `median` lies inside the closed dead-band.
    #[inline]
    pub fn in_band(&self, median: f64) -> bool {
        median >= self.low && median <= self.high
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustmentDecision {
    pub direction: Direction,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// Median that drove the decision; absent when the window was empty.
    pub median: Option<f64>,
}

impl AdjustmentDecision {
    pub fn none(reason: impl Into<String>, median: Option<f64>, timestamp: DateTime<Utc>) -> Self {
        Self {
            direction: Direction::None,
            reason: reason.into(),
            timestamp,
            median,
        }
    }

    /// Decision for a manual override; the policy is not consulted.
    pub fn manual(direction: Direction) -> Self {
        Self {
            direction,
            reason: format!("manual override {}", direction),
            timestamp: Utc::now(),
            median: None,
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.direction == Direction::None
    }
}

pub fn evaluate(window: &RollingWindow, thresholds: &Thresholds) -> AdjustmentDecision {
    evaluate_at(window, thresholds, Utc::now())
}

/// Same as `evaluate` with a caller-supplied timestamp, so equal inputs give equal outputs.
pub fn evaluate_at(
    window: &RollingWindow,
    thresholds: &Thresholds,
    now: DateTime<Utc>,
) -> AdjustmentDecision {
    // Empty window is the normal startup condition, not a fault
    let median = match window.median() {
        Ok(m) => m,
        Err(_) => return AdjustmentDecision::none("window empty", None, now),
    };

    if window.len() < thresholds.min_samples {
        return AdjustmentDecision::none(
            format!("collecting samples {}/{}", window.len(), thresholds.min_samples),
            Some(median),
            now,
        );
    }

    if median < thresholds.low {
        AdjustmentDecision {
            direction: Direction::Down,
            reason: format!(
                "low CQI (median {:.1} < {:.1}) - reducing MCS for reliability",
                median, thresholds.low
            ),
            timestamp: now,
            median: Some(median),
        }
    } else if median > thresholds.high {
        AdjustmentDecision {
            direction: Direction::Up,
            reason: format!(
                "high CQI (median {:.1} > {:.1}) - increasing MCS for throughput",
                median, thresholds.high
            ),
            timestamp: now,
            median: Some(median),
        }
    } else {
        AdjustmentDecision::none(
            format!(
                "CQI median {:.1} within [{:.1}, {:.1}]",
                median, thresholds.low, thresholds.high
            ),
            Some(median),
            now,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(values: &[f64]) -> RollingWindow {
        let mut w = RollingWindow::new(values.len().max(1));
        for v in values {
            w.record_value(*v).unwrap();
        }
        w
    }

    #[test]
    fn empty_window_holds() {
        let d = evaluate(&RollingWindow::new(5), &Thresholds::new(7.0, 10.0));
        assert_eq!(d.direction, Direction::None);
        assert_eq!(d.median, None);
    }

    #[test]
    fn below_low_goes_down() {
        let d = evaluate(&window(&[3.0, 4.0, 5.0]), &Thresholds::new(7.0, 10.0));
        assert_eq!(d.direction, Direction::Down);
        assert_eq!(d.median, Some(4.0));
    }

    #[test]
    fn above_high_goes_up() {
        let d = evaluate(&window(&[12.0, 13.0, 11.0]), &Thresholds::new(7.0, 10.0));
        assert_eq!(d.direction, Direction::Up);
    }

    #[test]
    fn thresholds_themselves_are_dead_band() {
        let t = Thresholds::new(7.0, 10.0);
        assert!(evaluate(&window(&[7.0, 7.0, 7.0]), &t).is_none());
        assert!(evaluate(&window(&[10.0, 10.0, 10.0]), &t).is_none());
        assert!(evaluate(&window(&[6.0, 7.0, 8.0]), &t).is_none());
    }

    #[test]
    fn outlier_does_not_move_median() {
        let d = evaluate(&window(&[10.0, 10.0, 10.0, 10.0, 2.0]), &Thresholds::new(5.0, 12.0));
        assert_eq!(d.direction, Direction::None);
        assert_eq!(d.median, Some(10.0));
    }

    #[test]
    fn warm_up_holds_until_min_samples() {
        let t = Thresholds::new(7.0, 10.0).with_min_samples(3);
        let mut w = RollingWindow::new(10);
        w.record_value(2.0).unwrap();
        w.record_value(2.0).unwrap();
        assert!(evaluate(&w, &t).is_none());
        w.record_value(2.0).unwrap();
        assert_eq!(evaluate(&w, &t).direction, Direction::Down);
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let w = window(&[4.0, 9.0, 12.0, 3.0]);
        let t = Thresholds::new(7.0, 10.0);
        let now = Utc::now();
        assert_eq!(evaluate_at(&w, &t, now), evaluate_at(&w, &t, now));
    }

    #[test]
    fn override_parsing() {
        assert_eq!(Direction::parse_override(" UP ").unwrap(), Direction::Up);
        assert_eq!(Direction::parse_override("down").unwrap(), Direction::Down);
        assert!(matches!(
            Direction::parse_override("none"),
            Err(TunerError::InvalidDirection(_))
        ));
        assert!(Direction::parse_override("sideways").is_err());
        assert_eq!("none".parse::<Direction>().unwrap(), Direction::None);
    }
}
