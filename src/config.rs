//! config.rs
//! Runtime configuration read from environment variables.
//!
//! Variable names follow the deployment manifests of the xApp (`CQI_THRESHOLD`,
//! `ADJUSTMENT_INTERVAL`, `RIC_HOST`, `GNB_HOST`, ...). Every value has a default;
//! anything present but unparsable is a `TunerError::Config`.

use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::component_a::window::{CQI_MAX, CQI_MIN};
use crate::component_b::actuator::McsBounds;
use crate::component_b::policy::Thresholds;
use crate::error::{TunerError, TunerResult};

const DEFAULT_CQI_LOW: f64 = 7.0;
const DEFAULT_BAND_WIDTH: f64 = 3.0;
const DEFAULT_MIN_SAMPLES: usize = 3;
const DEFAULT_WINDOW_CAPACITY: usize = 10;
const DEFAULT_MCS_MIN: i32 = 1;
const DEFAULT_MCS_MAX: i32 = 28;
/// MCS index table limits (64QAM/256QAM tables stop at 28).
pub const MCS_INDEX_MIN: i32 = 0;
pub const MCS_INDEX_MAX: i32 = 28;
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MCS_INITIAL: i32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Simulated,
    Gnb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Local,
    Ric,
}

/// Bounded retry policy for mirroring actuation to the RIC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            attempt_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub thresholds: Thresholds,
    pub window_capacity: usize,
    pub mcs_bounds: McsBounds,
    pub mcs_initial: i32,
    pub mcs_step: i32,
    pub sample_interval: Duration,
    pub eval_interval: Duration,
    pub source: SourceKind,
    pub gnb_host: String,
    pub gnb_port: u16,
    pub sink: SinkKind,
    pub ric_host: String,
    pub ric_port: u16,
    pub retry: RetryPolicy,
    pub http_host: String,
    pub http_port: u16,
    pub event_log_path: Option<PathBuf>,
    pub summary_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thresholds: Thresholds {
                low: DEFAULT_CQI_LOW,
                high: DEFAULT_CQI_LOW + DEFAULT_BAND_WIDTH,
                min_samples: DEFAULT_MIN_SAMPLES,
            },
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            mcs_bounds: McsBounds {
                min: DEFAULT_MCS_MIN,
                max: DEFAULT_MCS_MAX,
            },
            mcs_initial: DEFAULT_MCS_INITIAL,
            mcs_step: 1,
            sample_interval: Duration::from_millis(1_000),
            eval_interval: Duration::from_secs(5),
            source: SourceKind::Simulated,
            gnb_host: "127.0.0.1".to_string(),
            gnb_port: 9091,
            sink: SinkKind::Local,
            ric_host: "127.0.0.1".to_string(),
            ric_port: 9091,
            retry: RetryPolicy::default(),
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            event_log_path: Some(PathBuf::from("data/logs/tuner_events.csv")),
            summary_path: Some(PathBuf::from("data/logs/session_summary.csv")),
        }
    }
}

impl Config {
    pub fn from_env() -> TunerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> TunerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        if let Some(low) = parse_opt::<f64>(&get, "CQI_THRESHOLD")? {
            cfg.thresholds.low = low;
            cfg.thresholds.high = low + DEFAULT_BAND_WIDTH;
        }
        if let Some(low) = parse_opt(&get, "CQI_THRESHOLD_LOW")? {
            cfg.thresholds.low = low;
        }
        if let Some(high) = parse_opt(&get, "CQI_THRESHOLD_HIGH")? {
            cfg.thresholds.high = high;
        }
        if let Some(n) = parse_opt(&get, "MIN_SAMPLES")? {
            cfg.thresholds.min_samples = n;
        }
        if let Some(n) = parse_opt(&get, "WINDOW_CAPACITY")? {
            cfg.window_capacity = n;
        }
        if let Some(v) = parse_opt(&get, "MCS_MIN")? {
            cfg.mcs_bounds.min = v;
        }
        if let Some(v) = parse_opt(&get, "MCS_MAX")? {
            cfg.mcs_bounds.max = v;
        }
        if let Some(v) = parse_opt(&get, "MCS_INITIAL")? {
            cfg.mcs_initial = v;
        }
        if let Some(v) = parse_opt(&get, "MCS_STEP")? {
            cfg.mcs_step = v;
        }
        if let Some(ms) = parse_opt::<u64>(&get, "SAMPLE_INTERVAL_MS")? {
            cfg.sample_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_opt::<u64>(&get, "ADJUSTMENT_INTERVAL")? {
            cfg.eval_interval = Duration::from_secs(secs);
        }
        if let Some(src) = get("SAMPLE_SOURCE") {
            cfg.source = match src.to_ascii_lowercase().as_str() {
                "simulated" => SourceKind::Simulated,
                "gnb" => SourceKind::Gnb,
                other => {
                    return Err(TunerError::config(
                        "SAMPLE_SOURCE",
                        format!("unknown source '{}'", other),
                    ));
                }
            };
        }
        if let Some(host) = get("GNB_HOST") {
            cfg.gnb_host = host;
        }
        if let Some(port) = parse_opt(&get, "GNB_PORT")? {
            cfg.gnb_port = port;
        }
        if let Some(sink) = get("CONTROL_SINK") {
            cfg.sink = match sink.to_ascii_lowercase().as_str() {
                "local" => SinkKind::Local,
                "ric" => SinkKind::Ric,
                other => {
                    return Err(TunerError::config(
                        "CONTROL_SINK",
                        format!("unknown sink '{}'", other),
                    ));
                }
            };
        }
        if let Some(host) = get("RIC_HOST") {
            cfg.ric_host = host;
        }
        if let Some(port) = parse_opt(&get, "RIC_PORT")? {
            cfg.ric_port = port;
        }
        if let Some(n) = parse_opt(&get, "ACTUATION_MAX_ATTEMPTS")? {
            cfg.retry.max_attempts = n;
        }
        if let Some(ms) = parse_opt::<u64>(&get, "ACTUATION_BACKOFF_MS")? {
            cfg.retry.base_backoff = Duration::from_millis(ms);
        }
        if let Some(host) = get("HTTP_HOST") {
            cfg.http_host = host;
        }
        if let Some(port) = parse_opt(&get, "HTTP_PORT")? {
            cfg.http_port = port;
        }
        if let Some(path) = get("EVENT_LOG_PATH") {
            cfg.event_log_path = non_empty_path(path);
        }
        if let Some(path) = get("SUMMARY_PATH") {
            cfg.summary_path = non_empty_path(path);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> TunerResult<()> {
        let t = &self.thresholds;
        if !t.low.is_finite() || !t.high.is_finite() {
            return Err(TunerError::config("CQI_THRESHOLD", "thresholds must be finite"));
        }
        if t.low >= t.high {
            return Err(TunerError::config(
                "CQI_THRESHOLD_HIGH",
                format!("high ({}) must exceed low ({})", t.high, t.low),
            ));
        }
        if t.low < CQI_MIN || t.high > CQI_MAX {
            return Err(TunerError::config(
                "CQI_THRESHOLD",
                format!("thresholds must lie within [{}, {}]", CQI_MIN, CQI_MAX),
            ));
        }
        if t.min_samples == 0 {
            return Err(TunerError::config("MIN_SAMPLES", "must be at least 1"));
        }
        if self.window_capacity == 0 {
            return Err(TunerError::config("WINDOW_CAPACITY", "must be at least 1"));
        }
        if t.min_samples > self.window_capacity {
            return Err(TunerError::config(
                "MIN_SAMPLES",
                "cannot exceed WINDOW_CAPACITY",
            ));
        }
        if self.mcs_bounds.min < MCS_INDEX_MIN || self.mcs_bounds.max > MCS_INDEX_MAX {
            return Err(TunerError::config(
                "MCS_MAX",
                format!("MCS bounds must lie within [{}, {}]", MCS_INDEX_MIN, MCS_INDEX_MAX),
            ));
        }
        if self.mcs_bounds.min > self.mcs_bounds.max {
            return Err(TunerError::config("MCS_MAX", "must not be below MCS_MIN"));
        }
        if !self.mcs_bounds.contains(self.mcs_initial) {
            return Err(TunerError::config(
                "MCS_INITIAL",
                format!(
                    "{} outside [{}, {}]",
                    self.mcs_initial, self.mcs_bounds.min, self.mcs_bounds.max
                ),
            ));
        }
        if self.mcs_step <= 0 {
            return Err(TunerError::config("MCS_STEP", "must be positive"));
        }
        if self.sample_interval.is_zero() {
            return Err(TunerError::config("SAMPLE_INTERVAL_MS", "must be positive"));
        }
        if self.eval_interval.is_zero() {
            return Err(TunerError::config("ADJUSTMENT_INTERVAL", "must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(TunerError::config("ACTUATION_MAX_ATTEMPTS", "must be at least 1"));
        }
        Ok(())
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Client shared by the gNB scraper and the RIC sink.
    pub fn http_client(&self) -> TunerResult<reqwest::Client> {
        build_http_client(DEFAULT_HTTP_TIMEOUT)
    }
}

/// Outbound HTTP client with a whole-request timeout. Per-request timeouts may tighten it.
pub fn build_http_client(timeout: Duration) -> TunerResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(2)))
        .user_agent(concat!("beam_tuner/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

fn parse_opt<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> TunerResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| TunerError::config(key, format!("'{}': {}", raw, e))),
    }
}

fn non_empty_path(raw: String) -> Option<PathBuf> {
    if raw.is_empty() {
        None
    } else {
        Some(PathBuf::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_xapp_settings() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.thresholds.low, 7.0);
        assert_eq!(cfg.thresholds.high, 10.0);
        assert_eq!(cfg.window_capacity, 10);
        assert_eq!(cfg.mcs_initial, 16);
        assert_eq!(cfg.mcs_bounds, McsBounds { min: 1, max: 28 });
        assert_eq!(cfg.source, SourceKind::Simulated);
        assert_eq!(cfg.sink, SinkKind::Local);
    }

    #[test]
    fn single_threshold_sets_band() {
        let cfg = Config::from_lookup(lookup(&[("CQI_THRESHOLD", "5.5")])).unwrap();
        assert_eq!(cfg.thresholds.low, 5.5);
        assert_eq!(cfg.thresholds.high, 8.5);
    }

    #[test]
    fn explicit_edges_override_single_threshold() {
        let cfg = Config::from_lookup(lookup(&[
            ("CQI_THRESHOLD", "5"),
            ("CQI_THRESHOLD_HIGH", "12"),
        ]))
        .unwrap();
        assert_eq!(cfg.thresholds.low, 5.0);
        assert_eq!(cfg.thresholds.high, 12.0);
    }

    #[test]
    fn inverted_band_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("CQI_THRESHOLD_LOW", "9"),
            ("CQI_THRESHOLD_HIGH", "9"),
        ]))
        .unwrap_err();
        assert!(matches!(err, TunerError::Config { ref key, .. } if key == "CQI_THRESHOLD_HIGH"));
    }

    #[test]
    fn garbage_value_names_key() {
        let err = Config::from_lookup(lookup(&[("WINDOW_CAPACITY", "ten")])).unwrap_err();
        assert!(matches!(err, TunerError::Config { ref key, .. } if key == "WINDOW_CAPACITY"));
    }

    #[test]
    fn initial_mcs_must_sit_inside_bounds() {
        let err = Config::from_lookup(lookup(&[("MCS_INITIAL", "30")])).unwrap_err();
        assert!(matches!(err, TunerError::Config { ref key, .. } if key == "MCS_INITIAL"));
    }

    #[test]
    fn mcs_bounds_limited_to_index_table() {
        let err = Config::from_lookup(lookup(&[("MCS_MAX", "2147483647")])).unwrap_err();
        assert!(matches!(err, TunerError::Config { ref key, .. } if key == "MCS_MAX"));
        let err = Config::from_lookup(lookup(&[("MCS_MIN", "-1")])).unwrap_err();
        assert!(matches!(err, TunerError::Config { .. }));
        let cfg = Config::from_lookup(lookup(&[("MCS_MIN", "0"), ("MCS_MAX", "28")])).unwrap();
        assert_eq!(cfg.mcs_bounds, McsBounds { min: 0, max: 28 });
    }

    #[test]
    fn empty_paths_disable_outputs() {
        let cfg = Config::from_lookup(lookup(&[
            ("EVENT_LOG_PATH", ""),
            ("SUMMARY_PATH", " "),
        ]))
        .unwrap();
        assert!(cfg.event_log_path.is_none());
        assert!(cfg.summary_path.is_none());
    }

    #[test]
    fn source_and_sink_selection() {
        let cfg = Config::from_lookup(lookup(&[
            ("SAMPLE_SOURCE", "GNB"),
            ("CONTROL_SINK", "ric"),
            ("RIC_PORT", "36421"),
            ("ADJUSTMENT_INTERVAL", "30"),
        ]))
        .unwrap();
        assert_eq!(cfg.source, SourceKind::Gnb);
        assert_eq!(cfg.sink, SinkKind::Ric);
        assert_eq!(cfg.ric_port, 36421);
        assert_eq!(cfg.eval_interval, Duration::from_secs(30));

        assert!(Config::from_lookup(lookup(&[("CONTROL_SINK", "e2ap")])).is_err());
    }
}
