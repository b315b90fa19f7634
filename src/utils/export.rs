//! Exporters over a `TunerSnapshot`.
//!
//! - `render_prometheus`: text exposition for `/metrics` scrapes.
//! - `render_status`: JSON status document for `/status`.
//! - `export_session_summary`: one CSV row per process run, appended at shutdown.
//!
//! All renderers read a snapshot only; none of them touch live state.

use std::{
    fmt::Write as _,
    fs::{OpenOptions, create_dir_all},
    path::Path,
};

use csv::WriterBuilder;
use log::info;
use serde::Serialize;
use serde_json::json;

use crate::component_b::{feedback::TunerSnapshot, policy::Direction};
use crate::error::TunerResult;

fn gauge(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} gauge", name);
    let _ = writeln!(out, "{} {}", name, value);
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} counter", name);
    let _ = writeln!(out, "{} {}", name, value);
}

/// Prometheus text exposition of a snapshot. An empty window reports `cqi_median NaN`.
pub fn render_prometheus(snap: &TunerSnapshot) -> String {
    let mut out = String::with_capacity(1_024);

    gauge(&mut out, "current_mcs", "Current MCS (Modulation and Coding Scheme) setting", snap.current_mcs);

    let median = snap
        .cqi_median
        .map(|m| m.to_string())
        .unwrap_or_else(|| "NaN".to_string());
    gauge(&mut out, "cqi_median", "Median CQI over the rolling window", median);

    counter(
        &mut out,
        "adjustment_count",
        "MCS adjustments that changed the setting",
        snap.adjustment_count,
    );

    let _ = writeln!(out, "# HELP last_adjustment_direction Direction of the most recent MCS change");
    let _ = writeln!(out, "# TYPE last_adjustment_direction gauge");
    for d in [Direction::Up, Direction::Down, Direction::None] {
        let active = u8::from(d == snap.last_adjustment_direction);
        let _ = writeln!(out, "last_adjustment_direction{{direction=\"{}\"}} {}", d, active);
    }

    let _ = writeln!(out, "# HELP mcs_adjustments_total Total number of MCS adjustments made");
    let _ = writeln!(out, "# TYPE mcs_adjustments_total counter");
    let _ = writeln!(out, "mcs_adjustments_total{{direction=\"up\"}} {}", snap.counters.adjustments_up);
    let _ = writeln!(out, "mcs_adjustments_total{{direction=\"down\"}} {}", snap.counters.adjustments_down);

    counter(&mut out, "mcs_saturated_total", "Adjustments held at an MCS bound", snap.counters.saturated);
    counter(&mut out, "cqi_samples_total", "CQI samples accepted", snap.counters.total_samples);
    counter(
        &mut out,
        "cqi_samples_rejected_total",
        "CQI samples rejected at ingestion",
        snap.counters.rejected_samples,
    );
    gauge(&mut out, "cqi_window_len", "Samples currently in the rolling window", snap.samples.len());
    counter(
        &mut out,
        "policy_evaluations_total",
        "Policy engine evaluations",
        snap.counters.evaluations,
    );

    out
}

/// JSON status document: snapshot plus a few derived fields.
pub fn render_status(snap: &TunerSnapshot) -> serde_json::Value {
    json!({
        "current_mcs": snap.current_mcs,
        "mcs_bounds": snap.mcs_bounds,
        "cqi_history": snap.samples.iter().map(|s| s.value()).collect::<Vec<_>>(),
        "mcs_history": snap.mcs_history,
        "median_cqi": snap.cqi_median,
        "mean_cqi": snap.cqi_mean,
        "cqi_trend": snap.cqi_trend,
        "thresholds": {
            "cqi_low": snap.thresholds.low,
            "cqi_high": snap.thresholds.high,
            "min_samples": snap.thresholds.min_samples,
        },
        "window_capacity": snap.window_capacity,
        "phase": snap.phase,
        "last_decision": snap.last_decision,
        "last_adjustment_direction": snap.last_adjustment_direction,
        "adjustment_count": snap.adjustment_count,
        "counters": snap.counters,
        "uptime_secs": snap.uptime_secs(),
        "timestamp": snap.taken_at,
    })
}

#[derive(Debug, Serialize)]
struct SummaryRow {
    started_at: String,
    ended_at: String,
    uptime_secs: i64,
    samples: u64,
    rejected: u64,
    evaluations: u64,
    adjustments_up: u64,
    adjustments_down: u64,
    saturated: u64,
    final_mcs: i32,
    final_cqi_median: String,
}

/// Appends one row for this run to `path`, writing the header when the file is new.
pub fn export_session_summary(snap: &TunerSnapshot, path: &Path) -> TunerResult<()> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    let file_exists = path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let mut wtr = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    let row = SummaryRow {
        started_at: snap.started_at.to_rfc3339(),
        ended_at: snap.taken_at.to_rfc3339(),
        uptime_secs: snap.uptime_secs(),
        samples: snap.counters.total_samples,
        rejected: snap.counters.rejected_samples,
        evaluations: snap.counters.evaluations,
        adjustments_up: snap.counters.adjustments_up,
        adjustments_down: snap.counters.adjustments_down,
        saturated: snap.counters.saturated,
        final_mcs: snap.current_mcs,
        final_cqi_median: snap
            .cqi_median
            .map(|m| format!("{:.2}", m))
            .unwrap_or_default(),
    };

    wtr.serialize(row).map_err(std::io::Error::from)?;
    wtr.flush()?;
    info!("Session summary appended to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component_b::{
        actuator::{McsBounds, RadioParameterState},
        feedback::{SharedTuner, TunerState},
        policy::Thresholds,
    };
    use crate::utils::metrics::EventRecorder;
    use std::sync::Arc;

    fn tuner() -> SharedTuner {
        let state = TunerState::new(
            5,
            Thresholds::new(7.0, 10.0),
            RadioParameterState::new(16, McsBounds { min: 1, max: 28 }),
            1,
        );
        SharedTuner::new(state, Arc::new(EventRecorder::new()))
    }

    fn metric_line<'a>(text: &'a str, name: &str) -> Option<&'a str> {
        text.lines()
            .find(|l| !l.starts_with('#') && l.split_whitespace().next() == Some(name))
    }

    #[test]
    fn empty_window_exports_nan_median() {
        let text = render_prometheus(&tuner().snapshot());
        assert_eq!(metric_line(&text, "cqi_median"), Some("cqi_median NaN"));
        assert_eq!(metric_line(&text, "current_mcs"), Some("current_mcs 16"));
        assert_eq!(metric_line(&text, "adjustment_count"), Some("adjustment_count 0"));
        assert!(text.contains("last_adjustment_direction{direction=\"none\"} 1"));
    }

    #[test]
    fn exports_after_adjustment() {
        let t = tuner();
        t.record(12.0).unwrap();
        t.record(13.0).unwrap();
        t.evaluate_and_apply();
        t.record(f64::NAN).ok();

        let text = render_prometheus(&t.snapshot());
        assert_eq!(metric_line(&text, "current_mcs"), Some("current_mcs 17"));
        assert_eq!(metric_line(&text, "cqi_median"), Some("cqi_median 12.5"));
        assert_eq!(metric_line(&text, "adjustment_count"), Some("adjustment_count 1"));
        assert!(text.contains("last_adjustment_direction{direction=\"up\"} 1"));
        assert!(text.contains("last_adjustment_direction{direction=\"down\"} 0"));
        assert!(text.contains("mcs_adjustments_total{direction=\"up\"} 1"));
        assert_eq!(
            metric_line(&text, "cqi_samples_rejected_total"),
            Some("cqi_samples_rejected_total 1")
        );
    }

    #[test]
    fn status_carries_thresholds_and_phase() {
        let t = tuner();
        t.record(3.0).unwrap();
        t.evaluate_and_apply();
        let status = render_status(&t.snapshot());
        assert_eq!(status["phase"], "ADJUSTING_DOWN");
        assert_eq!(status["thresholds"]["cqi_low"], 7.0);
        assert_eq!(status["current_mcs"], 15);
        assert_eq!(status["last_decision"]["direction"], "down");
        assert_eq!(status["cqi_history"][0], 3.0);
    }

    #[test]
    fn summary_appends_with_single_header() {
        let dir = std::env::temp_dir().join(format!("beam_tuner_summary_{}", std::process::id()));
        let path = dir.join("summary.csv");
        let _ = std::fs::remove_file(&path);

        let snap = tuner().snapshot();
        export_session_summary(&snap, &path).unwrap();
        export_session_summary(&snap, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("started_at,ended_at"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
