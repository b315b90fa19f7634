//! # Beam Tuner Entry Point
//!
//! Closed-loop MCS tuning driven by link quality (CQI).
//!
//! ## Key Architecture
//! - **Sampler:** one CQI reading per `SAMPLE_INTERVAL_MS` (simulated radio or gNB scrape) into the rolling window.
//! - **Evaluator:** every `ADJUSTMENT_INTERVAL` seconds, median vs. dead-band -> up / down / none -> MCS step.
//! - **Dispatcher:** changed MCS values mirrored to the control sink (local log or RIC) with bounded retry.
//! - **RIC monitor:** with `CONTROL_SINK=ric`, `/health` is polled and `/readiness` requires a reachable RIC.
//! - **HTTP surface:** `/healthz`, `/readiness`, `/metrics`, `/status`, `POST /adjust`, `/dashboard.svg`.
//!
//! ## Concurrency
//! - One `parking_lot::Mutex` around all tuner state; no lock is held across an await.
//! - Atomic flag for graceful shutdown on Ctrl-C.
//!
//! ## Outputs
//! - `EVENT_LOG_PATH` (default `data/logs/tuner_events.csv`): every sample, decision and actuation.
//! - `SUMMARY_PATH` (default `data/logs/session_summary.csv`): one row per run.

use std::{
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::{error, info, warn};

use beam_tuner::{
    advanced::dashboard::{HttpContext, start_http_server},
    component_a::sensor::{CqiSource, GnbScraper, SimulatedRadio, run_sampler},
    component_b::{
        actuator::{ControlSink, RicClient, run_ric_health_monitor, spawn_dispatcher},
        feedback::{SharedTuner, run_evaluator},
    },
    config::{Config, SinkKind, SourceKind},
    utils::{export::export_session_summary, metrics::EventRecorder},
};

const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const RIC_HEALTH_PERIOD: Duration = Duration::from_secs(10);
const RIC_STARTUP_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

fn init_logging() {
    let filter = std::env::var("LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::new().parse_filters(&filter).init();
}

fn build_source(cfg: &Config, client: &reqwest::Client) -> CqiSource {
    match cfg.source {
        SourceKind::Simulated => {
            // Start in the middle of the dead-band
            let base = (cfg.thresholds.low + cfg.thresholds.high) / 2.0;
            CqiSource::Simulated(SimulatedRadio::new(base))
        }
        SourceKind::Gnb => CqiSource::Gnb(GnbScraper::new(client.clone(), &cfg.gnb_host, cfg.gnb_port)),
    }
}

fn build_sink(cfg: &Config, client: &reqwest::Client) -> ControlSink {
    match cfg.sink {
        SinkKind::Local => ControlSink::Local,
        SinkKind::Ric => ControlSink::Ric(RicClient::new(client.clone(), &cfg.ric_host, cfg.ric_port)),
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    init_logging();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("=== BEAM TUNER START ===");
    info!(
        "CQI band [{}, {}] min_samples={} window={} MCS {} in [{}, {}] step {}",
        cfg.thresholds.low,
        cfg.thresholds.high,
        cfg.thresholds.min_samples,
        cfg.window_capacity,
        cfg.mcs_initial,
        cfg.mcs_bounds.min,
        cfg.mcs_bounds.max,
        cfg.mcs_step
    );

    let running = Arc::new(AtomicBool::new(true));

    // Event recording: non-blocking queue -> background CSV export
    // Separate flag: the exporter outlives the loops so late dispatcher events are kept
    let exporting = Arc::new(AtomicBool::new(true));
    let recorder = Arc::new(EventRecorder::new());
    let exporter = match &cfg.event_log_path {
        Some(path) => match recorder.start_exporter(path, exporting.clone()) {
            Ok(handle) => {
                info!("Event log: {}", path.display());
                Some(handle)
            }
            Err(e) => {
                warn!("event log disabled, {}: {}", path.display(), e);
                None
            }
        },
        None => None,
    };

    let client = match cfg.http_client() {
        Ok(client) => client,
        Err(e) => {
            error!("HTTP client setup failed: {}", e);
            exporting.store(false, Ordering::Relaxed);
            return ExitCode::FAILURE;
        }
    };

    let tuner = SharedTuner::from_config(&cfg, recorder.clone());
    let sink = build_sink(&cfg, &client);

    // With a RIC sink, readiness tracks RIC reachability
    let (ric_connected, ric_monitor) = match &sink {
        ControlSink::Ric(ric) => {
            let up = ric.health(RIC_STARTUP_CHECK_TIMEOUT).await;
            if up {
                info!("RIC at {} reachable", ric.base_url());
            } else {
                warn!("RIC at {} unreachable at startup", ric.base_url());
            }
            let flag = Arc::new(AtomicBool::new(up));
            let monitor = tokio::spawn(run_ric_health_monitor(
                ric.clone(),
                flag.clone(),
                RIC_HEALTH_PERIOD,
                running.clone(),
            ));
            (Some(flag), Some(monitor))
        }
        ControlSink::Local => (None, None),
    };

    let (actuation, dispatcher) = spawn_dispatcher(sink, cfg.retry, recorder.clone());

    let sampler = tokio::spawn(run_sampler(
        build_source(&cfg, &client),
        tuner.clone(),
        cfg.sample_interval,
        running.clone(),
    ));
    let evaluator = tokio::spawn(run_evaluator(
        tuner.clone(),
        actuation.clone(),
        cfg.eval_interval,
        running.clone(),
    ));

    let surface = match start_http_server(
        &cfg.http_addr(),
        HttpContext {
            tuner: tuner.clone(),
            actuation: actuation.clone(),
            running: running.clone(),
            ric_connected,
        },
    ) {
        Ok(surface) => surface,
        Err(e) => {
            error!("HTTP surface failed to start: {}", e);
            running.store(false, Ordering::Relaxed);
            exporting.store(false, Ordering::Relaxed);
            sampler.abort();
            evaluator.abort();
            if let Some(monitor) = &ric_monitor {
                monitor.abort();
            }
            return ExitCode::FAILURE;
        }
    };
    info!("Dashboard: http://{}/", surface.local_addr());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("unable to listen for shutdown signal: {}", e);
    }

    info!("Shutting down...");
    running.store(false, Ordering::Relaxed);

    // Loops may be parked on a long tick; stop them now
    sampler.abort();
    evaluator.abort();
    if let Some(monitor) = ric_monitor {
        monitor.abort();
        let _ = monitor.await;
    }
    let _ = sampler.await;
    let _ = evaluator.await;

    if tokio::task::spawn_blocking(move || surface.shutdown()).await.is_err() {
        warn!("HTTP surface shutdown panicked");
    }

    // Last handle gone: the dispatcher drains what is queued, then exits
    drop(actuation);
    if tokio::time::timeout(DISPATCHER_DRAIN_TIMEOUT, dispatcher).await.is_err() {
        warn!("dispatcher did not drain within {:?}", DISPATCHER_DRAIN_TIMEOUT);
    }

    let snap = tuner.snapshot();
    info!(
        "Final MCS {} after {} adjustments ({} samples, {} rejected)",
        snap.current_mcs,
        snap.adjustment_count,
        snap.counters.total_samples,
        snap.counters.rejected_samples
    );
    if let Some(path) = &cfg.summary_path {
        if let Err(e) = export_session_summary(&snap, path) {
            error!("session summary export failed: {}", e);
        }
    }

    exporting.store(false, Ordering::Relaxed);
    if let Some(handle) = exporter {
        if handle.join().is_err() {
            error!("event exporter thread panicked");
        }
    }
    if recorder.dropped() > 0 {
        warn!("{} events dropped (queue full)", recorder.dropped());
    }

    info!("=== BEAM TUNER FINISHED ===");
    ExitCode::SUCCESS
}
