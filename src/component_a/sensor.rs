//! sensor.rs
//! CQI sources feeding the metric store at a fixed sampling cadence.
//! - Simulated: mean-reverting random walk with occasional deep fades (no gNB required)
//! - Gnb: scrapes Prometheus-style text from a gNB `/metrics` endpoint (`cqi_value`, `mcs_setting`)
//! - Bad readings are rejected by the store and counted; the sampler never stops on one.

use std::{
    sync::{Arc, atomic::{AtomicBool, Ordering}},
    time::Duration,
};

use log::{debug, info, warn};
use rand::random_range;
use tokio::time::{self, MissedTickBehavior};

use crate::component_b::feedback::SharedTuner;
use crate::error::{TunerError, TunerResult};

const SCRAPE_TIMEOUT: Duration = Duration::from_secs(5);

/// Simulated radio link: CQI drifts around a base value and occasionally fades.
#[derive(Debug, Clone)]
pub struct SimulatedRadio {
    cqi: f64,
    base: f64,
    fade_probability: f64,
}

impl SimulatedRadio {
    pub fn new(base: f64) -> Self {
        Self {
            cqi: base,
            base,
            fade_probability: 0.05,
        }
    }

    pub fn with_fade_probability(mut self, p: f64) -> Self {
        self.fade_probability = p.clamp(0.0, 1.0);
        self
    }

    /// Next reading, always within the CQI range.
    pub fn next_reading(&mut self) -> f64 {
        let reversion = (self.base - self.cqi) * 0.2;
        let mut next = self.cqi + reversion + random_range(-1.0..1.0);

        if random_range(0.0..1.0) < self.fade_probability {
            next -= random_range(3.0..6.0);
        }

        self.cqi = next.clamp(1.0, 15.0);
        // CQI is reported with one decimal by the gNB exporter
        (self.cqi * 10.0).round() / 10.0
    }
}

/// Fields of interest parsed from a gNB metrics page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GnbMetrics {
    pub cqi: Option<f64>,
    pub mcs: Option<i32>,
    pub throughput_mbps: Option<f64>,
    pub bler: Option<f64>,
    pub connected_ues: Option<u32>,
}

/// Parses Prometheus text exposition, keeping the metrics the tuner reads.
/// Comment lines, blank lines and unparsable values are skipped.
pub fn parse_gnb_metrics(text: &str) -> GnbMetrics {
    let mut out = GnbMetrics::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(name), Some(raw)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(value) = raw.parse::<f64>() else {
            debug!("skipping unparsable metric line '{}'", line);
            continue;
        };

        match name {
            "cqi_value" => out.cqi = Some(value),
            "mcs_setting" => out.mcs = Some(value as i32),
            "throughput_bps" => out.throughput_mbps = Some(value / 1_000_000.0),
            "bler_percentage" => out.bler = Some(value),
            "connected_ues" | "gnb_connected_ues_total" => out.connected_ues = Some(value as u32),
            _ => {}
        }
    }

    out
}

/// Pulls CQI from a gNB metrics endpoint.
#[derive(Debug, Clone)]
pub struct GnbScraper {
    client: reqwest::Client,
    url: String,
}

impl GnbScraper {
    pub fn new(client: reqwest::Client, host: &str, port: u16) -> Self {
        Self {
            client,
            url: format!("http://{}:{}/metrics", host, port),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    pub async fn scrape(&self) -> TunerResult<GnbMetrics> {
        let resp = self
            .client
            .get(&self.url)
            .timeout(SCRAPE_TIMEOUT)
            .send()
            .await
            .map_err(|e| TunerError::Scrape(format!("{}: {}", self.url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TunerError::Scrape(format!("{} returned HTTP {}", self.url, status)));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| TunerError::Scrape(format!("{}: {}", self.url, e)))?;
        Ok(parse_gnb_metrics(&body))
    }
}

pub enum CqiSource {
    Simulated(SimulatedRadio),
    Gnb(GnbScraper),
}

impl CqiSource {
    pub fn name(&self) -> &'static str {
        match self {
            CqiSource::Simulated(_) => "simulated",
            CqiSource::Gnb(_) => "gnb",
        }
    }

    pub async fn next_reading(&mut self) -> TunerResult<f64> {
        match self {
            CqiSource::Simulated(radio) => Ok(radio.next_reading()),
            CqiSource::Gnb(scraper) => {
                let metrics = scraper.scrape().await?;
                if let Some(mcs) = metrics.mcs {
                    debug!("gNB reports mcs_setting={}", mcs);
                }
                metrics
                    .cqi
                    .ok_or_else(|| TunerError::Scrape(format!("{} has no cqi_value", scraper.endpoint())))
            }
        }
    }
}

/// Sampling path: one reading per tick into the shared tuner until `running` clears.
pub async fn run_sampler(
    mut source: CqiSource,
    tuner: SharedTuner,
    period: Duration,
    running: Arc<AtomicBool>,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("[Sampler] started source={} period={:?}", source.name(), period);

    while running.load(Ordering::Relaxed) {
        interval.tick().await;

        match source.next_reading().await {
            Ok(value) => {
                if let Err(e) = tuner.record(value) {
                    // Already counted and logged by the store
                    debug!("[Sampler] dropped reading: {}", e);
                }
            }
            Err(e) => warn!("[Sampler] no reading this tick: {}", e),
        }
    }

    info!("[Sampler] stopped");
}
