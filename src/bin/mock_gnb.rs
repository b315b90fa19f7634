//! Stand-in gNB for running the tuner end to end without a radio.
//!
//! - `GET /metrics`: Prometheus text with gNB counters plus `cqi_value` and `mcs_setting`.
//!   CQI takes one random-walk step per scrape.
//! - `GET /health`: liveness.
//! - `POST /v1/controls`: RIC control request; the requested MCS is adopted.
//!
//! Run with `SAMPLE_SOURCE=gnb CONTROL_SINK=ric RIC_PORT=9091` on the tuner side.

use std::{fmt::Write as _, io::Read};

use log::{error, info, warn};
use parking_lot::Mutex;
use rand::random_range;
use serde_json::{Value, json};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

const DEFAULT_PORT: u16 = 9091;

struct Radio {
    cqi: f64,
    mcs: i32,
    tx_bytes: u64,
    scrapes: u64,
    controls: u64,
}

impl Radio {
    fn step(&mut self) {
        self.cqi = (self.cqi + random_range(-1.5..=1.5)).clamp(1.0, 15.0);
        self.cqi = (self.cqi * 10.0).round() / 10.0;
        self.tx_bytes += random_range(50_000..250_000);
        self.scrapes += 1;
    }

    /// BLER grows as MCS outruns what the channel supports (roughly 2 MCS per CQI step).
    fn bler(&self) -> f64 {
        let supported = self.cqi * 28.0 / 15.0;
        ((self.mcs as f64 - supported) * 4.0).clamp(0.5, 60.0)
    }

    fn exposition(&self) -> String {
        let mut out = String::new();
        let throughput = self.mcs as f64 * 3.5e6 * (1.0 - self.bler() / 100.0);
        let _ = writeln!(out, "# HELP gnb_connected_ues_total Connected UEs");
        let _ = writeln!(out, "# TYPE gnb_connected_ues_total gauge");
        let _ = writeln!(out, "gnb_connected_ues_total {}", 4);
        let _ = writeln!(out, "# TYPE gnb_tx_bytes_total counter");
        let _ = writeln!(out, "gnb_tx_bytes_total {}", self.tx_bytes);
        let _ = writeln!(out, "# TYPE gnb_scrapes_total counter");
        let _ = writeln!(out, "gnb_scrapes_total {}", self.scrapes);
        let _ = writeln!(out, "# TYPE gnb_control_requests_total counter");
        let _ = writeln!(out, "gnb_control_requests_total {}", self.controls);
        let _ = writeln!(out, "# TYPE throughput_bps gauge");
        let _ = writeln!(out, "throughput_bps {:.0}", throughput);
        let _ = writeln!(out, "# TYPE bler_percentage gauge");
        let _ = writeln!(out, "bler_percentage {:.2}", self.bler());
        let _ = writeln!(out, "# HELP cqi_value Channel Quality Indicator");
        let _ = writeln!(out, "# TYPE cqi_value gauge");
        let _ = writeln!(out, "cqi_value {}", self.cqi);
        let _ = writeln!(out, "# HELP mcs_setting Current MCS");
        let _ = writeln!(out, "# TYPE mcs_setting gauge");
        let _ = writeln!(out, "mcs_setting {}", self.mcs);
        out
    }
}

fn requested_mcs(body: &str) -> Option<i64> {
    let msg: Value = serde_json::from_str(body).ok()?;
    msg.pointer("/ricControlMessage/parameters/mcs")
        .or_else(|| msg.get("mcs"))
        .and_then(Value::as_i64)
}

fn reply(request: Request, status: u16, content_type: &str, body: String) {
    let mut response = Response::from_string(body).with_status_code(StatusCode(status));
    if let Ok(h) = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()) {
        response = response.with_header(h);
    }
    if let Err(e) = request.respond(response) {
        warn!("response failed: {}", e);
    }
}

fn handle(mut request: Request, radio: &Mutex<Radio>) {
    let method = request.method().clone();
    let path = request.url().split('?').next().unwrap_or("").to_string();

    match (method, path.as_str()) {
        (Method::Get, "/metrics") => {
            let text = {
                let mut r = radio.lock();
                r.step();
                r.exposition()
            };
            reply(request, 200, "text/plain; version=0.0.4", text);
        }
        (Method::Get, "/health") => {
            reply(request, 200, "application/json", json!({ "status": "healthy" }).to_string());
        }
        (Method::Post, "/v1/controls") => {
            let mut body = String::new();
            if request.as_reader().read_to_string(&mut body).is_err() {
                reply(request, 400, "application/json", json!({ "status": "failure" }).to_string());
                return;
            }
            match requested_mcs(&body) {
                Some(mcs) if (0..=28).contains(&mcs) => {
                    let mut r = radio.lock();
                    info!("control request: MCS {} -> {}", r.mcs, mcs);
                    r.mcs = mcs as i32;
                    r.controls += 1;
                    drop(r);
                    reply(
                        request,
                        200,
                        "application/json",
                        json!({ "status": "success", "mcs": mcs }).to_string(),
                    );
                }
                _ => reply(
                    request,
                    400,
                    "application/json",
                    json!({ "status": "failure", "error": "missing or out-of-range mcs" }).to_string(),
                ),
            }
        }
        _ => reply(request, 404, "application/json", json!({ "error": "not found" }).to_string()),
    }
}

/// `MOCK_GNB_PORT` if set and valid, otherwise the default port.
fn listen_port(raw: Option<&str>) -> u16 {
    match raw {
        None => DEFAULT_PORT,
        Some(raw) => match raw.trim().parse::<u16>() {
            Ok(port) => port,
            Err(e) => {
                warn!("invalid MOCK_GNB_PORT '{}' ({}), using {}", raw, e, DEFAULT_PORT);
                DEFAULT_PORT
            }
        },
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let port = listen_port(std::env::var("MOCK_GNB_PORT").ok().as_deref());

    let server = match Server::http(("0.0.0.0", port)) {
        Ok(s) => s,
        Err(e) => {
            error!("mock gNB failed to bind port {}: {}", port, e);
            std::process::exit(1);
        }
    };
    info!("mock gNB listening on :{}", port);

    let radio = Mutex::new(Radio {
        cqi: 9.0,
        mcs: 16,
        tx_bytes: 0,
        scrapes: 0,
        controls: 0,
    });

    for request in server.incoming_requests() {
        handle(request, &radio);
    }
}
