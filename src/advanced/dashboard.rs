//! HTTP surface: health, readiness, metrics, status, manual override and a live SVG dashboard.
//!
//! One listener thread (tiny_http) serves every route. Handlers only take a snapshot or run a
//! single locked operation on the tuner, so a scrape never waits on I/O.
//!
//! | Route               | Purpose                                          |
//! |---------------------|--------------------------------------------------|
//! | `GET /healthz`      | liveness                                          |
//! | `GET /readiness`    | ready once the first CQI sample was accepted      |
//! | `GET /metrics`      | Prometheus text                                   |
//! | `GET /status`       | JSON status                                       |
//! | `POST /adjust`      | manual override, `?direction=up\|down` or JSON body |
//! | `GET /dashboard.svg`| CQI window + MCS history                          |

use std::{
    io::{self, Read},
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use chrono::{SecondsFormat, Utc};
use log::{debug, info, warn};
use plotters::{coord::Shift, prelude::*};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use crate::component_b::{
    actuator::{ActuationCommand, ActuationHandle, Origin},
    feedback::{SharedTuner, TunerSnapshot},
    policy::Direction,
};
use crate::error::{TunerError, TunerResult};
use crate::utils::export::{render_prometheus, render_status};

const INDEX_HTML: &str = r#"<!doctype html>
<html><head><title>beam tuner</title><meta http-equiv="refresh" content="2"></head>
<body><h3>beam tuner</h3><img src="/dashboard.svg" alt="CQI / MCS"><p><a href="/status">status</a> | <a href="/metrics">metrics</a></p></body></html>
"#;

/// Response produced by the router, independent of the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Reply {
    fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string(),
        }
    }

    fn text(status: u16, content_type: &'static str, body: String) -> Self {
        Self {
            status,
            content_type,
            body,
        }
    }
}

/// Everything the handlers need; cloned into the listener thread.
#[derive(Clone)]
pub struct HttpContext {
    pub tuner: SharedTuner,
    pub actuation: ActuationHandle,
    pub running: Arc<AtomicBool>,
    /// RIC reachability when the sink is `ric`; `None` for the local sink.
    pub ric_connected: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Deserialize)]
struct OverrideBody {
    direction: Option<String>,
}

fn split_url(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

/// Form-decoded query value (`%xx` and `+` handled).
fn query_param(query: &str, key: &str) -> Option<String> {
    if query.is_empty() {
        return None;
    }
    let parsed = Url::parse(&format!("http://localhost/?{}", query)).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Routes one request. `body` is only read for `POST /adjust`.
pub fn route(method: &Method, url: &str, body: &str, ctx: &HttpContext) -> Reply {
    let (path, query) = split_url(url);

    match (method, path) {
        (Method::Get, "/healthz") => health(ctx),
        (Method::Get, "/readiness") => readiness(ctx),
        (Method::Get, "/metrics") => Reply::text(
            200,
            "text/plain; version=0.0.4",
            render_prometheus(&ctx.tuner.snapshot()),
        ),
        (Method::Get, "/status") => Reply::json(200, render_status(&ctx.tuner.snapshot())),
        (Method::Post, "/adjust") => manual_adjust(query, body, ctx),
        (Method::Get, "/dashboard.svg") => match render_svg(&ctx.tuner.snapshot()) {
            Ok(svg) => Reply::text(200, "image/svg+xml", svg),
            Err(e) => {
                warn!("dashboard render failed: {}", e);
                Reply::text(503, "text/plain", "Dashboard not ready".to_string())
            }
        },
        (Method::Get, "/") => Reply::text(200, "text/html", INDEX_HTML.to_string()),
        (_, "/healthz" | "/readiness" | "/metrics" | "/status" | "/adjust" | "/dashboard.svg") => {
            Reply::json(405, json!({ "error": "method not allowed" }))
        }
        _ => Reply::json(404, json!({ "error": "not found" })),
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn health(ctx: &HttpContext) -> Reply {
    if ctx.running.load(Ordering::Relaxed) {
        Reply::json(200, json!({ "status": "healthy", "timestamp": timestamp() }))
    } else {
        Reply::json(503, json!({ "status": "unhealthy", "timestamp": timestamp() }))
    }
}

/// Ready once a sample was accepted and, with a RIC sink, the RIC answers its health check.
fn readiness(ctx: &HttpContext) -> Reply {
    let ric_connected = ctx
        .ric_connected
        .as_ref()
        .map(|flag| flag.load(Ordering::Relaxed));

    if !ctx.tuner.has_samples() {
        return Reply::json(
            503,
            json!({ "status": "not ready", "detail": "no CQI samples yet", "ric_connected": ric_connected }),
        );
    }
    if ric_connected == Some(false) {
        return Reply::json(
            503,
            json!({ "status": "not ready", "detail": "RIC unreachable", "ric_connected": false }),
        );
    }
    Reply::json(
        200,
        json!({ "status": "ready", "window_len": ctx.tuner.window_len(), "ric_connected": ric_connected }),
    )
}

/// Manual override: validated here, never reaches the actuator with a bad direction.
fn manual_adjust(query: &str, body: &str, ctx: &HttpContext) -> Reply {
    let raw = match query_param(query, "direction") {
        Some(d) => Some(d),
        None if !body.trim().is_empty() => match serde_json::from_str::<OverrideBody>(body) {
            Ok(b) => b.direction,
            Err(e) => {
                return Reply::json(
                    400,
                    json!({ "status": "failure", "direction": null, "error": format!("malformed body: {}", e) }),
                );
            }
        },
        None => None,
    };

    let Some(raw) = raw else {
        return Reply::json(
            400,
            json!({ "status": "failure", "direction": null, "error": "missing direction" }),
        );
    };

    let direction = match Direction::parse_override(&raw) {
        Ok(d) => d,
        Err(e) => {
            debug!("rejected override input '{}'", raw);
            return Reply::json(
                400,
                json!({ "status": "failure", "direction": raw, "error": e.to_string() }),
            );
        }
    };

    if ctx.actuation.is_closed() || !ctx.running.load(Ordering::Relaxed) {
        return Reply::json(
            503,
            json!({ "status": "failure", "direction": direction, "error": "actuation path shut down" }),
        );
    }

    let act = ctx.tuner.manual_override(direction);
    if act.changed() {
        ctx.actuation.submit(ActuationCommand::new(&act, Origin::Manual));
    }

    Reply::json(
        200,
        json!({
            "status": "success",
            "direction": direction,
            "previous_mcs": act.previous,
            "current_mcs": act.current,
            "saturated": act.saturated,
        }),
    )
}

fn render_err<E: std::fmt::Display>(e: E) -> TunerError {
    TunerError::Render(e.to_string())
}

/// Renders the CQI window (with threshold lines) above the MCS history.
pub fn render_svg(snap: &TunerSnapshot) -> TunerResult<String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (960, 620)).into_drawing_area();
        root.fill(&WHITE).map_err(render_err)?;
        let (top, bottom) = root.split_vertically(300);
        plot_cqi(&top, snap)?;
        plot_mcs(&bottom, snap)?;
        root.present().map_err(render_err)?;
    }
    Ok(svg)
}

fn plot_cqi(area: &DrawingArea<SVGBackend<'_>, Shift>, snap: &TunerSnapshot) -> TunerResult<()> {
    let values: Vec<f64> = snap.samples.iter().map(|s| s.value()).collect();
    let width = snap.window_capacity.max(2);
    let caption = match snap.cqi_median {
        Some(m) => format!("CQI window (median {:.1}, {:?})", m, snap.phase),
        None => "CQI window (empty)".to_string(),
    };

    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(20)
        .y_label_area_size(40)
        .build_cartesian_2d(0..width, 0.0..16.0)
        .map_err(render_err)?;
    chart.configure_mesh().disable_mesh().draw().map_err(render_err)?;

    chart
        .draw_series(LineSeries::new(values.iter().enumerate().map(|(i, v)| (i, *v)), &BLUE))
        .map_err(render_err)?;
    for (level, color) in [(snap.thresholds.low, &RED), (snap.thresholds.high, &GREEN)] {
        chart
            .draw_series(LineSeries::new((0..width).map(|i| (i, level)), color))
            .map_err(render_err)?;
    }
    Ok(())
}

fn plot_mcs(area: &DrawingArea<SVGBackend<'_>, Shift>, snap: &TunerSnapshot) -> TunerResult<()> {
    let width = snap.mcs_history.len().max(2);
    let caption = format!(
        "MCS {} (adjustments: {}, last {})",
        snap.current_mcs, snap.adjustment_count, snap.last_adjustment_direction
    );

    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(20)
        .y_label_area_size(40)
        .build_cartesian_2d(
            0..width,
            snap.mcs_bounds.min.saturating_sub(1)..snap.mcs_bounds.max.saturating_add(1),
        )
        .map_err(render_err)?;
    chart.configure_mesh().disable_mesh().draw().map_err(render_err)?;

    chart
        .draw_series(LineSeries::new(
            snap.mcs_history.iter().enumerate().map(|(i, v)| (i, *v)),
            &BLACK,
        ))
        .map_err(render_err)?;
    Ok(())
}

fn respond(request: Request, reply: Reply) {
    // Fixed-length bodies only; the SVG can pass the default chunking threshold
    let mut response = Response::from_string(reply.body)
        .with_status_code(StatusCode(reply.status))
        .with_chunked_threshold(usize::MAX);
    if let Ok(h) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
        response = response.with_header(h);
    }
    if let Err(e) = request.respond(response) {
        debug!("client went away before response: {}", e);
    }
}

fn serve_request(mut request: Request, ctx: &HttpContext) {
    let method = request.method().clone();
    let url = request.url().to_string();

    let mut body = String::new();
    if method == Method::Post {
        if let Err(e) = request.as_reader().take(64 * 1024).read_to_string(&mut body) {
            respond(
                request,
                Reply::json(400, json!({ "status": "failure", "error": format!("unreadable body: {}", e) })),
            );
            return;
        }
    }

    let reply = route(&method, &url, &body, ctx);
    debug!("{} {} -> {}", method, url, reply.status);
    respond(request, reply);
}

/// Running listener; `shutdown` unblocks and joins it.
pub struct HttpSurface {
    server: Arc<Server>,
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl HttpSurface {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(self) {
        self.server.unblock();
        if self.handle.join().is_err() {
            warn!("HTTP listener thread panicked");
        }
    }
}

/// Binds `addr` and serves requests on a dedicated thread until `shutdown`.
pub fn start_http_server(addr: &str, ctx: HttpContext) -> TunerResult<HttpSurface> {
    let server = Server::http(addr)
        .map_err(|e| TunerError::Io(io::Error::other(format!("bind {}: {}", addr, e))))?;
    let local = server.server_addr().to_ip().ok_or_else(|| {
        TunerError::Io(io::Error::other(format!("{} is not an IP listener", addr)))
    })?;
    let server = Arc::new(server);
    info!("HTTP surface listening on http://{}", local);

    let srv = server.clone();
    let handle = thread::Builder::new()
        .name("http_surface".into())
        .spawn(move || {
            for request in srv.incoming_requests() {
                serve_request(request, &ctx);
            }
            info!("HTTP surface exiting accept loop");
        })?;

    Ok(HttpSurface {
        server,
        addr: local,
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component_b::{
        actuator::{McsBounds, RadioParameterState},
        feedback::TunerState,
        policy::Thresholds,
    };
    use crate::utils::metrics::EventRecorder;

    fn ctx(initial_mcs: i32) -> (HttpContext, tokio::sync::mpsc::Receiver<ActuationCommand>) {
        let state = TunerState::new(
            5,
            Thresholds::new(7.0, 10.0),
            RadioParameterState::new(initial_mcs, McsBounds { min: 1, max: 28 }),
            1,
        );
        let (actuation, rx) = ActuationHandle::channel(8);
        (
            HttpContext {
                tuner: SharedTuner::new(state, Arc::new(EventRecorder::new())),
                actuation,
                running: Arc::new(AtomicBool::new(true)),
                ric_connected: None,
            },
            rx,
        )
    }

    fn body(reply: &Reply) -> serde_json::Value {
        serde_json::from_str(&reply.body).unwrap()
    }

    #[test]
    fn health_reports_shutdown() {
        let (ctx, _rx) = ctx(16);
        let r = route(&Method::Get, "/healthz", "", &ctx);
        assert_eq!(r.status, 200);
        assert_eq!(body(&r)["status"], "healthy");
        assert!(body(&r)["timestamp"].is_string());

        ctx.running.store(false, Ordering::Relaxed);
        let r = route(&Method::Get, "/healthz", "", &ctx);
        assert_eq!(r.status, 503);
        assert_eq!(body(&r)["status"], "unhealthy");
    }

    #[test]
    fn readiness_waits_for_first_sample() {
        let (ctx, _rx) = ctx(16);
        assert_eq!(route(&Method::Get, "/readiness", "", &ctx).status, 503);
        ctx.tuner.record(9.0).unwrap();
        assert_eq!(route(&Method::Get, "/readiness", "", &ctx).status, 200);
    }

    #[test]
    fn override_via_query_and_body() {
        let (ctx, mut rx) = ctx(16);
        let r = route(&Method::Post, "/adjust?direction=up", "", &ctx);
        assert_eq!(r.status, 200);
        assert_eq!(body(&r)["status"], "success");
        assert_eq!(body(&r)["direction"], "up");
        assert_eq!(ctx.tuner.radio_state().current_mcs(), 17);
        assert_eq!(rx.try_recv().unwrap().mcs, 17);

        let r = route(&Method::Post, "/adjust", r#"{"direction":"down"}"#, &ctx);
        assert_eq!(r.status, 200);
        assert_eq!(ctx.tuner.radio_state().current_mcs(), 16);
    }

    #[test]
    fn override_at_max_is_success_without_change() {
        let (ctx, mut rx) = ctx(28);
        let r = route(&Method::Post, "/adjust?direction=up", "", &ctx);
        assert_eq!(r.status, 200);
        assert_eq!(body(&r)["status"], "success");
        assert_eq!(body(&r)["saturated"], true);
        assert_eq!(ctx.tuner.radio_state().current_mcs(), 28);
        // Nothing changed, nothing to mirror
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn invalid_override_never_reaches_actuator() {
        let (ctx, _rx) = ctx(16);
        for (url, payload) in [
            ("/adjust?direction=sideways", ""),
            ("/adjust?direction=none", ""),
            ("/adjust", ""),
            ("/adjust", "{not json"),
            ("/adjust", r#"{"direction":42}"#),
        ] {
            let r = route(&Method::Post, url, payload, &ctx);
            assert_eq!(r.status, 400, "{} {}", url, payload);
            assert_eq!(body(&r)["status"], "failure");
        }
        let snap = ctx.tuner.snapshot();
        assert_eq!(snap.current_mcs, 16);
        assert!(snap.last_decision.is_none());
    }

    #[test]
    fn override_fails_once_actuation_closed() {
        let (ctx, rx) = ctx(16);
        drop(rx);
        let r = route(&Method::Post, "/adjust?direction=down", "", &ctx);
        assert_eq!(r.status, 503);
        assert_eq!(body(&r)["status"], "failure");
        assert_eq!(ctx.tuner.radio_state().current_mcs(), 16);
    }

    #[test]
    fn unknown_and_wrong_method() {
        let (ctx, _rx) = ctx(16);
        assert_eq!(route(&Method::Get, "/nope", "", &ctx).status, 404);
        assert_eq!(route(&Method::Get, "/adjust?direction=up", "", &ctx).status, 405);
        assert_eq!(route(&Method::Delete, "/metrics", "", &ctx).status, 405);
    }

    #[test]
    fn readiness_requires_reachable_ric() {
        let (mut ctx, _rx) = ctx(16);
        let flag = Arc::new(AtomicBool::new(false));
        ctx.ric_connected = Some(flag.clone());
        ctx.tuner.record(9.0).unwrap();

        let r = route(&Method::Get, "/readiness", "", &ctx);
        assert_eq!(r.status, 503);
        assert_eq!(body(&r)["ric_connected"], false);

        flag.store(true, Ordering::Relaxed);
        let r = route(&Method::Get, "/readiness", "", &ctx);
        assert_eq!(r.status, 200);
        assert_eq!(body(&r)["ric_connected"], true);
    }

    #[test]
    fn readiness_with_local_sink_reports_no_ric() {
        let (ctx, _rx) = ctx(16);
        ctx.tuner.record(9.0).unwrap();
        let r = route(&Method::Get, "/readiness", "", &ctx);
        assert_eq!(r.status, 200);
        assert!(body(&r)["ric_connected"].is_null());
    }

    #[test]
    fn override_direction_is_form_decoded() {
        let (ctx, _rx) = ctx(16);
        let r = route(&Method::Post, "/adjust?direction=%75p", "", &ctx);
        assert_eq!(r.status, 200);
        assert_eq!(ctx.tuner.radio_state().current_mcs(), 17);

        let r = route(&Method::Post, "/adjust?foo=1&direction=+DOWN+", "", &ctx);
        assert_eq!(r.status, 200);
        assert_eq!(body(&r)["direction"], "down");
        assert_eq!(ctx.tuner.radio_state().current_mcs(), 16);
    }

    #[test]
    fn dashboard_renders_full_index_table() {
        let state = TunerState::new(
            5,
            Thresholds::new(7.0, 10.0),
            RadioParameterState::new(0, McsBounds { min: 0, max: 28 }),
            1,
        );
        let tuner = SharedTuner::new(state, Arc::new(EventRecorder::new()));
        tuner.manual_override(Direction::Down);
        let svg = render_svg(&tuner.snapshot()).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn dashboard_renders_svg() {
        let (ctx, _rx) = ctx(16);
        for v in [9.0, 3.0, 4.0] {
            ctx.tuner.record(v).unwrap();
        }
        ctx.tuner.evaluate_and_apply();
        let r = route(&Method::Get, "/dashboard.svg", "", &ctx);
        assert_eq!(r.status, 200);
        assert_eq!(r.content_type, "image/svg+xml");
        assert!(r.body.contains("<svg"));
    }
}
