//! HTTP routes against a live listener on an ephemeral port.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use beam_tuner::{
    advanced::dashboard::{HttpContext, HttpSurface, start_http_server},
    component_b::{
        actuator::{ActuationCommand, ActuationHandle, McsBounds, Origin, RadioParameterState},
        feedback::{SharedTuner, TunerState},
        policy::{Direction, Thresholds},
    },
    config::build_http_client,
    utils::metrics::EventRecorder,
};
use tokio::sync::mpsc::Receiver;

struct Harness {
    surface: HttpSurface,
    tuner: SharedTuner,
    running: Arc<AtomicBool>,
    rx: Receiver<ActuationCommand>,
    client: reqwest::Client,
    base: String,
}

impl Harness {
    async fn get(&self, path: &str) -> (u16, String) {
        let resp = self.client.get(format!("{}{}", self.base, path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.text().await.unwrap())
    }

    async fn post(&self, path: &str, body: &str) -> (u16, String) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.text().await.unwrap())
    }
}

fn start(initial_mcs: i32, ric_connected: Option<Arc<AtomicBool>>) -> Harness {
    let state = TunerState::new(
        5,
        Thresholds::new(7.0, 10.0),
        RadioParameterState::new(initial_mcs, McsBounds { min: 1, max: 28 }),
        1,
    );
    let tuner = SharedTuner::new(state, Arc::new(EventRecorder::new()));
    let (actuation, rx) = ActuationHandle::channel(8);
    let running = Arc::new(AtomicBool::new(true));

    let surface = start_http_server(
        "127.0.0.1:0",
        HttpContext {
            tuner: tuner.clone(),
            actuation,
            running: running.clone(),
            ric_connected,
        },
    )
    .unwrap();
    let base = format!("http://127.0.0.1:{}", surface.local_addr().port());

    Harness {
        surface,
        tuner,
        running,
        rx,
        client: build_http_client(Duration::from_secs(2)).unwrap(),
        base,
    }
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap()
}

#[tokio::test]
async fn health_and_readiness() {
    let h = start(16, None);

    let (status, body) = h.get("/healthz").await;
    assert_eq!(status, 200);
    assert_eq!(json(&body)["status"], "healthy");

    let (status, _) = h.get("/readiness").await;
    assert_eq!(status, 503);

    h.tuner.record(8.5).unwrap();
    let (status, body) = h.get("/readiness").await;
    assert_eq!(status, 200);
    assert!(json(&body)["ric_connected"].is_null());

    h.running.store(false, Ordering::Relaxed);
    let (status, body) = h.get("/healthz").await;
    assert_eq!(status, 503);
    assert_eq!(json(&body)["status"], "unhealthy");

    h.surface.shutdown();
}

#[tokio::test]
async fn readiness_follows_ric_reachability() {
    let ric = Arc::new(AtomicBool::new(false));
    let h = start(16, Some(ric.clone()));
    h.tuner.record(8.5).unwrap();

    let (status, body) = h.get("/readiness").await;
    assert_eq!(status, 503);
    assert_eq!(json(&body)["ric_connected"], false);

    ric.store(true, Ordering::Relaxed);
    let (status, body) = h.get("/readiness").await;
    assert_eq!(status, 200);
    let body = json(&body);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["ric_connected"], true);

    h.surface.shutdown();
}

#[tokio::test]
async fn metrics_and_status_follow_the_loop() {
    let h = start(16, None);

    let (status, body) = h.get("/metrics").await;
    assert_eq!(status, 200);
    assert!(body.contains("cqi_median NaN"));
    assert!(body.contains("current_mcs 16"));

    for v in [3.0, 4.0, 2.5] {
        h.tuner.record(v).unwrap();
    }
    h.tuner.evaluate_and_apply();

    let (_, body) = h.get("/metrics").await;
    assert!(body.contains("current_mcs 15"));
    assert!(body.contains("cqi_median 3"));
    assert!(body.contains("adjustment_count 1"));
    assert!(body.contains("last_adjustment_direction{direction=\"down\"} 1"));

    let (_, body) = h.get("/status").await;
    let status = json(&body);
    assert_eq!(status["current_mcs"], 15);
    assert_eq!(status["median_cqi"], 3.0);
    assert_eq!(status["phase"], "ADJUSTING_DOWN");
    assert_eq!(status["cqi_history"].as_array().unwrap().len(), 3);

    h.surface.shutdown();
}

#[tokio::test]
async fn manual_override_routes() {
    let mut h = start(27, None);

    let (status, body) = h.post("/adjust?direction=up", "").await;
    assert_eq!(status, 200);
    assert_eq!(json(&body)["status"], "success");
    assert_eq!(h.tuner.radio_state().current_mcs(), 28);
    let cmd = h.rx.try_recv().unwrap();
    assert_eq!(cmd.mcs, 28);
    assert_eq!(cmd.origin, Origin::Manual);
    assert_eq!(cmd.direction, Direction::Up);

    // Already at max: success, unchanged
    let (status, body) = h.post("/adjust", r#"{"direction":"up"}"#).await;
    assert_eq!(status, 200);
    assert_eq!(json(&body)["current_mcs"], 28);
    assert!(h.rx.try_recv().is_err());

    let (status, body) = h.post("/adjust?direction=left", "").await;
    assert_eq!(status, 400);
    assert_eq!(json(&body)["status"], "failure");

    // Percent-encoded query value
    let (status, _) = h.post("/adjust?direction=d%6Fwn", "").await;
    assert_eq!(status, 200);
    assert_eq!(h.tuner.radio_state().current_mcs(), 27);
    assert_eq!(h.rx.try_recv().unwrap().direction, Direction::Down);

    let (status, _) = h.post("/adjust", "").await;
    assert_eq!(status, 400);
    assert_eq!(h.tuner.radio_state().current_mcs(), 27);

    h.surface.shutdown();
}

#[tokio::test]
async fn dashboard_and_unknown_routes() {
    let h = start(16, None);
    h.tuner.record(9.0).unwrap();

    let (status, body) = h.get("/dashboard.svg").await;
    assert_eq!(status, 200);
    assert!(body.contains("<svg"));

    let (status, _) = h.get("/nowhere").await;
    assert_eq!(status, 404);

    h.surface.shutdown();
}
