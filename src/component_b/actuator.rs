//! actuator.rs
//! Applies MCS decisions to the simulated radio parameter and mirrors changes to a control sink.
//!
//! - `apply` is pure: up/down move by a fixed step, clamped to the bounds; none is a no-op.
//! - Hitting a bound is saturation, not an error: the state comes back unchanged.
//! - Mirroring runs on its own task behind a bounded queue with bounded retry, so a slow
//!   or absent RIC never stalls sampling or evaluation.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{self, MissedTickBehavior, sleep},
};

use crate::component_b::policy::{AdjustmentDecision, Direction};
use crate::config::RetryPolicy;
use crate::error::{TunerError, TunerResult};
use crate::utils::metrics::{Event, EventRecorder};

const ACTUATION_QUEUE_CAPACITY: usize = 32;
const RIC_HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct McsBounds {
    pub min: i32,
    pub max: i32,
}

impl McsBounds {
    #[inline]
    pub fn contains(&self, mcs: i32) -> bool {
        (self.min..=self.max).contains(&mcs)
    }

    #[inline]
    pub fn clamp(&self, mcs: i32) -> i32 {
        mcs.clamp(self.min, self.max)
    }
}

/// Current MCS and its bounds. Only the actuator produces new values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RadioParameterState {
    current_mcs: i32,
    bounds: McsBounds,
}

impl RadioParameterState {
    /// Out-of-bounds initial values are clamped.
    pub fn new(initial_mcs: i32, bounds: McsBounds) -> Self {
        Self {
            current_mcs: bounds.clamp(initial_mcs),
            bounds,
        }
    }

    #[inline]
    pub fn current_mcs(&self) -> i32 {
        self.current_mcs
    }

    #[inline]
    pub fn bounds(&self) -> McsBounds {
        self.bounds
    }

    #[inline]
    pub fn at_min(&self) -> bool {
        self.current_mcs <= self.bounds.min
    }

    #[inline]
    pub fn at_max(&self) -> bool {
        self.current_mcs >= self.bounds.max
    }
}

/// What a single `apply` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Actuation {
    pub direction: Direction,
    pub previous: i32,
    pub current: i32,
    /// A move was requested but the bound held the value in place.
    pub saturated: bool,
}

impl Actuation {
    #[inline]
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

pub fn apply(
    decision: &AdjustmentDecision,
    state: RadioParameterState,
    step: i32,
) -> RadioParameterState {
    let (next, _) = apply_direction(decision.direction, state, step);
    next
}

/// Moves MCS one step in `direction`, returning the new state and what happened.
pub fn apply_direction(
    direction: Direction,
    state: RadioParameterState,
    step: i32,
) -> (RadioParameterState, Actuation) {
    let step = step.max(0);
    let previous = state.current_mcs;

    let target = match direction {
        Direction::Up => previous.saturating_add(step),
        Direction::Down => previous.saturating_sub(step),
        Direction::None => previous,
    };
    let current = state.bounds.clamp(target);
    let saturated = direction != Direction::None && current == previous;

    if saturated {
        debug!(
            "MCS {} held at bound {} (bounds [{}, {}])",
            direction, previous, state.bounds.min, state.bounds.max
        );
    }

    (
        RadioParameterState { current_mcs: current, ..state },
        Actuation {
            direction,
            previous,
            current,
            saturated,
        },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Policy,
    Manual,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Policy => "policy",
            Origin::Manual => "manual",
        }
    }
}

/// A changed MCS to be mirrored to the control sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActuationCommand {
    pub mcs: i32,
    pub direction: Direction,
    pub origin: Origin,
    pub issued_at: DateTime<Utc>,
}

impl ActuationCommand {
    pub fn new(actuation: &Actuation, origin: Origin) -> Self {
        Self {
            mcs: actuation.current,
            direction: actuation.direction,
            origin,
            issued_at: Utc::now(),
        }
    }
}

/// RIC control endpoint receiving `RIC_CONTROL_REQUEST` messages.
#[derive(Debug, Clone)]
pub struct RicClient {
    client: reqwest::Client,
    base_url: String,
}

impl RicClient {
    pub fn new(client: reqwest::Client, host: &str, port: u16) -> Self {
        Self {
            client,
            base_url: format!("http://{}:{}", host, port),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn control_message(cmd: &ActuationCommand) -> serde_json::Value {
        json!({
            "messageType": "RIC_CONTROL_REQUEST",
            "ranFunctionId": 1,
            "ricRequestId": {
                "ricRequestorId": 1001,
                "ricInstanceId": 0
            },
            "ricControlHeader": {
                "controlType": "MCS_ADJUSTMENT",
                "targetNodeId": "gnb-001"
            },
            "ricControlMessage": {
                "parameters": {
                    "mcs": cmd.mcs,
                    "timestamp": cmd.issued_at.timestamp_millis() as f64 / 1000.0
                }
            }
        })
    }

    pub async fn send(&self, cmd: &ActuationCommand, limit: Duration) -> TunerResult<()> {
        let url = format!("{}/v1/controls", self.base_url);
        let resp = self
            .client
            .post(&url)
            .timeout(limit)
            .json(&Self::control_message(cmd))
            .send()
            .await
            .map_err(|e| TunerError::Actuation(format!("{}: {}", url, e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::OK {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(TunerError::Actuation(format!(
            "RIC returned HTTP {}: {}",
            status,
            body.trim()
        )))
    }

    /// `GET /health`; any transport error or non-2xx status counts as unreachable.
    pub async fn health(&self, limit: Duration) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).timeout(limit).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("[Actuator] RIC health check failed: {}", e);
                false
            }
        }
    }
}

/// Checks the RIC every `period` and publishes reachability into `connected`.
pub async fn run_ric_health_monitor(
    ric: RicClient,
    connected: Arc<AtomicBool>,
    period: Duration,
    running: Arc<AtomicBool>,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while running.load(Ordering::Relaxed) {
        interval.tick().await;

        let up = ric.health(period.min(RIC_HEALTH_TIMEOUT)).await;
        let was = connected.swap(up, Ordering::Relaxed);
        if up != was {
            if up {
                info!("[Actuator] RIC at {} reachable", ric.base_url());
            } else {
                warn!("[Actuator] RIC at {} unreachable", ric.base_url());
            }
        }
    }
}

pub enum ControlSink {
    /// Local state is authoritative; changes are only logged.
    Local,
    Ric(RicClient),
}

impl ControlSink {
    pub fn name(&self) -> &'static str {
        match self {
            ControlSink::Local => "local",
            ControlSink::Ric(_) => "ric",
        }
    }

    pub async fn deliver(&self, cmd: &ActuationCommand, limit: Duration) -> TunerResult<()> {
        match self {
            ControlSink::Local => {
                info!("[Actuator] MCS -> {} ({} {})", cmd.mcs, cmd.origin.as_str(), cmd.direction);
                Ok(())
            }
            ControlSink::Ric(client) => client.send(cmd, limit).await,
        }
    }
}

/// Sends `cmd`, retrying with exponential backoff. Returns the attempt count on success.
pub async fn deliver_with_retry(
    sink: &ControlSink,
    cmd: &ActuationCommand,
    retry: &RetryPolicy,
) -> Result<u32, (u32, TunerError)> {
    let mut backoff = retry.base_backoff;
    let mut attempt = 1;

    loop {
        match sink.deliver(cmd, retry.attempt_timeout).await {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt >= retry.max_attempts => return Err((attempt, e)),
            Err(e) => {
                warn!(
                    "[Actuator] attempt {}/{} for MCS {} failed: {}; retrying in {:?}",
                    attempt, retry.max_attempts, cmd.mcs, e, backoff
                );
                sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}

/// Producer side of the actuation queue. Cheap to clone; usable from async tasks and plain threads.
#[derive(Clone)]
pub struct ActuationHandle {
    tx: mpsc::Sender<ActuationCommand>,
}

impl ActuationHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ActuationCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueues without waiting. A full queue drops the command; returns false if dropped.
    pub fn submit(&self, cmd: ActuationCommand) -> bool {
        match self.tx.try_send(cmd) {
            Ok(()) => true,
            Err(TrySendError::Full(cmd)) => {
                warn!("[Actuator] queue full, dropping MCS {} mirror", cmd.mcs);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Drains the actuation queue into `sink` until every handle is dropped.
pub async fn run_dispatcher(
    mut rx: mpsc::Receiver<ActuationCommand>,
    sink: ControlSink,
    retry: RetryPolicy,
    recorder: Arc<EventRecorder>,
) {
    info!("[Actuator] dispatcher started sink={}", sink.name());

    while let Some(cmd) = rx.recv().await {
        match deliver_with_retry(&sink, &cmd, &retry).await {
            Ok(attempts) => {
                recorder.record(Event::ControlDelivered {
                    mcs: cmd.mcs,
                    attempts,
                });
            }
            Err((attempts, e)) => {
                error!(
                    "[Actuator] giving up on MCS {} after {} attempts: {}",
                    cmd.mcs, attempts, e
                );
                recorder.record(Event::ControlFailed {
                    mcs: cmd.mcs,
                    attempts,
                    error: e.to_string(),
                });
            }
        }
    }

    info!("[Actuator] dispatcher stopped");
}

/// Spawns the dispatcher on the current tokio runtime.
pub fn spawn_dispatcher(
    sink: ControlSink,
    retry: RetryPolicy,
    recorder: Arc<EventRecorder>,
) -> (ActuationHandle, JoinHandle<()>) {
    let (handle, rx) = ActuationHandle::channel(ACTUATION_QUEUE_CAPACITY);
    let join = tokio::spawn(run_dispatcher(rx, sink, retry, recorder));
    (handle, join)
}
