//! feedback.rs
//! Closes the loop: metric store -> policy engine -> actuator, over one owned state.
//!
//! All mutable state (window, radio parameter, counters) lives in `TunerState` behind a single
//! `parking_lot::Mutex`. Every operation takes the lock once and never holds it across an await,
//! so sampling, evaluation, manual overrides and scrapes serialize cleanly. `snapshot()` copies
//! under the same lock; a scraper never sees a half-applied update.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{self, MissedTickBehavior};

use crate::component_a::window::{QualitySample, RollingWindow};
use crate::component_b::{
    actuator::{self, Actuation, ActuationCommand, ActuationHandle, McsBounds, Origin, RadioParameterState},
    policy::{self, AdjustmentDecision, Direction, Thresholds},
};
use crate::config::Config;
use crate::error::{TunerError, TunerResult};
use crate::utils::metrics::{Event, EventRecorder, push_capped};

/// Loop phase derived from the latest decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopPhase {
    Steady,
    AdjustingUp,
    AdjustingDown,
}

impl LoopPhase {
    pub fn from_direction(direction: Direction) -> Self {
        match direction {
            Direction::Up => LoopPhase::AdjustingUp,
            Direction::Down => LoopPhase::AdjustingDown,
            Direction::None => LoopPhase::Steady,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub total_samples: u64,
    pub rejected_samples: u64,
    pub evaluations: u64,
    pub adjustments_up: u64,
    pub adjustments_down: u64,
    pub saturated: u64,
}

impl Counters {
    /// Adjustments that actually changed MCS.
    #[inline]
    pub fn adjustment_count(&self) -> u64 {
        self.adjustments_up + self.adjustments_down
    }
}

#[derive(Debug, Clone)]
pub struct TunerState {
    window: RollingWindow,
    radio: RadioParameterState,
    thresholds: Thresholds,
    step: i32,
    last_decision: Option<AdjustmentDecision>,
    last_direction: Direction,
    phase: LoopPhase,
    counters: Counters,
    mcs_history: VecDeque<i32>,
    started_at: DateTime<Utc>,
}

impl TunerState {
    pub fn new(
        window_capacity: usize,
        thresholds: Thresholds,
        radio: RadioParameterState,
        step: i32,
    ) -> Self {
        let mut mcs_history = VecDeque::new();
        mcs_history.push_back(radio.current_mcs());
        Self {
            window: RollingWindow::new(window_capacity),
            radio,
            thresholds,
            step,
            last_decision: None,
            last_direction: Direction::None,
            phase: LoopPhase::Steady,
            counters: Counters::default(),
            mcs_history,
            started_at: Utc::now(),
        }
    }

    fn apply(&mut self, direction: Direction) -> Actuation {
        let (next, act) = actuator::apply_direction(direction, self.radio, self.step);
        self.radio = next;
        if act.saturated {
            self.counters.saturated += 1;
        }
        if act.changed() {
            match act.direction {
                Direction::Up => self.counters.adjustments_up += 1,
                Direction::Down => self.counters.adjustments_down += 1,
                Direction::None => {}
            }
            self.last_direction = act.direction;
        }
        push_capped(&mut self.mcs_history, self.radio.current_mcs());
        act
    }

    fn snapshot(&self) -> TunerSnapshot {
        TunerSnapshot {
            current_mcs: self.radio.current_mcs(),
            mcs_bounds: self.radio.bounds(),
            samples: self.window.samples(),
            window_capacity: self.window.capacity(),
            cqi_median: self.window.median().ok(),
            cqi_mean: self.window.mean(),
            cqi_trend: self.window.trend(),
            thresholds: self.thresholds,
            last_decision: self.last_decision.clone(),
            last_adjustment_direction: self.last_direction,
            phase: self.phase,
            adjustment_count: self.counters.adjustment_count(),
            counters: self.counters,
            mcs_history: self.mcs_history.iter().copied().collect(),
            started_at: self.started_at,
            taken_at: Utc::now(),
        }
    }
}

/// Point-in-time copy of the loop, safe to hand to exporters.
#[derive(Debug, Clone, Serialize)]
pub struct TunerSnapshot {
    pub current_mcs: i32,
    pub mcs_bounds: McsBounds,
    pub samples: Vec<QualitySample>,
    pub window_capacity: usize,
    pub cqi_median: Option<f64>,
    pub cqi_mean: Option<f64>,
    pub cqi_trend: f64,
    pub thresholds: Thresholds,
    pub last_decision: Option<AdjustmentDecision>,
    /// Direction of the most recent change to MCS (`none` until the first one).
    pub last_adjustment_direction: Direction,
    pub phase: LoopPhase,
    pub adjustment_count: u64,
    pub counters: Counters,
    pub mcs_history: Vec<i32>,
    pub started_at: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
}

impl TunerSnapshot {
    pub fn uptime_secs(&self) -> i64 {
        (self.taken_at - self.started_at).num_seconds()
    }
}

/// Result of one evaluation tick.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub decision: AdjustmentDecision,
    pub actuation: Actuation,
    pub phase_changed: bool,
}

/// Shared handle to the tuner state; cheap to clone across tasks and threads.
#[derive(Clone)]
pub struct SharedTuner {
    state: Arc<Mutex<TunerState>>,
    recorder: Arc<EventRecorder>,
}

impl SharedTuner {
    pub fn new(state: TunerState, recorder: Arc<EventRecorder>) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            recorder,
        }
    }

    pub fn from_config(cfg: &Config, recorder: Arc<EventRecorder>) -> Self {
        let radio = RadioParameterState::new(cfg.mcs_initial, cfg.mcs_bounds);
        let state = TunerState::new(cfg.window_capacity, cfg.thresholds, radio, cfg.mcs_step);
        Self::new(state, recorder)
    }

    pub fn recorder(&self) -> &Arc<EventRecorder> {
        &self.recorder
    }

    /// Sampling path: validates and stores one reading. Rejections are counted, not recorded.
    pub fn record(&self, value: f64) -> TunerResult<()> {
        let sample = match QualitySample::new(value) {
            Ok(s) => s,
            Err(e) => {
                self.state.lock().counters.rejected_samples += 1;
                let reason = match &e {
                    TunerError::InvalidSample { reason, .. } => *reason,
                    _ => "invalid",
                };
                warn!("[Tuner] rejected CQI sample {}: {}", value, reason);
                self.recorder.record(Event::SampleRejected { value, reason });
                return Err(e);
            }
        };

        let window_len = {
            let mut s = self.state.lock();
            s.window.record(sample);
            s.counters.total_samples += 1;
            s.window.len()
        };

        debug!("[Tuner] CQI {:.1} recorded (window {})", value, window_len);
        self.recorder.record(Event::SampleRecorded { value, window_len });
        Ok(())
    }

    /// Evaluation path: policy on the current window, then actuation of any non-none decision.
    pub fn evaluate_and_apply(&self) -> TickOutcome {
        let (decision, actuation, previous_phase, phase) = {
            let mut s = self.state.lock();
            let decision = policy::evaluate(&s.window, &s.thresholds);
            s.counters.evaluations += 1;

            let actuation = s.apply(decision.direction);

            let previous_phase = s.phase;
            s.phase = LoopPhase::from_direction(decision.direction);
            s.last_decision = Some(decision.clone());
            (decision, actuation, previous_phase, s.phase)
        };

        let phase_changed = previous_phase != phase;
        if phase_changed {
            info!("[Tuner] phase {:?} -> {:?}: {}", previous_phase, phase, decision.reason);
        }
        if actuation.changed() {
            info!(
                "[Tuner] MCS {} -> {} ({})",
                actuation.previous, actuation.current, decision.reason
            );
        }

        self.recorder.record(Event::Decision {
            direction: decision.direction,
            median: decision.median,
            reason: decision.reason.clone(),
        });
        if decision.direction != Direction::None {
            self.record_actuation(&actuation, Origin::Policy);
        }

        TickOutcome {
            decision,
            actuation,
            phase_changed,
        }
    }

    /// Manual override: applies `direction` directly, bypassing the policy engine.
    pub fn manual_override(&self, direction: Direction) -> Actuation {
        let decision = AdjustmentDecision::manual(direction);
        let actuation = {
            let mut s = self.state.lock();
            let act = s.apply(direction);
            s.last_decision = Some(decision);
            act
        };

        info!(
            "[Tuner] manual {}: MCS {} -> {}{}",
            direction,
            actuation.previous,
            actuation.current,
            if actuation.saturated { " (at bound)" } else { "" }
        );
        self.record_actuation(&actuation, Origin::Manual);
        actuation
    }

    fn record_actuation(&self, act: &Actuation, origin: Origin) {
        self.recorder.record(Event::Actuation {
            origin,
            direction: act.direction,
            previous: act.previous,
            current: act.current,
            saturated: act.saturated,
        });
    }

    pub fn snapshot(&self) -> TunerSnapshot {
        self.state.lock().snapshot()
    }

    pub fn radio_state(&self) -> RadioParameterState {
        self.state.lock().radio
    }

    pub fn window_len(&self) -> usize {
        self.state.lock().window.len()
    }

    pub fn has_samples(&self) -> bool {
        self.state.lock().counters.total_samples > 0
    }
}

/// Evaluation path: one policy tick per period; changed MCS values are queued for the sink.
pub async fn run_evaluator(
    tuner: SharedTuner,
    actuation: ActuationHandle,
    period: Duration,
    running: Arc<AtomicBool>,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick fires immediately; skip it so the window has a period to fill
    interval.tick().await;
    info!("[Evaluator] started period={:?}", period);

    while running.load(Ordering::Relaxed) {
        interval.tick().await;

        let outcome = tuner.evaluate_and_apply();
        if outcome.actuation.changed() {
            actuation.submit(ActuationCommand::new(&outcome.actuation, Origin::Policy));
        }
    }

    info!("[Evaluator] stopped");
}
