//! Event recording for the tuning loop.
//!
//! - **EventRecorder:** lock-free bounded queue (8K) drained by a background thread into a CSV audit log.
//! - `record()` never blocks the control path; events are dropped and counted when the queue is full.
//!
//! Event trail: sample recorded/rejected -> decision -> actuation -> control delivered/failed.

use std::{
    collections::VecDeque,
    fs::{File, create_dir_all},
    io::BufWriter,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{DateTime, SecondsFormat, Utc};
use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use serde::Serialize;

use crate::component_b::{actuator::Origin, policy::Direction};
use crate::error::TunerResult;

const EVENT_QUEUE_CAPACITY: usize = 8_192;
const CONSUMER_POLL_MS: u64 = 20;
const FLUSH_BATCHES: usize = 8;

/// History length kept for the dashboard charts.
pub const MAX_POINTS: usize = 300;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SampleRecorded {
        value: f64,
        window_len: usize,
    },
    SampleRejected {
        value: f64,
        reason: &'static str,
    },
    Decision {
        direction: Direction,
        median: Option<f64>,
        reason: String,
    },
    Actuation {
        origin: Origin,
        direction: Direction,
        previous: i32,
        current: i32,
        saturated: bool,
    },
    ControlDelivered {
        mcs: i32,
        attempts: u32,
    },
    ControlFailed {
        mcs: i32,
        attempts: u32,
        error: String,
    },
}

#[derive(Debug, Serialize)]
struct CsvRow {
    seq: u64,
    timestamp: String,
    event: &'static str,
    direction: String,
    value: String,
    detail: String,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::SampleRecorded { .. } => "sample_recorded",
            Event::SampleRejected { .. } => "sample_rejected",
            Event::Decision { .. } => "decision",
            Event::Actuation { .. } => "actuation",
            Event::ControlDelivered { .. } => "control_delivered",
            Event::ControlFailed { .. } => "control_failed",
        }
    }

    fn to_row(&self, seq: u64, ts: DateTime<Utc>) -> CsvRow {
        let (direction, value, detail) = match self {
            Event::SampleRecorded { value, window_len } => {
                (String::new(), value.to_string(), format!("window_len={}", window_len))
            }
            Event::SampleRejected { value, reason } => {
                (String::new(), value.to_string(), reason.to_string())
            }
            Event::Decision { direction, median, reason } => (
                direction.to_string(),
                median.map(|m| format!("{:.2}", m)).unwrap_or_default(),
                reason.clone(),
            ),
            Event::Actuation { origin, direction, previous, current, saturated } => (
                direction.to_string(),
                current.to_string(),
                format!("origin={} previous={} saturated={}", origin.as_str(), previous, saturated),
            ),
            Event::ControlDelivered { mcs, attempts } => {
                (String::new(), mcs.to_string(), format!("attempts={}", attempts))
            }
            Event::ControlFailed { mcs, attempts, error } => (
                String::new(),
                mcs.to_string(),
                format!("attempts={} error={}", attempts, error),
            ),
        };

        CsvRow {
            seq,
            timestamp: ts.to_rfc3339_opts(SecondsFormat::Micros, true),
            event: self.name(),
            direction,
            value,
            detail,
        }
    }
}

struct RawEvent {
    seq: u64,
    ts: DateTime<Utc>,
    event: Event,
}

/// Non-blocking event recorder with an optional background CSV exporter.
#[derive(Clone)]
pub struct EventRecorder {
    queue: Arc<ArrayQueue<RawEvent>>,
    seq: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            seq: Arc::new(AtomicU64::new(1)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Appends to the queue without blocking; counts a drop when full.
    #[inline]
    pub fn record(&self, event: Event) {
        let raw = RawEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            ts: Utc::now(),
            event,
        };
        if self.queue.push(raw).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Removes and returns queued events, oldest first.
    pub fn drain(&self) -> Vec<Event> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(raw) = self.queue.pop() {
            out.push(raw.event);
        }
        out
    }

    /// Spawns a thread draining the queue into `path` until `running` clears, then does a final drain.
    pub fn start_exporter(
        &self,
        path: &Path,
        running: Arc<AtomicBool>,
    ) -> TunerResult<JoinHandle<()>> {
        if let Some(dir) = path.parent() {
            create_dir_all(dir)?;
        }
        let file = File::create(path)?;
        let mut wtr = Writer::from_writer(BufWriter::new(file));
        let queue = self.queue.clone();
        let dropped = self.dropped.clone();
        let display_path = path.display().to_string();

        let handle = thread::Builder::new()
            .name("event_exporter".into())
            .spawn(move || {
                let mut batches = 0usize;

                while running.load(Ordering::Relaxed) {
                    let mut any = false;
                    for _ in 0..256 {
                        match queue.pop() {
                            Some(raw) => {
                                any = true;
                                if let Err(e) = wtr.serialize(raw.event.to_row(raw.seq, raw.ts)) {
                                    error!("event log write failed: {}", e);
                                }
                            }
                            None => break,
                        }
                    }
                    if any {
                        batches += 1;
                        if batches >= FLUSH_BATCHES {
                            wtr.flush().ok();
                            batches = 0;
                        }
                    } else {
                        thread::sleep(Duration::from_millis(CONSUMER_POLL_MS));
                    }
                }

                while let Some(raw) = queue.pop() {
                    wtr.serialize(raw.event.to_row(raw.seq, raw.ts)).ok();
                }
                wtr.flush().ok();
                debug!(
                    "event exporter for {} exiting, dropped={}",
                    display_path,
                    dropped.load(Ordering::Relaxed)
                );
            })?;

        Ok(handle)
    }
}

/// Appends to a history buffer; removes the oldest entry at `MAX_POINTS` (FIFO).
#[inline]
pub fn push_capped<T>(buf: &mut VecDeque<T>, val: T) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}
