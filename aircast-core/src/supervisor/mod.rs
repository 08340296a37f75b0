//! Stream supervision for live encoder processes
//!
//! This module owns the lifecycle of every outgoing stream:
//! - Launching the encoder with the arguments built by `encoder`
//! - Tracking expected end times and emitting ending-soon notices
//! - Stopping overdue streams from the watchdog poll
//! - Classifying encoder exits (planned, natural, premature, failed)

pub mod process;
pub mod registry;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{EncoderSection, PrematureExitPolicy, SupervisorSection};
use crate::encoder::{stream_args, StreamRequest};

use process::{ProcessSpawner, StreamHandle, TokioProcessSpawner};
use registry::StreamRegistry;

/// Streams closer than this to their expected end count as ending soon.
pub const ENDING_SOON_THRESHOLD_MS: i64 = 300_000;

const HISTORY_LIMIT: usize = 32;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("stream {stream_id} is already tracked")]
    AlreadyTracked { stream_id: String },
    #[error("stream {stream_id} is not tracked")]
    NotTracked { stream_id: String },
    #[error("failed to spawn encoder for stream {stream_id}")]
    Spawn {
        stream_id: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid stream status: {0}")]
    InvalidStatus(String),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Starting,
    Live,
    Stopping,
    Offline,
    Error,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Starting => "starting",
            StreamStatus::Live => "live",
            StreamStatus::Stopping => "stopping",
            StreamStatus::Offline => "offline",
            StreamStatus::Error => "error",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamStatus {
    type Err = SupervisorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "starting" => Ok(StreamStatus::Starting),
            "live" => Ok(StreamStatus::Live),
            "stopping" => Ok(StreamStatus::Stopping),
            "offline" => Ok(StreamStatus::Offline),
            "error" => Ok(StreamStatus::Error),
            other => Err(SupervisorError::InvalidStatus(other.to_string())),
        }
    }
}

/// Why a stream left the live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The watchdog stopped it because the planned duration elapsed.
    DurationReached,
    /// An operator asked for the stop.
    OperatorRequest,
    /// The encoder finished its input on its own.
    NaturalEnd,
    /// The encoder exited cleanly well before the expected end.
    PrematureExit,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::DurationReached => "duration_reached",
            StopReason::OperatorRequest => "operator_request",
            StopReason::NaturalEnd => "natural_end",
            StopReason::PrematureExit => "premature_exit",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub stream_id: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    /// Planned duration in seconds. `None` means open-ended.
    pub duration_s: Option<i64>,
    pub expected_end_at: Option<DateTime<Utc>>,
    pub status: StreamStatus,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Started {
        stream_id: String,
        pid: Option<u32>,
        expected_end_at: Option<DateTime<Utc>>,
    },
    EndingSoon {
        stream_id: String,
        remaining_ms: i64,
    },
    Restarted {
        stream_id: String,
        remaining_s: i64,
    },
    Stopped {
        stream_id: String,
        reason: StopReason,
    },
    Failed {
        stream_id: String,
        reason: String,
    },
}

/// What one watchdog poll saw and did.
#[derive(Debug, Clone, Default)]
pub struct PollReport {
    pub checked: usize,
    pub stopped: Vec<String>,
    pub ending_soon: Vec<String>,
    /// True when another poll was still in flight and this one backed off.
    pub skipped: bool,
}

#[derive(Clone)]
pub struct StreamSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    registry: StreamRegistry,
    encoder: EncoderSection,
    config: SupervisorSection,
    spawner: Arc<dyn ProcessSpawner>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<StreamEvent>,
    stops: Mutex<HashMap<String, oneshot::Sender<StopReason>>>,
    requests: Mutex<HashMap<String, StreamRequest>>,
    notified: Mutex<HashSet<String>>,
    history: Mutex<VecDeque<StreamRecord>>,
    tick_gate: Mutex<()>,
}

impl fmt::Debug for StreamSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSupervisor")
            .field("tracked", &self.inner.registry.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl StreamSupervisor {
    pub fn new(
        encoder: EncoderSection,
        config: SupervisorSection,
        spawner: Option<Arc<dyn ProcessSpawner>>,
        clock: Option<Arc<dyn Clock>>,
    ) -> Self {
        let spawner = spawner.unwrap_or_else(|| Arc::new(TokioProcessSpawner));
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(SupervisorInner {
                registry: StreamRegistry::new(),
                encoder,
                config,
                spawner,
                clock,
                events,
                stops: Mutex::new(HashMap::new()),
                requests: Mutex::new(HashMap::new()),
                notified: Mutex::new(HashSet::new()),
                history: Mutex::new(VecDeque::new()),
                tick_gate: Mutex::new(()),
            }),
        }
    }

    /// Launches the encoder for `request` and tracks the stream.
    ///
    /// The expected end is fixed at launch time from the planned
    /// duration; requests without a positive duration are open-ended.
    pub async fn start(&self, request: StreamRequest) -> SupervisorResult<StreamRecord> {
        let stream_id = request.stream_id.clone();
        let now = self.inner.clock.now();
        let duration = request.duration_s.filter(|d| *d > 0);
        let record = StreamRecord {
            stream_id: stream_id.clone(),
            pid: None,
            started_at: now,
            duration_s: duration,
            expected_end_at: duration.map(|d| now + Duration::seconds(d)),
            status: StreamStatus::Starting,
            failure_reason: None,
        };
        if !self.inner.registry.try_insert(record) {
            return Err(SupervisorError::AlreadyTracked { stream_id });
        }
        self.inner
            .requests
            .lock()
            .unwrap()
            .insert(stream_id.clone(), request);
        self.launch(&stream_id).await
    }

    /// Requests a stop; the monitor task terminates the encoder.
    pub fn stop(&self, stream_id: &str) -> SupervisorResult<()> {
        self.request_stop(stream_id, StopReason::OperatorRequest)
    }

    /// One watchdog pass over every live stream.
    ///
    /// Only one poll runs at a time; a tick that arrives while the
    /// previous one is still in flight returns a skipped report.
    pub fn poll(&self) -> PollReport {
        let inner = &self.inner;
        let _gate = match inner.tick_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                return PollReport {
                    skipped: true,
                    ..PollReport::default()
                }
            }
        };

        let mut report = PollReport::default();
        let now = inner.clock.now();
        for record in inner.registry.snapshot() {
            if record.status != StreamStatus::Live {
                continue;
            }
            report.checked += 1;
            let Some(end) = record.expected_end_at else {
                continue;
            };
            let remaining_ms = (end - now).num_milliseconds();
            if remaining_ms <= 0 {
                if self
                    .request_stop(&record.stream_id, StopReason::DurationReached)
                    .is_ok()
                {
                    report.stopped.push(record.stream_id.clone());
                }
                continue;
            }
            if remaining_ms < ENDING_SOON_THRESHOLD_MS {
                report.ending_soon.push(record.stream_id.clone());
                let first_notice = inner
                    .notified
                    .lock()
                    .unwrap()
                    .insert(record.stream_id.clone());
                if first_notice {
                    let _ = inner.events.send(StreamEvent::EndingSoon {
                        stream_id: record.stream_id.clone(),
                        remaining_ms,
                    });
                }
            }
        }
        report
    }

    /// Drives `poll` on the configured interval until the task is dropped.
    pub async fn run_watchdog(&self) {
        let period = std::time::Duration::from_secs(self.inner.config.poll_interval_seconds);
        let mut ticker = tokio::time::interval(period);
        info!(
            target: "stream_watchdog",
            interval_s = self.inner.config.poll_interval_seconds,
            "watchdog started"
        );
        loop {
            ticker.tick().await;
            let report = self.poll();
            if report.skipped {
                debug!(target: "stream_watchdog", "previous poll still running, skipping tick");
                continue;
            }
            if !report.stopped.is_empty() || !report.ending_soon.is_empty() {
                info!(
                    target: "stream_watchdog",
                    checked = report.checked,
                    stopped = report.stopped.len(),
                    ending_soon = report.ending_soon.len(),
                    "poll acted on streams"
                );
            }
        }
    }

    /// Milliseconds until the expected end, clamped at zero.
    pub fn remaining_ms(&self, stream_id: &str) -> Option<i64> {
        let record = self.inner.registry.get(stream_id)?;
        let end = record.expected_end_at?;
        Some((end - self.inner.clock.now()).num_milliseconds().max(0))
    }

    pub fn is_ending_soon(&self, stream_id: &str) -> bool {
        self.remaining_ms(stream_id)
            .map(|ms| ms < ENDING_SOON_THRESHOLD_MS)
            .unwrap_or(false)
    }

    pub fn get(&self, stream_id: &str) -> Option<StreamRecord> {
        self.inner.registry.get(stream_id)
    }

    pub fn snapshot(&self) -> Vec<StreamRecord> {
        self.inner.registry.snapshot()
    }

    /// Streams currently live, excluding ones mid-start or mid-stop.
    pub fn active(&self) -> Vec<StreamRecord> {
        self.inner
            .registry
            .snapshot()
            .into_iter()
            .filter(|record| record.status == StreamStatus::Live)
            .collect()
    }

    /// Recently finished streams, oldest first.
    pub fn history(&self) -> Vec<StreamRecord> {
        self.inner.history.lock().unwrap().iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }
}

impl StreamSupervisor {
    async fn launch(&self, stream_id: &str) -> SupervisorResult<StreamRecord> {
        let request = self
            .inner
            .requests
            .lock()
            .unwrap()
            .get(stream_id)
            .cloned()
            .ok_or_else(|| SupervisorError::NotTracked {
                stream_id: stream_id.to_string(),
            })?;

        let args = stream_args(&request, &self.inner.encoder);
        let mut command = Command::new(&self.inner.encoder.ffmpeg_binary);
        command.args(&args);

        let handle = match self.inner.spawner.spawn(&mut command).await {
            Ok(handle) => handle,
            Err(source) => {
                self.fail(stream_id, format!("failed to spawn encoder: {source}"));
                return Err(SupervisorError::Spawn {
                    stream_id: stream_id.to_string(),
                    source,
                });
            }
        };

        let pid = handle.pid();
        let record = self
            .inner
            .registry
            .update(stream_id, |record| {
                record.pid = pid;
                record.status = StreamStatus::Live;
            })
            .ok_or_else(|| SupervisorError::NotTracked {
                stream_id: stream_id.to_string(),
            })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        self.inner
            .stops
            .lock()
            .unwrap()
            .insert(stream_id.to_string(), stop_tx);

        let supervisor = self.clone();
        let monitored = stream_id.to_string();
        tokio::spawn(async move {
            supervisor.monitor(monitored, handle, stop_rx).await;
        });

        info!(
            target: "stream_watchdog",
            stream = %stream_id,
            pid = ?pid,
            expected_end = ?record.expected_end_at,
            "encoder started"
        );
        let _ = self.inner.events.send(StreamEvent::Started {
            stream_id: stream_id.to_string(),
            pid,
            expected_end_at: record.expected_end_at,
        });
        Ok(record)
    }

    /// Waits for whichever comes first: the process exiting on its own
    /// or a stop request. Both may happen at once; either order ends
    /// with a stopped stream, never a failed one.
    async fn monitor(
        &self,
        stream_id: String,
        mut handle: Box<dyn StreamHandle>,
        mut stop_rx: oneshot::Receiver<StopReason>,
    ) {
        tokio::select! {
            exit = handle.wait() => {
                let code = match exit {
                    Ok(code) => code,
                    Err(err) => {
                        warn!(target: "stream_watchdog", stream = %stream_id, error = %err, "failed to reap encoder");
                        None
                    }
                };
                self.on_exit(&stream_id, code).await;
            }
            reason = &mut stop_rx => {
                if let Err(err) = handle.terminate().await {
                    warn!(target: "stream_watchdog", stream = %stream_id, error = %err, "failed to terminate encoder");
                }
                let reason = reason.unwrap_or(StopReason::OperatorRequest);
                self.on_stopped(&stream_id, reason);
            }
        }
    }

    /// Classifies an encoder exit that was not preceded by a stop the
    /// monitor already handled.
    async fn on_exit(&self, stream_id: &str, exit_code: Option<i32>) {
        let Some(record) = self.inner.registry.get(stream_id) else {
            return;
        };
        let now = self.inner.clock.now();

        if record.status == StreamStatus::Stopping {
            // A stop was requested and the process went away on its own
            // before the terminate landed. Same outcome either way.
            let reason = match record.expected_end_at {
                Some(end) if now >= end => StopReason::DurationReached,
                _ => StopReason::OperatorRequest,
            };
            self.on_stopped(stream_id, reason);
            return;
        }

        match exit_code {
            Some(0) => {
                let Some(end) = record.expected_end_at else {
                    self.on_stopped(stream_id, StopReason::NaturalEnd);
                    return;
                };
                let tolerance = Duration::seconds(self.inner.config.planned_exit_tolerance_s);
                if now >= end - tolerance {
                    self.on_stopped(stream_id, StopReason::NaturalEnd);
                    return;
                }
                match self.inner.config.premature_exit {
                    PrematureExitPolicy::Stop => {
                        warn!(
                            target: "stream_watchdog",
                            stream = %stream_id,
                            "encoder exited early, accepting per policy"
                        );
                        self.on_stopped(stream_id, StopReason::PrematureExit);
                    }
                    PrematureExitPolicy::Restart => {
                        self.restart(stream_id, end).await;
                    }
                }
            }
            Some(code) => {
                self.fail(stream_id, format!("encoder exited with status {code}"));
            }
            None => {
                self.fail(stream_id, "encoder terminated by signal".to_string());
            }
        }
    }

    /// Relaunches the encoder for whatever is left of the planned window.
    ///
    /// Returns a boxed future: `restart` is awaited (via `on_exit` and
    /// `monitor`) by the task `launch` spawns, and that recursion needs
    /// a type-erased future for the spawn's `Send` bound to resolve.
    fn restart<'a>(
        &'a self,
        stream_id: &'a str,
        expected_end: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let now = self.inner.clock.now();
            let remaining = (expected_end - now).num_seconds().max(1);
            {
                let mut requests = self.inner.requests.lock().unwrap();
                if let Some(request) = requests.get_mut(stream_id) {
                    request.duration_s = Some(remaining);
                }
            }
            self.inner.registry.update(stream_id, |record| {
                record.status = StreamStatus::Starting;
                record.pid = None;
                record.started_at = now;
                record.duration_s = Some(remaining);
                record.expected_end_at = Some(now + Duration::seconds(remaining));
            });
            warn!(
                target: "stream_watchdog",
                stream = %stream_id,
                remaining_s = remaining,
                "encoder exited early, restarting for the remainder"
            );
            let _ = self.inner.events.send(StreamEvent::Restarted {
                stream_id: stream_id.to_string(),
                remaining_s: remaining,
            });
            // A relaunch failure is recorded and emitted by launch itself.
            let _ = self.launch(stream_id).await;
        })
    }

    fn request_stop(&self, stream_id: &str, reason: StopReason) -> SupervisorResult<()> {
        self.inner
            .registry
            .update(stream_id, |record| record.status = StreamStatus::Stopping)
            .ok_or_else(|| SupervisorError::NotTracked {
                stream_id: stream_id.to_string(),
            })?;
        let sender = self.inner.stops.lock().unwrap().remove(stream_id);
        if let Some(sender) = sender {
            let _ = sender.send(reason);
        }
        Ok(())
    }

    fn on_stopped(&self, stream_id: &str, reason: StopReason) {
        self.finish(stream_id, StreamStatus::Offline, None);
        info!(
            target: "stream_watchdog",
            stream = %stream_id,
            reason = %reason,
            "stream stopped"
        );
        let _ = self.inner.events.send(StreamEvent::Stopped {
            stream_id: stream_id.to_string(),
            reason,
        });
    }

    fn fail(&self, stream_id: &str, reason: String) {
        self.finish(stream_id, StreamStatus::Error, Some(reason.clone()));
        error!(
            target: "stream_watchdog",
            stream = %stream_id,
            reason = %reason,
            "stream failed"
        );
        let _ = self.inner.events.send(StreamEvent::Failed {
            stream_id: stream_id.to_string(),
            reason,
        });
    }

    /// Retires a stream: final status goes to the bounded history, all
    /// per-stream state is dropped.
    fn finish(&self, stream_id: &str, status: StreamStatus, failure: Option<String>) {
        self.inner.registry.update(stream_id, |record| {
            record.status = status;
            record.failure_reason = failure;
        });
        if let Some(record) = self.inner.registry.remove(stream_id) {
            let mut history = self.inner.history.lock().unwrap();
            history.push_back(record);
            while history.len() > HISTORY_LIMIT {
                history.pop_front();
            }
        }
        self.inner.stops.lock().unwrap().remove(stream_id);
        self.inner.requests.lock().unwrap().remove(stream_id);
        self.inner.notified.lock().unwrap().remove(stream_id);
    }
}
