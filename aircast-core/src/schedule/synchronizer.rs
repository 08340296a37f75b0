use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerSection;

use super::recurrence::RecurrenceRule;

/// A stored broadcast definition the synchronizer can trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastTemplate {
    pub template_id: String,
    pub title: String,
    pub rule: RecurrenceRule,
}

/// Persistence seam for templates and their schedule bookkeeping.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Enabled templates whose next run is at or before `now`.
    async fn due_templates(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BroadcastTemplate>, Box<dyn std::error::Error + Send + Sync>>;

    /// Persists the run that just happened and the freshly computed next run.
    async fn record_run(
        &self,
        template_id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Turns a due template into an actual outgoing stream.
#[async_trait]
pub trait BroadcastLauncher: Send + Sync {
    async fn launch(
        &self,
        template: &BroadcastTemplate,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug, Error)]
pub enum SynchronizerError {
    #[error("failed to list due templates: {0}")]
    ListDue(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to record run for template {template_id}: {source}")]
    RecordRun {
        template_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type SynchronizerResult<T> = Result<T, SynchronizerError>;

/// A template that was due but could not be started this sweep.
#[derive(Debug, Clone)]
pub struct Misfire {
    pub template_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    pub triggered: Vec<String>,
    pub misfires: Vec<Misfire>,
    /// True when another sweep was still in flight and this one backed off.
    pub skipped: bool,
}

/// Periodically walks due templates, launches them, and advances their
/// schedules.
///
/// The schedule advances even when the launch misfires. A template that
/// failed to start stays in its slot for the NEXT occurrence instead of
/// being retried every sweep until it wedges the whole schedule.
pub struct ScheduleSynchronizer {
    store: Arc<dyn TemplateStore>,
    launcher: Arc<dyn BroadcastLauncher>,
    clock: Arc<dyn Clock>,
    config: SchedulerSection,
    sweep_gate: tokio::sync::Mutex<()>,
}

impl fmt::Debug for ScheduleSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleSynchronizer")
            .field("config", &self.config)
            .finish()
    }
}

impl ScheduleSynchronizer {
    pub fn new(
        store: Arc<dyn TemplateStore>,
        launcher: Arc<dyn BroadcastLauncher>,
        config: SchedulerSection,
        clock: Option<Arc<dyn Clock>>,
    ) -> Self {
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        Self {
            store,
            launcher,
            clock,
            config,
            sweep_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// One pass over everything due right now.
    ///
    /// Only one sweep runs at a time; overlapping calls return a
    /// skipped outcome.
    pub async fn sweep(&self) -> SynchronizerResult<SweepOutcome> {
        let _gate = match self.sweep_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                return Ok(SweepOutcome {
                    skipped: true,
                    ..SweepOutcome::default()
                })
            }
        };

        let mut outcome = SweepOutcome::default();
        let now = self.clock.now();
        let due = self
            .store
            .due_templates(now)
            .await
            .map_err(SynchronizerError::ListDue)?;

        for template in due {
            match self.launcher.launch(&template).await {
                Ok(stream_id) => {
                    info!(
                        target: "schedule_sync",
                        template = %template.template_id,
                        stream = %stream_id,
                        "template triggered"
                    );
                    outcome.triggered.push(template.template_id.clone());
                }
                Err(err) => {
                    warn!(
                        target: "schedule_sync",
                        template = %template.template_id,
                        error = %err,
                        "template misfired, advancing schedule anyway"
                    );
                    outcome.misfires.push(Misfire {
                        template_id: template.template_id.clone(),
                        reason: err.to_string(),
                    });
                }
            }

            let next = match template.rule.next_run(now) {
                Ok(next) => next,
                Err(err) => {
                    error!(
                        target: "schedule_sync",
                        template = %template.template_id,
                        error = %err,
                        "cannot compute next run, leaving schedule untouched"
                    );
                    outcome.misfires.push(Misfire {
                        template_id: template.template_id.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            self.store
                .record_run(&template.template_id, now, next)
                .await
                .map_err(|source| SynchronizerError::RecordRun {
                    template_id: template.template_id.clone(),
                    source,
                })?;
        }
        Ok(outcome)
    }

    /// Drives `sweep` on the configured interval until the task is dropped.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.config.sweep_interval_seconds,
        ));
        info!(
            target: "schedule_sync",
            interval_s = self.config.sweep_interval_seconds,
            "schedule synchronizer started"
        );
        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(outcome) if outcome.skipped => {
                    debug!(target: "schedule_sync", "previous sweep still running, skipping tick");
                }
                Ok(outcome) => {
                    if !outcome.triggered.is_empty() || !outcome.misfires.is_empty() {
                        info!(
                            target: "schedule_sync",
                            triggered = outcome.triggered.len(),
                            misfires = outcome.misfires.len(),
                            "sweep finished"
                        );
                    }
                }
                Err(err) => {
                    error!(target: "schedule_sync", error = %err, "sweep failed");
                }
            }
        }
    }
}
