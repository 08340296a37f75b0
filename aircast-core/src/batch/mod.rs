//! Sequential batch upload queue
//!
//! This module drains media sources one at a time:
//! - Paste-style source parsing and pluggable validation
//! - A strict status transition table per queue item
//! - Single-concurrency processing where one failure never blocks the rest
//! - Cooperative cancellation between items and failed-only retry

pub mod validator;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use validator::SourceValidator;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("queue is already processing")]
    Busy,
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },
    #[error("invalid item status: {0}")]
    InvalidStatus(String),
    #[error("unknown queue item index: {0}")]
    UnknownItem(usize),
}

pub type BatchResult<T> = Result<T, BatchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    Pending,
    Downloading,
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Downloading => "downloading",
            ItemStatus::Uploading => "uploading",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ItemStatus::Downloading | ItemStatus::Uploading | ItemStatus::Processing
        )
    }

    /// The full transition table. Stages may be skipped going forward;
    /// the only way back is retrying a failed item.
    pub fn can_transition(self, to: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, to),
            (Pending, Downloading | Uploading | Processing | Completed | Failed)
                | (Downloading, Uploading | Processing | Completed | Failed)
                | (Uploading, Processing | Completed | Failed)
                | (Processing, Completed | Failed)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = BatchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ItemStatus::Pending),
            "downloading" => Ok(ItemStatus::Downloading),
            "uploading" => Ok(ItemStatus::Uploading),
            "processing" => Ok(ItemStatus::Processing),
            "completed" => Ok(ItemStatus::Completed),
            "failed" => Ok(ItemStatus::Failed),
            other => Err(BatchError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub index: usize,
    pub source: String,
    pub status: ItemStatus,
    pub progress: u8,
    pub error: Option<String>,
}

/// Splits pasted text into one source per non-empty trimmed line.
pub fn parse_sources(raw: &str) -> Vec<String> {
    raw.split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
}

impl ValidationReport {
    pub fn all_valid(&self) -> bool {
        self.invalid.is_empty()
    }
}

pub fn validate_sources(sources: &[String], validator: &dyn SourceValidator) -> ValidationReport {
    let mut report = ValidationReport::default();
    for source in sources {
        if validator.is_valid(source) {
            report.valid.push(source.clone());
        } else {
            report.invalid.push(source.clone());
        }
    }
    report
}

/// Does the actual work for one queue item. Implementations report
/// stage changes and progress through the handle and may poll it for
/// cancellation.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(
        &self,
        item: &QueueItem,
        progress: &ProgressHandle,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// The processor's window into the queue while its item runs.
pub struct ProgressHandle {
    inner: Arc<Mutex<BatchInner>>,
    index: usize,
}

impl ProgressHandle {
    pub fn set_status(&self, status: ItemStatus) -> BatchResult<()> {
        self.inner.lock().unwrap().transition(self.index, status)
    }

    pub fn set_progress(&self, percent: u8) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(item) = inner.items.get_mut(self.index) {
            item.progress = percent.min(100);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().unwrap().is_cancelled
    }
}

#[derive(Debug, Default)]
struct BatchInner {
    items: Vec<QueueItem>,
    is_processing: bool,
    is_cancelled: bool,
}

impl BatchInner {
    fn transition(&mut self, index: usize, to: ItemStatus) -> BatchResult<()> {
        let item = self
            .items
            .get_mut(index)
            .ok_or(BatchError::UnknownItem(index))?;
        if !item.status.can_transition(to) {
            return Err(BatchError::InvalidTransition {
                from: item.status,
                to,
            });
        }
        item.status = to;
        Ok(())
    }

    fn status_counts(&self) -> HashMap<ItemStatus, usize> {
        let mut counts = HashMap::new();
        for item in &self.items {
            *counts.entry(item.status).or_insert(0) += 1;
        }
        counts
    }

    /// Terminal items count as fully done whatever their last reported
    /// progress was, so a failed item cannot drag the batch below 100.
    fn overall_progress(&self) -> u8 {
        if self.items.is_empty() {
            return 0;
        }
        let total: u32 = self
            .items
            .iter()
            .map(|item| {
                if item.status.is_terminal() {
                    100u32
                } else {
                    item.progress as u32
                }
            })
            .sum();
        (total as f64 / self.items.len() as f64).round() as u8
    }
}

/// Marks the queue busy for the lifetime of one run, even if the run
/// panics.
struct RunGuard {
    inner: Arc<Mutex<BatchInner>>,
}

impl RunGuard {
    fn begin(inner: &Arc<Mutex<BatchInner>>) -> BatchResult<Self> {
        let mut state = inner.lock().unwrap();
        if state.is_processing {
            return Err(BatchError::Busy);
        }
        state.is_processing = true;
        state.is_cancelled = false;
        Ok(Self {
            inner: Arc::clone(inner),
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.lock().unwrap().is_processing = false;
    }
}

/// A batch of media sources drained strictly one at a time.
#[derive(Debug, Clone)]
pub struct BatchQueue {
    batch_id: Uuid,
    inner: Arc<Mutex<BatchInner>>,
}

impl Default for BatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchQueue {
    pub fn new() -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            inner: Arc::new(Mutex::new(BatchInner::default())),
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Appends sources as pending items, returning how many were added.
    pub fn enqueue<I, S>(&self, sources: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock().unwrap();
        let mut added = 0;
        for source in sources {
            let index = inner.items.len();
            inner.items.push(QueueItem {
                index,
                source: source.into(),
                status: ItemStatus::Pending,
                progress: 0,
                error: None,
            });
            added += 1;
        }
        added
    }

    pub fn items(&self) -> Vec<QueueItem> {
        self.inner.lock().unwrap().items.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().items.is_empty()
    }

    pub fn is_processing(&self) -> bool {
        self.inner.lock().unwrap().is_processing
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().unwrap().is_cancelled
    }

    /// Asks the in-flight run to stop after the current item.
    pub fn cancel(&self) {
        self.inner.lock().unwrap().is_cancelled = true;
    }

    /// Drops every item. Rejected while a run is in flight.
    pub fn reset(&self) -> BatchResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_processing {
            return Err(BatchError::Busy);
        }
        inner.items.clear();
        inner.is_cancelled = false;
        Ok(())
    }

    pub fn status_counts(&self) -> HashMap<ItemStatus, usize> {
        self.inner.lock().unwrap().status_counts()
    }

    pub fn overall_progress(&self) -> u8 {
        self.inner.lock().unwrap().overall_progress()
    }

    pub fn has_failures(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .items
            .iter()
            .any(|item| item.status == ItemStatus::Failed)
    }

    /// True once every item reached a terminal status.
    pub fn is_complete(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        !inner.items.is_empty() && inner.items.iter().all(|item| item.status.is_terminal())
    }

    /// Processes pending items in order, one at a time.
    ///
    /// A failed item is recorded and skipped over; processing continues
    /// with the next pending item. Returns [`BatchError::Busy`] when a
    /// run is already in flight.
    pub async fn run(&self, processor: &dyn ItemProcessor) -> BatchResult<BatchReport> {
        let guard = RunGuard::begin(&self.inner)?;
        loop {
            let next = {
                let inner = self.inner.lock().unwrap();
                if inner.is_cancelled {
                    None
                } else {
                    inner
                        .items
                        .iter()
                        .position(|item| item.status == ItemStatus::Pending)
                }
            };
            let Some(index) = next else {
                break;
            };

            let snapshot = self.inner.lock().unwrap().items[index].clone();
            let handle = ProgressHandle {
                inner: Arc::clone(&self.inner),
                index,
            };
            match processor.process(&snapshot, &handle).await {
                Ok(()) => {
                    let mut inner = self.inner.lock().unwrap();
                    if !inner.items[index].status.is_terminal() {
                        inner.transition(index, ItemStatus::Completed)?;
                    }
                    if inner.items[index].status == ItemStatus::Completed {
                        inner.items[index].progress = 100;
                        inner.items[index].error = None;
                    }
                }
                Err(err) => {
                    warn!(
                        target: "batch_queue",
                        source = %snapshot.source,
                        error = %err,
                        "queue item failed"
                    );
                    let mut inner = self.inner.lock().unwrap();
                    if !inner.items[index].status.is_terminal() {
                        inner.transition(index, ItemStatus::Failed)?;
                    }
                    inner.items[index].error = Some(err.to_string());
                }
            }
        }
        drop(guard);
        Ok(self.report())
    }

    /// Flips failed items back to pending and runs again. Items that
    /// already completed are left alone.
    pub async fn retry_failed(&self, processor: &dyn ItemProcessor) -> BatchResult<BatchReport> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.is_processing {
                return Err(BatchError::Busy);
            }
            let failed: Vec<usize> = inner
                .items
                .iter()
                .enumerate()
                .filter(|(_, item)| item.status == ItemStatus::Failed)
                .map(|(index, _)| index)
                .collect();
            for index in failed {
                inner.transition(index, ItemStatus::Pending)?;
                inner.items[index].progress = 0;
                inner.items[index].error = None;
            }
        }
        self.run(processor).await
    }

    fn report(&self) -> BatchReport {
        let inner = self.inner.lock().unwrap();
        BatchReport {
            batch_id: self.batch_id,
            counts: inner.status_counts(),
            overall_progress: inner.overall_progress(),
            cancelled: inner.is_cancelled,
        }
    }
}

/// Summary of a finished (or cancelled) run.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub counts: HashMap<ItemStatus, usize>,
    pub overall_progress: u8,
    pub cancelled: bool,
}
