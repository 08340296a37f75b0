use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Notify;

use aircast_core::{
    BroadcastLauncher, BroadcastTemplate, Clock, ManualClock, RecurrenceRule, RecurrencePattern,
    ScheduleSynchronizer, SchedulerSection, SynchronizerError, TemplateStore,
};

struct MockTemplateStore {
    templates: Mutex<Vec<BroadcastTemplate>>,
    recorded: Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
    fail_listing: AtomicBool,
    fail_recording: AtomicBool,
}

impl MockTemplateStore {
    fn with_templates(templates: Vec<BroadcastTemplate>) -> Self {
        Self {
            templates: Mutex::new(templates),
            recorded: Mutex::new(Vec::new()),
            fail_listing: AtomicBool::new(false),
            fail_recording: AtomicBool::new(false),
        }
    }

    fn recorded(&self) -> Vec<(String, DateTime<Utc>, DateTime<Utc>)> {
        self.recorded.lock().unwrap().clone()
    }

    fn next_run_of(&self, template_id: &str) -> Option<DateTime<Utc>> {
        self.templates
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.template_id == template_id)
            .and_then(|t| t.rule.next_run_at)
    }
}

#[async_trait]
impl TemplateStore for MockTemplateStore {
    async fn due_templates(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BroadcastTemplate>, Box<dyn std::error::Error + Send + Sync>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err("store offline".into());
        }
        Ok(self
            .templates
            .lock()
            .unwrap()
            .iter()
            .filter(|t| {
                t.rule.enabled && t.rule.next_run_at.map(|next| next <= now).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn record_run(
        &self,
        template_id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.fail_recording.load(Ordering::SeqCst) {
            return Err("store offline".into());
        }
        let mut templates = self.templates.lock().unwrap();
        if let Some(template) = templates
            .iter_mut()
            .find(|t| t.template_id == template_id)
        {
            template.rule.last_run_at = Some(last_run_at);
            template.rule.next_run_at = Some(next_run_at);
        }
        self.recorded
            .lock()
            .unwrap()
            .push((template_id.to_string(), last_run_at, next_run_at));
        Ok(())
    }
}

struct MockLauncher {
    failing: Mutex<HashSet<String>>,
    launched: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
}

impl MockLauncher {
    fn new() -> Self {
        Self {
            failing: Mutex::new(HashSet::new()),
            launched: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    fn failing_for(template_ids: &[&str]) -> Self {
        let launcher = Self::new();
        let mut failing = launcher.failing.lock().unwrap();
        for id in template_ids {
            failing.insert(id.to_string());
        }
        drop(failing);
        launcher
    }

    fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl BroadcastLauncher for MockLauncher {
    async fn launch(
        &self,
        template: &BroadcastTemplate,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.failing.lock().unwrap().contains(&template.template_id) {
            return Err(format!("no media available for {}", template.template_id).into());
        }
        self.launched
            .lock()
            .unwrap()
            .push(template.template_id.clone());
        Ok(format!("stream-{}", template.template_id))
    }
}

// 2024-05-06 is a Monday.
fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
}

fn scheduler_config() -> SchedulerSection {
    SchedulerSection {
        sweep_interval_seconds: 60,
    }
}

fn template(id: &str, rule: RecurrenceRule) -> BroadcastTemplate {
    BroadcastTemplate {
        template_id: id.to_string(),
        title: format!("Show {id}"),
        rule,
    }
}

fn due_daily(id: &str, now: DateTime<Utc>) -> BroadcastTemplate {
    let mut rule = RecurrenceRule::daily("20:00");
    rule.next_run_at = Some(now - Duration::minutes(5));
    template(id, rule)
}

fn synchronizer(
    store: &Arc<MockTemplateStore>,
    launcher: &Arc<MockLauncher>,
    now: DateTime<Utc>,
) -> ScheduleSynchronizer {
    ScheduleSynchronizer::new(
        Arc::clone(store) as Arc<dyn TemplateStore>,
        Arc::clone(launcher) as Arc<dyn BroadcastLauncher>,
        scheduler_config(),
        Some(Arc::new(ManualClock::new(now)) as Arc<dyn Clock>),
    )
}

#[tokio::test]
async fn sweep_triggers_due_templates_and_advances_them() {
    let now = base_time();
    let mut future_rule = RecurrenceRule::daily("20:00");
    future_rule.next_run_at = Some(now + Duration::hours(3));
    let store = Arc::new(MockTemplateStore::with_templates(vec![
        due_daily("morning-show", now),
        template("evening-show", future_rule),
    ]));
    let launcher = Arc::new(MockLauncher::new());
    let sync = synchronizer(&store, &launcher, now);

    let outcome = sync.sweep().await.unwrap();
    assert_eq!(outcome.triggered, vec!["morning-show".to_string()]);
    assert!(outcome.misfires.is_empty());
    assert!(!outcome.skipped);
    assert_eq!(launcher.launched(), vec!["morning-show".to_string()]);

    let recorded = store.recorded();
    assert_eq!(recorded.len(), 1);
    let (template_id, last_run, next_run) = &recorded[0];
    assert_eq!(template_id, "morning-show");
    assert_eq!(*last_run, now);
    assert_eq!(*next_run, Utc.with_ymd_and_hms(2024, 5, 6, 20, 0, 0).unwrap());
}

#[tokio::test]
async fn a_long_missed_slot_advances_from_now_not_from_the_backlog() {
    let now = base_time();
    let mut rule = RecurrenceRule::daily("20:00");
    rule.next_run_at = Some(now - Duration::days(3));
    let store = Arc::new(MockTemplateStore::with_templates(vec![template(
        "stale-show",
        rule,
    )]));
    let launcher = Arc::new(MockLauncher::new());
    let sync = synchronizer(&store, &launcher, now);

    sync.sweep().await.unwrap();

    // One trigger, then straight to tonight's slot; no catch-up runs.
    assert_eq!(launcher.launched().len(), 1);
    assert_eq!(
        store.next_run_of("stale-show"),
        Some(Utc.with_ymd_and_hms(2024, 5, 6, 20, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn a_misfire_still_advances_the_schedule() {
    let now = base_time();
    let store = Arc::new(MockTemplateStore::with_templates(vec![
        due_daily("broken-show", now),
        due_daily("healthy-show", now),
    ]));
    let launcher = Arc::new(MockLauncher::failing_for(&["broken-show"]));
    let sync = synchronizer(&store, &launcher, now);

    let outcome = sync.sweep().await.unwrap();
    assert_eq!(outcome.triggered, vec!["healthy-show".to_string()]);
    assert_eq!(outcome.misfires.len(), 1);
    assert_eq!(outcome.misfires[0].template_id, "broken-show");
    assert!(outcome.misfires[0].reason.contains("no media available"));

    // Both schedules moved to the next slot, misfire included.
    let expected = Utc.with_ymd_and_hms(2024, 5, 6, 20, 0, 0).unwrap();
    assert_eq!(store.next_run_of("broken-show"), Some(expected));
    assert_eq!(store.next_run_of("healthy-show"), Some(expected));

    // The misfired template is not retried by the following sweep.
    let outcome = sync.sweep().await.unwrap();
    assert!(outcome.triggered.is_empty());
    assert!(outcome.misfires.is_empty());
}

#[tokio::test]
async fn an_uncomputable_rule_is_a_misfire_that_leaves_the_schedule_alone() {
    let now = base_time();
    let rule = RecurrenceRule {
        pattern: RecurrencePattern::Weekly,
        time_of_day: Some("20:00".to_string()),
        days_of_week: Vec::new(),
        enabled: true,
        last_run_at: None,
        next_run_at: Some(now - Duration::minutes(5)),
    };
    let store = Arc::new(MockTemplateStore::with_templates(vec![template(
        "dayless-show",
        rule,
    )]));
    let launcher = Arc::new(MockLauncher::new());
    let sync = synchronizer(&store, &launcher, now);

    let outcome = sync.sweep().await.unwrap();
    // The launch itself went out; only the schedule is stuck.
    assert_eq!(outcome.triggered, vec!["dayless-show".to_string()]);
    assert_eq!(outcome.misfires.len(), 1);
    assert!(store.recorded().is_empty());
    assert_eq!(store.next_run_of("dayless-show"), Some(now - Duration::minutes(5)));
}

#[tokio::test]
async fn overlapping_sweeps_are_skipped() {
    let now = base_time();
    let store = Arc::new(MockTemplateStore::with_templates(vec![due_daily(
        "slow-show",
        now,
    )]));
    let gate = Arc::new(Notify::new());
    let launcher = Arc::new(MockLauncher {
        failing: Mutex::new(HashSet::new()),
        launched: Mutex::new(Vec::new()),
        gate: Some(Arc::clone(&gate)),
    });
    let sync = Arc::new(synchronizer(&store, &launcher, now));

    let background = Arc::clone(&sync);
    let first = tokio::spawn(async move { background.sweep().await });
    tokio::task::yield_now().await;

    let second = sync.sweep().await.unwrap();
    assert!(second.skipped);
    assert!(second.triggered.is_empty());

    gate.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.triggered, vec!["slow-show".to_string()]);
}

#[tokio::test]
async fn store_failures_abort_the_sweep() {
    let now = base_time();
    let store = Arc::new(MockTemplateStore::with_templates(vec![due_daily(
        "morning-show",
        now,
    )]));
    let launcher = Arc::new(MockLauncher::new());
    let sync = synchronizer(&store, &launcher, now);

    store.fail_listing.store(true, Ordering::SeqCst);
    let err = sync.sweep().await.unwrap_err();
    assert!(matches!(err, SynchronizerError::ListDue(_)));

    store.fail_listing.store(false, Ordering::SeqCst);
    store.fail_recording.store(true, Ordering::SeqCst);
    let err = sync.sweep().await.unwrap_err();
    match err {
        SynchronizerError::RecordRun { template_id, .. } => {
            assert_eq!(template_id, "morning-show");
        }
        other => panic!("unexpected error: {other}"),
    }
}
