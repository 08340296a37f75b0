use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use aircast_core::{
    parse_sources, validate_sources, BatchError, BatchQueue, DriveLinkValidator, ItemProcessor,
    ItemStatus, ProgressHandle, QueueItem,
};

struct ScriptedProcessor {
    failing: Mutex<HashSet<String>>,
    order: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedProcessor {
    fn succeeding() -> Self {
        Self {
            failing: Mutex::new(HashSet::new()),
            order: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    fn failing_for(sources: &[&str]) -> Self {
        let processor = Self::succeeding();
        {
            let mut failing = processor.failing.lock().unwrap();
            for source in sources {
                failing.insert(source.to_string());
            }
        }
        processor
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::succeeding()
        }
    }

    fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }
}

#[async_trait]
impl ItemProcessor for ScriptedProcessor {
    async fn process(
        &self,
        item: &QueueItem,
        progress: &ProgressHandle,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.order.lock().unwrap().push(item.source.clone());
        progress.set_status(ItemStatus::Downloading)?;
        progress.set_progress(40);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.failing.lock().unwrap().contains(&item.source) {
            return Err(format!("quota exceeded uploading {}", item.source).into());
        }
        Ok(())
    }
}

#[test]
fn pasted_text_flows_through_parse_validate_enqueue() {
    let raw = "https://drive.google.com/file/d/1a2B3c4D5e6F7g8H9i0J/view\n\n  https://drive.google.com/open?id=0Z9y8X7w6V5u4T3s2R1q  \nnot-a-drive-link\n";
    let sources = parse_sources(raw);
    assert_eq!(sources.len(), 3);

    let report = validate_sources(&sources, &DriveLinkValidator::new());
    assert_eq!(report.valid.len(), 2);
    assert_eq!(report.invalid, vec!["not-a-drive-link".to_string()]);
    assert!(!report.all_valid());

    let queue = BatchQueue::new();
    let added = queue.enqueue(report.valid.clone());
    assert_eq!(added, 2);
    let items = queue.items();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.status == ItemStatus::Pending));
    assert_eq!(items[0].index, 0);
    assert_eq!(items[1].index, 1);
}

#[tokio::test]
async fn items_run_one_at_a_time_in_submission_order() {
    let queue = BatchQueue::new();
    queue.enqueue(["a.mp4", "b.mp4", "c.mp4"]);
    let processor = ScriptedProcessor::succeeding();
    let report = queue.run(&processor).await.unwrap();

    assert_eq!(processor.order(), vec!["a.mp4", "b.mp4", "c.mp4"]);
    assert_eq!(report.counts.get(&ItemStatus::Completed), Some(&3));
    assert_eq!(report.overall_progress, 100);
    assert!(!report.cancelled);
    assert!(queue.is_complete());
    assert!(!queue.is_processing());
}

#[tokio::test]
async fn one_failure_does_not_block_the_rest() {
    let queue = BatchQueue::new();
    queue.enqueue(["a.mp4", "b.mp4", "c.mp4"]);
    let processor = ScriptedProcessor::failing_for(&["b.mp4"]);
    let report = queue.run(&processor).await.unwrap();

    assert_eq!(processor.order(), vec!["a.mp4", "b.mp4", "c.mp4"]);
    let items = queue.items();
    assert_eq!(items[0].status, ItemStatus::Completed);
    assert_eq!(items[1].status, ItemStatus::Failed);
    assert_eq!(items[2].status, ItemStatus::Completed);
    assert!(items[1].error.as_deref().unwrap().contains("quota exceeded"));
    assert_eq!(report.counts.get(&ItemStatus::Failed), Some(&1));
    assert_eq!(report.counts.get(&ItemStatus::Completed), Some(&2));
    // Failed items count as settled, so the batch still reads fully done.
    assert_eq!(report.overall_progress, 100);
    assert!(queue.is_complete());
    assert!(queue.has_failures());
}

#[tokio::test]
async fn retry_failed_reruns_only_the_failed_items() {
    let queue = BatchQueue::new();
    queue.enqueue(["a.mp4", "b.mp4", "c.mp4"]);
    let first = ScriptedProcessor::failing_for(&["b.mp4"]);
    queue.run(&first).await.unwrap();
    assert!(queue.has_failures());

    let second = ScriptedProcessor::succeeding();
    let report = queue.retry_failed(&second).await.unwrap();

    assert_eq!(second.order(), vec!["b.mp4"]);
    let items = queue.items();
    assert!(items.iter().all(|item| item.status == ItemStatus::Completed));
    assert!(items.iter().all(|item| item.error.is_none()));
    assert_eq!(report.overall_progress, 100);
    assert!(!queue.has_failures());
}

#[tokio::test]
async fn a_second_run_is_rejected_while_one_is_in_flight() {
    let queue = BatchQueue::new();
    queue.enqueue(["a.mp4"]);
    let gate = Arc::new(Notify::new());
    let processor = Arc::new(ScriptedProcessor::gated(Arc::clone(&gate)));

    let background_queue = queue.clone();
    let background_processor = Arc::clone(&processor);
    let run =
        tokio::spawn(async move { background_queue.run(background_processor.as_ref()).await });
    tokio::task::yield_now().await;

    assert!(queue.is_processing());
    assert!(matches!(
        queue.run(processor.as_ref()).await,
        Err(BatchError::Busy)
    ));
    assert!(matches!(
        queue.retry_failed(processor.as_ref()).await,
        Err(BatchError::Busy)
    ));
    assert!(matches!(queue.reset(), Err(BatchError::Busy)));

    gate.notify_one();
    let report = run.await.unwrap().unwrap();
    assert!(!queue.is_processing());
    assert_eq!(report.counts.get(&ItemStatus::Completed), Some(&1));
}

#[tokio::test]
async fn cancel_finishes_the_current_item_then_stops() {
    let queue = BatchQueue::new();
    queue.enqueue(["a.mp4", "b.mp4", "c.mp4"]);
    let gate = Arc::new(Notify::new());
    let processor = Arc::new(ScriptedProcessor::gated(Arc::clone(&gate)));

    let background_queue = queue.clone();
    let background_processor = Arc::clone(&processor);
    let run =
        tokio::spawn(async move { background_queue.run(background_processor.as_ref()).await });
    tokio::task::yield_now().await;

    queue.cancel();
    gate.notify_one();
    let report = run.await.unwrap().unwrap();

    assert!(report.cancelled);
    assert!(queue.is_cancelled());
    let statuses: Vec<ItemStatus> = queue.items().iter().map(|item| item.status).collect();
    assert_eq!(
        statuses,
        vec![ItemStatus::Completed, ItemStatus::Pending, ItemStatus::Pending]
    );
    assert_eq!(report.counts.get(&ItemStatus::Pending), Some(&2));

    // A fresh run clears the flag and drains what was left behind.
    let follow_up = ScriptedProcessor::succeeding();
    let report = queue.run(&follow_up).await.unwrap();
    assert!(!report.cancelled);
    assert_eq!(follow_up.order(), vec!["b.mp4", "c.mp4"]);
    assert!(queue.is_complete());
}

#[tokio::test]
async fn overall_progress_mixes_done_and_in_flight_items() {
    let queue = BatchQueue::new();
    queue.enqueue(["a.mp4", "b.mp4", "c.mp4"]);
    let gate = Arc::new(Notify::new());
    let processor = Arc::new(ScriptedProcessor::gated(Arc::clone(&gate)));

    let background_queue = queue.clone();
    let background_processor = Arc::clone(&processor);
    let run =
        tokio::spawn(async move { background_queue.run(background_processor.as_ref()).await });
    tokio::task::yield_now().await;

    // First item done at 100, second mid-download at 40, third untouched.
    gate.notify_one();
    tokio::task::yield_now().await;
    assert_eq!(queue.overall_progress(), 47);

    gate.notify_one();
    tokio::task::yield_now().await;
    gate.notify_one();
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.overall_progress, 100);
}

#[tokio::test]
async fn an_empty_queue_run_is_a_noop() {
    let queue = BatchQueue::new();
    let processor = ScriptedProcessor::succeeding();
    let report = queue.run(&processor).await.unwrap();

    assert!(processor.order().is_empty());
    assert!(report.counts.is_empty());
    assert_eq!(report.overall_progress, 0);
    assert!(!queue.is_complete());
}
