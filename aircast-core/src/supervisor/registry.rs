use std::collections::HashMap;
use std::sync::Mutex;

use super::StreamRecord;

/// Shared table of every stream the supervisor currently tracks.
///
/// Lookups hand out clones so callers never hold the lock across await
/// points.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: Mutex<HashMap<String, StreamRecord>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: StreamRecord) {
        let mut streams = self.streams.lock().unwrap();
        streams.insert(record.stream_id.clone(), record);
    }

    /// Inserts only if the stream is not already tracked. The check and
    /// the insert happen under one lock so concurrent starts cannot both
    /// claim the same id.
    pub fn try_insert(&self, record: StreamRecord) -> bool {
        let mut streams = self.streams.lock().unwrap();
        if streams.contains_key(&record.stream_id) {
            return false;
        }
        streams.insert(record.stream_id.clone(), record);
        true
    }

    pub fn get(&self, stream_id: &str) -> Option<StreamRecord> {
        self.streams.lock().unwrap().get(stream_id).cloned()
    }

    pub fn remove(&self, stream_id: &str) -> Option<StreamRecord> {
        self.streams.lock().unwrap().remove(stream_id)
    }

    /// Applies `apply` to the record in place, returning the updated copy.
    pub fn update<F>(&self, stream_id: &str, apply: F) -> Option<StreamRecord>
    where
        F: FnOnce(&mut StreamRecord),
    {
        let mut streams = self.streams.lock().unwrap();
        let record = streams.get_mut(stream_id)?;
        apply(record);
        Some(record.clone())
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.streams.lock().unwrap().contains_key(stream_id)
    }

    /// Stable snapshot ordered by stream id.
    pub fn snapshot(&self) -> Vec<StreamRecord> {
        let streams = self.streams.lock().unwrap();
        let mut records: Vec<StreamRecord> = streams.values().cloned().collect();
        records.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        records
    }

    pub fn len(&self) -> usize {
        self.streams.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.lock().unwrap().is_empty()
    }
}
