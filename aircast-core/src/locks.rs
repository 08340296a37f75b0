use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Returned when a save is already in flight for the same entity.
#[derive(Debug, Error)]
#[error("save already in progress for {entity_id}")]
pub struct SaveConflict {
    pub entity_id: String,
}

/// Tracks which entities have a save in flight. Clones share state.
///
/// A second save attempt for a held entity is rejected immediately
/// instead of queued.
#[derive(Debug, Clone, Default)]
pub struct SaveLockSet {
    held: Arc<Mutex<HashSet<String>>>,
}

impl SaveLockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the save lock for `entity_id`, releasing it when the
    /// returned guard drops.
    pub fn try_begin(&self, entity_id: &str) -> Result<SaveLockGuard, SaveConflict> {
        let mut held = self.held.lock().unwrap();
        if !held.insert(entity_id.to_string()) {
            return Err(SaveConflict {
                entity_id: entity_id.to_string(),
            });
        }
        Ok(SaveLockGuard {
            held: Arc::clone(&self.held),
            entity_id: entity_id.to_string(),
        })
    }

    pub fn is_held(&self, entity_id: &str) -> bool {
        self.held.lock().unwrap().contains(entity_id)
    }
}

#[derive(Debug)]
pub struct SaveLockGuard {
    held: Arc<Mutex<HashSet<String>>>,
    entity_id: String,
}

impl SaveLockGuard {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

impl Drop for SaveLockGuard {
    fn drop(&mut self) {
        self.held.lock().unwrap().remove(&self.entity_id);
    }
}
