//! TaskID <-> EntryHandle map (SPEC_FULL.md §4.6 / §5).
//!
//! Guarded by an `RwLock`, matching the original's `sync.RWMutex`-backed
//! map: entries are written rarely (schedule/remove) and read often
//! (listing, dispatch lookups).

use crate::error::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

pub type EntryHandle = Uuid;

#[derive(Default)]
pub struct TaskEntryMap {
    inner: RwLock<HashMap<String, EntryHandle>>,
}

impl TaskEntryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, task_id: &str, handle: EntryHandle) -> AppResult<()> {
        let mut guard = self.inner.write().unwrap();
        if guard.contains_key(task_id) {
            return Err(AppError::TaskAlreadyExists(task_id.to_string()));
        }
        guard.insert(task_id.to_string(), handle);
        Ok(())
    }

    pub fn load(&self, task_id: &str) -> AppResult<EntryHandle> {
        self.inner
            .read()
            .unwrap()
            .get(task_id)
            .copied()
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))
    }

    pub fn delete(&self, task_id: &str) -> AppResult<EntryHandle> {
        self.inner
            .write()
            .unwrap()
            .remove(task_id)
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))
    }

    /// Overwrites `task_id`'s handle unconditionally, used when a recurring
    /// task re-arms itself for its next tick.
    pub fn replace(&self, task_id: &str, handle: EntryHandle) {
        self.inner.write().unwrap().insert(task_id.to_string(), handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storing_duplicate_id_fails() {
        let map = TaskEntryMap::new();
        let handle = Uuid::new_v4();
        map.store("orders", handle).unwrap();
        let err = map.store("orders", Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AppError::TaskAlreadyExists(_)));
    }

    #[test]
    fn loading_missing_id_fails() {
        let map = TaskEntryMap::new();
        let err = map.load("orders").unwrap_err();
        assert!(matches!(err, AppError::TaskNotFound(_)));
    }

    #[test]
    fn delete_removes_and_returns_handle() {
        let map = TaskEntryMap::new();
        let handle = Uuid::new_v4();
        map.store("orders", handle).unwrap();
        let removed = map.delete("orders").unwrap();
        assert_eq!(removed, handle);
        assert!(map.delete("orders").is_err());
    }
}
