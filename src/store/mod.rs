//! Test-case storage.
//!
//! The judge only needs [`TestCaseStore::fetch_by_task_id`]; the remaining
//! operations back the `tests` CLI subcommand. [`MemoryStore`] keeps cases in
//! memory and can persist them as a JSON array.

use crate::config::types::TestCase;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("test case {0} not found")]
    NotFound(i64),

    #[error("test case {0} already exists")]
    Duplicate(i64),

    #[error("test store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait TestCaseStore: Send + Sync {
    /// Every case for a task, any order. An unknown task yields an empty list.
    fn fetch_by_task_id(&self, task_id: i64) -> StoreResult<Vec<TestCase>>;
    fn add(&self, case: TestCase) -> StoreResult<()>;
    fn delete(&self, id: i64) -> StoreResult<()>;
    /// Replace the case stored under `id`; `case.id` may differ, which re-keys it.
    fn update(&self, id: i64, case: TestCase) -> StoreResult<()>;
    fn get_all(&self) -> StoreResult<Vec<TestCase>>;
    fn get_by_id(&self, id: i64) -> StoreResult<TestCase>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    cases: RwLock<BTreeMap<i64, TestCase>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list; later duplicates are rejected.
    pub fn from_cases(cases: impl IntoIterator<Item = TestCase>) -> StoreResult<Self> {
        let store = Self::new();
        for case in cases {
            store.add(case)?;
        }
        Ok(store)
    }

    /// Load a JSON array of test cases. A missing file is an empty store.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("test store {} not found, starting empty", path.display());
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Backend(format!("failed to read {}: {}", path.display(), e))
        })?;
        let cases: Vec<TestCase> = serde_json::from_str(&content).map_err(|e| {
            StoreError::Backend(format!("failed to parse {}: {}", path.display(), e))
        })?;
        Self::from_cases(cases)
    }

    /// Persist as a pretty JSON array ordered by id.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> StoreResult<()> {
        let path = path.as_ref();
        let cases = self.get_all()?;
        let content = serde_json::to_string_pretty(&cases)
            .map_err(|e| StoreError::Backend(format!("failed to encode test cases: {}", e)))?;

        // Write-then-rename keeps the previous file intact on failure.
        let staging = path.with_extension("json.tmp");
        std::fs::write(&staging, content)
            .and_then(|_| std::fs::rename(&staging, path))
            .map_err(|e| StoreError::Backend(format!("failed to write {}: {}", path.display(), e)))
    }

    pub fn len(&self) -> usize {
        self.read().map(|cases| cases.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<i64, TestCase>>> {
        self.cases
            .read()
            .map_err(|_| StoreError::Backend("test store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<i64, TestCase>>> {
        self.cases
            .write()
            .map_err(|_| StoreError::Backend("test store lock poisoned".to_string()))
    }
}

impl TestCaseStore for MemoryStore {
    fn fetch_by_task_id(&self, task_id: i64) -> StoreResult<Vec<TestCase>> {
        Ok(self
            .read()?
            .values()
            .filter(|case| case.task_id == task_id)
            .cloned()
            .collect())
    }

    fn add(&self, case: TestCase) -> StoreResult<()> {
        let mut cases = self.write()?;
        if cases.contains_key(&case.id) {
            return Err(StoreError::Duplicate(case.id));
        }
        cases.insert(case.id, case);
        Ok(())
    }

    fn delete(&self, id: i64) -> StoreResult<()> {
        self.write()?
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    fn update(&self, id: i64, case: TestCase) -> StoreResult<()> {
        let mut cases = self.write()?;
        if !cases.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        if case.id != id && cases.contains_key(&case.id) {
            return Err(StoreError::Duplicate(case.id));
        }
        cases.remove(&id);
        cases.insert(case.id, case);
        Ok(())
    }

    fn get_all(&self) -> StoreResult<Vec<TestCase>> {
        Ok(self.read()?.values().cloned().collect())
    }

    fn get_by_id(&self, id: i64) -> StoreResult<TestCase> {
        self.read()?.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: i64, task_id: i64) -> TestCase {
        TestCase {
            id,
            task_id,
            input: format!("{}", id),
            expected_output: format!("{}", id * 2),
            points: 1,
        }
    }

    #[test]
    fn fetch_filters_by_task() {
        let store = MemoryStore::from_cases([case(1, 10), case(2, 20), case(3, 10)]).unwrap();
        let ids: Vec<i64> = store
            .fetch_by_task_id(10)
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(store.fetch_by_task_id(99).unwrap().is_empty());
    }

    #[test]
    fn add_rejects_duplicate_ids() {
        let store = MemoryStore::new();
        store.add(case(1, 1)).unwrap();
        assert!(matches!(store.add(case(1, 2)), Err(StoreError::Duplicate(1))));
    }

    #[test]
    fn update_can_change_the_id() {
        let store = MemoryStore::from_cases([case(1, 1), case(2, 1)]).unwrap();

        store.update(1, case(5, 1)).unwrap();
        assert!(matches!(store.get_by_id(1), Err(StoreError::NotFound(1))));
        assert_eq!(store.get_by_id(5).unwrap().task_id, 1);

        assert!(matches!(store.update(5, case(2, 1)), Err(StoreError::Duplicate(2))));
        assert!(matches!(store.update(42, case(42, 1)), Err(StoreError::NotFound(42))));
    }

    #[test]
    fn delete_missing_is_not_found() {
        let store = MemoryStore::from_cases([case(1, 1)]).unwrap();
        store.delete(1).unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.delete(1), Err(StoreError::NotFound(1))));
    }

    #[test]
    fn file_round_trip_uses_wire_field_names() {
        let dir = std::env::temp_dir().join(format!("codejudge-store-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tests.json");

        let store = MemoryStore::from_cases([case(2, 7), case(1, 7)]).unwrap();
        store.save_to_file(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[0]["id"], 1);
        assert_eq!(raw[0]["taskID"], 7);
        assert_eq!(raw[0]["expectedResult"], "2");

        let reloaded = MemoryStore::load_from_file(&path).unwrap();
        assert_eq!(reloaded.len(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_is_empty_store() {
        let store = MemoryStore::load_from_file("/nonexistent/codejudge/tests.json").unwrap();
        assert!(store.is_empty());
    }
}
