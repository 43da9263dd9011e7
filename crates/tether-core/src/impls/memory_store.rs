//! InMemoryTaskStore - 開発用のタスクストア
//!
//! Vec で挿入順を保持します（sweep の処理順 = 挿入順）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{TaskKey, TaskRecord};
use crate::ports::{StoreError, TaskStore};

/// In-memory store, insertion ordered.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    records: Mutex<Vec<TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store, e.g. to simulate records left over from a previous process.
    pub fn with_records(records: Vec<TaskRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub async fn get(&self, key: &TaskKey) -> Option<TaskRecord> {
        let records = self.records.lock().await;
        records.iter().find(|r| key.matches(r)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

/// Shared mutation logic, also used by the file-backed store.
pub(crate) fn upsert_in(records: &mut Vec<TaskRecord>, key: &TaskKey, record: TaskRecord) {
    match records.iter_mut().find(|r| key.matches(r)) {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}

pub(crate) fn update_in(
    records: &mut [TaskRecord],
    key: &TaskKey,
    at: DateTime<Utc>,
) -> Option<TaskRecord> {
    let record = records.iter_mut().find(|r| key.matches(r))?;
    record.record_attempt(at);
    Some(record.clone())
}

pub(crate) fn delete_in(records: &mut Vec<TaskRecord>, key: &TaskKey) -> bool {
    let before = records.len();
    records.retain(|r| !key.matches(r));
    records.len() != before
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn find_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self.records.lock().await.clone())
    }

    async fn upsert(&self, key: &TaskKey, record: TaskRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        upsert_in(&mut records, key, record);
        Ok(())
    }

    async fn atomic_update(
        &self,
        key: &TaskKey,
        at: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let mut records = self.records.lock().await;
        Ok(update_in(&mut records, key, at))
    }

    async fn delete(&self, key: &TaskKey) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        Ok(delete_in(&mut records, key))
    }

    async fn delete_everything(&self) -> Result<(), StoreError> {
        self.records.lock().await.clear();
        Ok(())
    }
}
