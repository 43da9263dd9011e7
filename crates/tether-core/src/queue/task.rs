//! QueuedTask - 永続化されたリトライ可能な作業単位
//!
//! タスク自身が自分の永続化操作（store / update / remove）を持ちます。
//! 終端操作は abandon と check_off の 2 つだけで、どちらも store からの削除に
//! 成功した呼び出しだけが通知を発行します（二重通知しない）。

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::QueueShared;
use crate::domain::{AbandonReason, EventKind, TaskKey, TaskRecord};
use crate::error::TetherError;

/// Handle to one persisted task.
///
/// Handles are cheap to clone; every clone addresses the same stored record.
#[derive(Clone)]
pub struct QueuedTask {
    record: TaskRecord,
    reason: Option<AbandonReason>,
    shared: Arc<QueueShared>,
}

impl QueuedTask {
    pub(crate) fn new(record: TaskRecord, shared: Arc<QueueShared>) -> Self {
        Self {
            record,
            reason: None,
            shared,
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.record.payload
    }

    pub fn attempts(&self) -> u32 {
        self.record.attempts
    }

    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.record.last_attempt_at
    }

    /// Set once the task has been abandoned.
    pub fn reason(&self) -> Option<&AbandonReason> {
        self.reason.as_ref()
    }

    pub fn key(&self) -> TaskKey {
        self.record.key()
    }

    /// Snapshot of the record as last seen by this handle.
    pub fn record(&self) -> &TaskRecord {
        &self.record
    }

    /// Upsert the record by its identity key.
    pub async fn store(&self) -> Result<(), TetherError> {
        self.shared
            .store
            .upsert(&self.key(), self.record.clone())
            .await?;
        Ok(())
    }

    /// Count one attempt in the store and refresh this handle from the stored result.
    pub async fn update(&mut self) -> Result<(), TetherError> {
        let now = self.shared.clock.now();
        match self.shared.store.atomic_update(&self.key(), now).await? {
            Some(record) => {
                self.record = record;
                Ok(())
            }
            None => Err(TetherError::NotFound {
                name: self.record.name.clone(),
            }),
        }
    }

    /// Delete the record. `false` when it was already gone.
    pub async fn remove(&self) -> Result<bool, TetherError> {
        Ok(self.shared.store.delete(&self.key()).await?)
    }

    /// `update()`, then notify `<name>-attempt` subscribers.
    pub async fn attempt(&mut self) -> Result<(), TetherError> {
        self.update().await?;
        let delivered = self.shared.hub.emit(EventKind::Attempt, self);
        debug!(
            task = %self.record.name,
            attempts = self.record.attempts,
            delivered,
            "task attempted"
        );
        Ok(())
    }

    /// Record `reason`, remove the task and notify `<name>-fail` subscribers.
    ///
    /// Calling this on a task that is already gone records the reason but emits nothing.
    pub async fn abandon(&mut self, reason: impl Into<AbandonReason>) -> Result<(), TetherError> {
        let reason = reason.into();
        self.reason = Some(reason.clone());
        if !self.remove().await? {
            debug!(task = %self.record.name, "abandon on removed task ignored");
            return Ok(());
        }
        warn!(
            task = %self.record.name,
            attempts = self.record.attempts,
            %reason,
            "task abandoned"
        );
        self.shared.hub.emit(EventKind::Fail, self);
        Ok(())
    }

    /// Confirm success: remove the task and notify `<name>-done` subscribers once.
    pub async fn check_off(&self) -> Result<(), TetherError> {
        if !self.remove().await? {
            debug!(task = %self.record.name, "check_off on removed task ignored");
            return Ok(());
        }
        info!(
            task = %self.record.name,
            attempts = self.record.attempts,
            "task checked off"
        );
        self.shared.hub.emit(EventKind::Done, self);
        Ok(())
    }
}

impl fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedTask")
            .field("record", &self.record)
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}
