//! TaskStore port - 永続ストア（正本）
//!
//! RetryQueue が必要とするのは次の操作だけです：
//! - find_all / upsert / atomic_update / delete / delete_everything
//!
//! トランザクションは要求しません。同じキーへの同時 add/process は
//! upsert と atomic_update のセマンティクスで吸収します。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{TaskKey, TaskRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Durable collection of task records, addressed by [`TaskKey`].
///
/// # 設計原則
/// - 1 キーにつき最大 1 レコード（upsert）
/// - atomic_update は attempts を 1 増やし、最新のレコードを返す
/// - find_all の順序がそのまま sweep の処理順になる
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All persisted records, in store order.
    async fn find_all(&self) -> Result<Vec<TaskRecord>, StoreError>;

    /// Insert `record`, or replace the record that `key` addresses.
    async fn upsert(&self, key: &TaskKey, record: TaskRecord) -> Result<(), StoreError>;

    /// Increment `attempts` and set `last_attempt_at = at` in one step.
    ///
    /// Returns the updated record, or `None` when nothing matches `key`.
    async fn atomic_update(
        &self,
        key: &TaskKey,
        at: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// Delete every record matching `key`. Returns whether anything was removed.
    async fn delete(&self, key: &TaskKey) -> Result<bool, StoreError>;

    /// Delete all records.
    async fn delete_everything(&self) -> Result<(), StoreError>;
}
