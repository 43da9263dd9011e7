//! Observability - sweep 結果とキューの集計ビュー
//!
//! どちらも読み取り専用のスナップショットで、キューの状態を変更しません。

use serde::Serialize;

/// Outcome of one `RetryQueue::process()` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Records loaded from the store.
    pub inspected: usize,
    pub attempted: usize,
    pub abandoned: usize,
    /// Not yet due.
    pub waiting: usize,
    /// Items whose store operation failed; they stay in the store for the next sweep.
    pub failed: usize,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        self.attempted == 0 && self.abandoned == 0
    }
}

/// Point-in-time counts over the persisted tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    /// Would be attempted by a sweep right now.
    pub due: usize,
    /// Would be abandoned by a sweep right now.
    pub exhausted: usize,
}
