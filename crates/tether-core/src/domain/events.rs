//! Events - キューのライフサイクル通知
//!
//! 通知は `(EventKind, name)` をキーとして購読されます。
//! グローバルな emitter は使いません。

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle notification kinds emitted by the retry queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The task was (re)attempted; the consumer should do the work now.
    Attempt,
    /// The task was abandoned; carries the abandonment reason.
    Fail,
    /// The consumer checked the task off.
    Done,
}

impl EventKind {
    pub fn suffix(self) -> &'static str {
        match self {
            EventKind::Attempt => "attempt",
            EventKind::Fail => "fail",
            EventKind::Done => "done",
        }
    }

    /// Wire name of the notification for a task name, e.g. `"sync-attempt"`.
    pub fn topic(self, name: &str) -> String {
        format!("{name}-{}", self.suffix())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}
