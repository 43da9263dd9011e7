//! tether-core
//!
//! Infrastructure for making unreliable, duplicate-prone or rate-limited calls safe to
//! invoke from many concurrent call sites.
//!
//! # モジュール構成
//! - **domain**: タスクレコード、識別キー、通知種別
//! - **ports**: 抽象化レイヤー（TaskStore, Clock）
//! - **impls**: ports の実装（InMemoryTaskStore, JsonFileTaskStore）
//! - **queue**: 永続リトライキュー（RetryQueue, QueuedTask, DelayPolicy）
//! - **gate**: 呼び出し調停ラッパー（Serialize, Collate, Cache, Limit）
//! - **observability**: sweep 結果とキューの集計ビュー
//! - **error**: エラー型

pub mod domain;
pub mod error;
pub mod gate;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

mod sync;

pub use domain::{AbandonReason, EventKind, TaskKey, TaskRecord};
pub use error::TetherError;
pub use gate::{Cache, Collate, GateError, Limit, Operation, SerialLane, Serialize};
pub use impls::{InMemoryTaskStore, JsonFileTaskStore};
pub use observability::{QueueCounts, SweepReport};
pub use ports::{Clock, ManualClock, StoreError, SystemClock, TaskStore};
pub use queue::{
    DelayPolicy, DelaySetting, NotificationReceiver, QueueSettings, QueuedTask, RetryQueue,
    RetryQueueBuilder, RetryQueueConfig,
};
