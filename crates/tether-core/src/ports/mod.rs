//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（ドキュメントストア、時刻）へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - TaskStore が正本（source of truth）。キューはメモリ上にタスクを保持しない
//! - 時刻は Clock 経由で取得し、テストでは ManualClock に差し替える

pub mod clock;
pub mod task_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::task_store::{StoreError, TaskStore};
