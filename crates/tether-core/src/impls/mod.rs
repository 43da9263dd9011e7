//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: テスト・開発用（プロセス終了で消える）
//! - **JsonFileTaskStore**: JSON ファイルに永続化（再起動後も残る）

pub mod file_store;
pub mod memory_store;

pub use self::file_store::JsonFileTaskStore;
pub use self::memory_store::InMemoryTaskStore;
