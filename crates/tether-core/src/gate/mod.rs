//! Gate - 呼び出し調停ラッパー
//!
//! 任意の非同期操作を包み、より強い並行性の契約を持つ値を返します。
//!
//! - **Serialize**: 提出順に 1 つずつ実行
//! - **Collate**: 同じ引数の同時呼び出しを 1 回の実行にまとめる（single-flight）
//! - **Cache**: 同じ引数の結果を ttl の間再利用
//! - **Limit**: ttl 内の連続呼び出しを末尾の 1 回にまとめる（trailing debounce）
//!
//! # 設計原則
//! - ラッパーは元の操作と同じ `Operation` 契約を実装する（合成は明示的な構築で行う）
//! - `restore()` はラッパーを破棄して元の操作を返すだけ
//! - 状態（スロット、タイマー、レーン）はすべてラッパーインスタンスが所有する

pub mod cache;
pub mod collate;
pub mod key;
pub mod limit;
pub mod serialize;

mod shared;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use self::cache::Cache;
pub use self::collate::Collate;
pub use self::key::CallKey;
pub use self::limit::Limit;
pub use self::serialize::{SerialLane, Serialize};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An asynchronous operation taking `A`.
///
/// Implemented for every `Fn(A) -> impl Future<Output = Result<T, E>>`, and by each gate,
/// so gates compose: `Collate::new(Cache::new(op))`.
#[async_trait]
pub trait Operation<A>: Send + Sync
where
    A: Send + 'static,
{
    type Output: Send + 'static;
    type Error: Send + Sync + 'static;

    async fn call(&self, args: A) -> Result<Self::Output, Self::Error>;
}

#[async_trait]
impl<A, F, Fut, T, E> Operation<A> for F
where
    A: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + Sync + 'static,
{
    type Output = T;
    type Error = E;

    async fn call(&self, args: A) -> Result<T, E> {
        (self)(args).await
    }
}

/// Failure observed through a gate.
#[derive(Debug, Error)]
pub enum GateError<E> {
    /// The wrapped operation failed. Shared by every caller that observed the execution.
    #[error("operation failed: {0}")]
    Operation(Arc<E>),

    /// The call was dropped before it ran (gate restored or dropped) or its execution panicked.
    #[error("call aborted before completion")]
    Aborted,

    /// Arguments could not be reduced to a canonical key.
    #[error("invalid call arguments: {0}")]
    Key(String),
}

impl<E> GateError<E> {
    /// The wrapped operation's error, if that is what happened.
    pub fn operation(&self) -> Option<&E> {
        match self {
            GateError::Operation(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, GateError::Aborted)
    }
}

impl<E> Clone for GateError<E> {
    fn clone(&self) -> Self {
        match self {
            GateError::Operation(e) => GateError::Operation(Arc::clone(e)),
            GateError::Aborted => GateError::Aborted,
            GateError::Key(msg) => GateError::Key(msg.clone()),
        }
    }
}

pub(crate) fn operation_error<E>(e: E) -> GateError<E> {
    GateError::Operation(Arc::new(e))
}
