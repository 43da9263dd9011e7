//! Collate - 同じ引数の同時呼び出しを 1 回の実行にまとめるゲート（single-flight）
//!
//! # 実装詳細
//! - 呼び出しごとに CallKey を作り、スロットマップを引く
//! - 実行が完了した時点でスロットを外す（完了した実行の結果は保持しない）
//! - force_call_after を過ぎた未完了スロットは次の呼び出し時に外す
//! - force_call_after を過ぎた呼び出しは、前の実行が未完了でも新しく実行する
//!   （遅いバックエンドでは同じ操作が並行して 2 回走りうる。at-least-once）

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tracing::trace;

use super::key::CallKey;
use super::shared::{SharedOutcome, SharedSlots, Slot, SlotGuard};
use super::{operation_error, GateError, Operation};
use crate::sync::lock;

pub const DEFAULT_FORCE_CALL_AFTER: Duration = Duration::from_millis(1000);

/// Single-flight wrapper: concurrent calls with equal arguments share one execution.
///
/// The execution runs on its own task, so it completes even if the caller that started
/// it stops waiting.
pub struct Collate<A, O: Operation<A>>
where
    A: Send + 'static,
{
    op: Arc<O>,
    force_call_after: Duration,
    slots: SharedSlots<O::Output, O::Error>,
    next_id: AtomicU64,
    _args: PhantomData<fn(A)>,
}

impl<A, O> Collate<A, O>
where
    A: Send + 'static,
    O: Operation<A> + 'static,
{
    pub fn new(op: O) -> Self {
        Self::with_force_call_after(op, DEFAULT_FORCE_CALL_AFTER)
    }

    pub fn with_force_call_after(op: O, force_call_after: Duration) -> Self {
        Self {
            op: Arc::new(op),
            force_call_after,
            slots: Arc::default(),
            next_id: AtomicU64::new(0),
            _args: PhantomData,
        }
    }

    pub fn force_call_after(&self) -> Duration {
        self.force_call_after
    }

    pub fn original(&self) -> &Arc<O> {
        &self.op
    }

    /// Discard the wrapper and its slots; executions already running still complete.
    pub fn restore(self) -> Arc<O> {
        self.op
    }

    /// Keys with an execution still running.
    pub fn in_flight(&self) -> usize {
        lock(&self.slots).len()
    }
}

#[async_trait]
impl<A, O> Operation<A> for Collate<A, O>
where
    A: Serialize + Send + 'static,
    O: Operation<A> + 'static,
    O::Output: Clone + Sync,
{
    type Output = O::Output;
    type Error = GateError<O::Error>;

    async fn call(&self, args: A) -> Result<Self::Output, Self::Error> {
        let key = CallKey::of(&args).map_err(|e| GateError::Key(e.to_string()))?;

        let outcome = {
            let mut slots = lock(&self.slots);
            let now = Instant::now();
            let window = self.force_call_after;
            slots.retain(|_, slot| {
                !slot.outcome.is_settled() && now.duration_since(slot.started_at) < window
            });

            match slots.get(&key) {
                Some(slot) => {
                    trace!(key = %key, "collated call");
                    slot.outcome.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let guard = SlotGuard::new(&self.slots, key.clone(), id);
                    let op = Arc::clone(&self.op);
                    let outcome = SharedOutcome::spawn(async move {
                        // released on settle or panic
                        let _guard = guard;
                        op.call(args).await.map_err(operation_error)
                    });
                    slots.insert(
                        key,
                        Slot {
                            id,
                            started_at: now,
                            outcome: outcome.clone(),
                        },
                    );
                    outcome
                }
            }
        };

        outcome.wait().await
    }
}
