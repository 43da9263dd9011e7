//! Limit - trailing debounce ゲート
//!
//! ttl 以内に続いた呼び出しをまとめ、最後の呼び出しから ttl 経過した時点で 1 回だけ実行します。
//!
//! # 実装詳細
//! - 呼び出しのたびに世代番号を進め、タイマーを張り直す
//! - 実行時の引数はバースト内で最後に渡された引数
//! - バースト内のすべての呼び出し元が、その 1 回の実行結果を受け取る

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use super::shared::{OutcomeSender, SharedOutcome};
use super::{operation_error, GateError, Operation};
use crate::sync::lock;

struct Burst<A, T, E> {
    args: A,
    tx: OutcomeSender<T, E>,
    outcome: SharedOutcome<T, E>,
    timer: JoinHandle<()>,
}

struct LimitState<A, T, E> {
    pending: Option<Burst<A, T, E>>,
    generation: u64,
}

type SharedState<A, T, E> = Arc<Mutex<LimitState<A, T, E>>>;

/// Collapses a burst of calls into one trailing execution.
///
/// Every call restarts a `ttl` timer; the operation runs once the timer elapses without a
/// further call. Dropping the gate cancels a pending burst, whose callers see
/// [`GateError::Aborted`].
pub struct Limit<A, O: Operation<A>>
where
    A: Send + 'static,
{
    op: Arc<O>,
    ttl: Duration,
    state: SharedState<A, O::Output, O::Error>,
}

impl<A, O> Limit<A, O>
where
    A: Send + 'static,
    O: Operation<A> + 'static,
    O::Output: Clone + Sync,
{
    pub fn new(op: O, ttl: Duration) -> Self {
        Self {
            op: Arc::new(op),
            ttl,
            state: Arc::new(Mutex::new(LimitState {
                pending: None,
                generation: 0,
            })),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn original(&self) -> &Arc<O> {
        &self.op
    }

    /// Is a burst waiting for its timer?
    pub fn is_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    /// Schedule a call without waiting for its outcome.
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger(&self, args: A) {
        let _ = self.schedule(args);
    }

    /// Discard the wrapper, cancelling any pending burst.
    pub fn restore(self) -> Arc<O> {
        Arc::clone(&self.op)
    }

    fn schedule(&self, args: A) -> SharedOutcome<O::Output, O::Error> {
        let mut state = lock(&self.state);
        state.generation = state.generation.wrapping_add(1);
        let timer = tokio::spawn(fire(
            Arc::clone(&self.state),
            Arc::clone(&self.op),
            self.ttl,
            state.generation,
        ));

        match state.pending.as_mut() {
            Some(burst) => {
                burst.args = args;
                std::mem::replace(&mut burst.timer, timer).abort();
                burst.outcome.clone()
            }
            None => {
                let (tx, outcome) = SharedOutcome::pending();
                state.pending = Some(Burst {
                    args,
                    tx,
                    outcome: outcome.clone(),
                    timer,
                });
                outcome
            }
        }
    }
}

async fn fire<A, O>(
    state: SharedState<A, O::Output, O::Error>,
    op: Arc<O>,
    ttl: Duration,
    generation: u64,
) where
    A: Send + 'static,
    O: Operation<A> + 'static,
    O::Output: Clone + Sync,
{
    time::sleep(ttl).await;

    let burst = {
        let mut state = lock(&state);
        if state.generation != generation {
            return;
        }
        state.pending.take()
    };
    let Some(burst) = burst else {
        return;
    };

    debug!(generation, "debounced call firing");
    let result = op.call(burst.args).await.map_err(operation_error);
    let _ = burst.tx.send(Some(result));
}

impl<A, O: Operation<A>> Drop for Limit<A, O>
where
    A: Send + 'static,
{
    fn drop(&mut self) {
        if let Some(burst) = lock(&self.state).pending.take() {
            burst.timer.abort();
        }
    }
}

#[async_trait]
impl<A, O> Operation<A> for Limit<A, O>
where
    A: Send + 'static,
    O: Operation<A> + 'static,
    O::Output: Clone + Sync,
{
    type Output = O::Output;
    type Error = GateError<O::Error>;

    async fn call(&self, args: A) -> Result<Self::Output, Self::Error> {
        self.schedule(args).wait().await
    }
}
