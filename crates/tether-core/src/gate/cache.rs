//! Cache - 同じ引数の結果を ttl の間再利用するゲート
//!
//! 成功も失敗も同じようにキャッシュします（ttl 内に失敗した操作を呼び直さない）。
//! ttl は最初の呼び出し時点から数え、期限が来たスロットはタイマーで外します。

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{self, Instant};
use tracing::trace;

use super::key::CallKey;
use super::shared::{SharedOutcome, SharedSlots, Slot, SlotGuard};
use super::{operation_error, GateError, Operation};
use crate::sync::lock;

pub const DEFAULT_TTL: Duration = Duration::from_millis(1000);

/// TTL memoization keyed by canonical arguments.
pub struct Cache<A, O: Operation<A>>
where
    A: Send + 'static,
{
    op: Arc<O>,
    ttl: Duration,
    slots: SharedSlots<O::Output, O::Error>,
    next_id: AtomicU64,
    _args: PhantomData<fn(A)>,
}

impl<A, O> Cache<A, O>
where
    A: Send + 'static,
    O: Operation<A> + 'static,
{
    pub fn new(op: O) -> Self {
        Self::with_ttl(op, DEFAULT_TTL)
    }

    pub fn with_ttl(op: O, ttl: Duration) -> Self {
        Self {
            op: Arc::new(op),
            ttl,
            slots: Arc::default(),
            next_id: AtomicU64::new(0),
            _args: PhantomData,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn original(&self) -> &Arc<O> {
        &self.op
    }

    pub fn restore(self) -> Arc<O> {
        self.op
    }

    /// Keys with a cached or running execution.
    pub fn cached(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Drop every cached outcome now.
    pub fn invalidate_all(&self) {
        lock(&self.slots).clear();
    }
}

#[async_trait]
impl<A, O> Operation<A> for Cache<A, O>
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
            let ttl = self.ttl;
            slots.retain(|_, slot| now.duration_since(slot.started_at) < ttl);

            match slots.get(&key) {
                Some(slot) => {
                    trace!(key = %key, "cache hit");
                    slot.outcome.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let guard = SlotGuard::new(&self.slots, key.clone(), id);
                    tokio::spawn(async move {
                        time::sleep(ttl).await;
                        drop(guard);
                    });

                    let op = Arc::clone(&self.op);
                    let outcome = SharedOutcome::spawn(async move {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::collate::tests::SlowFetch;
    use serde_json::json;
    use tokio::task::JoinSet;

    #[tokio::test(start_paused = true)]
    async fn calls_within_ttl_execute_once() {
        let fetch = SlowFetch::new(Duration::from_millis(10));
        let calls = fetch.counter();
        let gate = Cache::with_ttl(fetch, Duration::from_millis(200));

        let first = gate.call(json!({"id": 1})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = gate.call(json!({"id": 1})).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_within_ttl_share_one_execution() {
        let fetch = SlowFetch::new(Duration::from_millis(100));
        let calls = fetch.counter();
        let gate = Arc::new(Cache::new(fetch));

        let mut set = JoinSet::new();
        for _ in 0..5 {
            let gate = Arc::clone(&gate);
            set.spawn(async move { gate.call(json!({"id": 1})).await });
        }
        let outcomes: Vec<_> = set
            .join_all()
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcomes.iter().all(|o| Arc::ptr_eq(o, &outcomes[0])));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_cache_releases_outcome_after_ttl() {
        let fetch = SlowFetch::new(Duration::from_millis(10));
        let gate = Cache::with_ttl(fetch, Duration::from_millis(200));

        let value = gate.call(json!({"id": 1})).await.unwrap();
        assert_eq!(gate.cached(), 1);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(gate.cached(), 0);
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_keeps_newer_slot() {
        let fetch = SlowFetch::new(Duration::from_millis(10));
        let calls = fetch.counter();
        let gate = Cache::with_ttl(fetch, Duration::from_millis(200));

        gate.call(json!(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        gate.invalidate_all();
        gate.call(json!(1)).await.unwrap();

        // first slot's timer fires here
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(gate.cached(), 1);
        gate.call(json!(1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn call_after_ttl_executes_again() {
        let fetch = SlowFetch::new(Duration::from_millis(10));
        let calls = fetch.counter();
        let gate = Cache::with_ttl(fetch, Duration::from_millis(200));

        let first = gate.call(json!({"id": 1})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let second = gate.call(json!({"id": 1})).await.unwrap();
        let third = gate.call(json!({"id": 1})).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_cached_too() {
        let fetch = SlowFetch::new(Duration::from_millis(10));
        let calls = fetch.counter();
        let gate = Cache::new(fetch);

        let first = gate.call(json!("fail")).await.unwrap_err();
        let second = gate.call(json!("fail")).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.operation(), first.operation());
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_arguments_are_cached_separately() {
        let fetch = SlowFetch::new(Duration::from_millis(10));
        let calls = fetch.counter();
        let gate = Cache::new(fetch);

        gate.call(json!(1)).await.unwrap();
        gate.call(json!(2)).await.unwrap();
        gate.call(json!(1)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_all_forces_a_new_execution() {
        let fetch = SlowFetch::new(Duration::from_millis(10));
        let calls = fetch.counter();
        let gate = Cache::new(fetch);

        gate.call(json!(1)).await.unwrap();
        gate.invalidate_all();
        gate.call(json!(1)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gate.ttl(), DEFAULT_TTL);
    }
}
