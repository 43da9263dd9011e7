//! Outcome of one execution, observable by any number of callers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use tokio::time::Instant;

use super::key::CallKey;
use super::GateError;
use crate::sync::lock;

pub(crate) type Outcome<T, E> = Result<T, GateError<E>>;

pub(crate) type OutcomeSender<T, E> = watch::Sender<Option<Outcome<T, E>>>;

pub(crate) struct SharedOutcome<T, E> {
    rx: watch::Receiver<Option<Outcome<T, E>>>,
}

impl<T, E> Clone for SharedOutcome<T, E> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T, E> SharedOutcome<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// An outcome settled later through the returned sender.
    ///
    /// Dropping the sender unsettled aborts every waiter.
    pub(crate) fn pending() -> (OutcomeSender<T, E>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx })
    }

    /// Run `fut` on its own task. It keeps running even if every waiter goes away.
    pub(crate) fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        let (tx, outcome) = Self::pending();
        tokio::spawn(async move {
            let _ = tx.send(Some(fut.await));
        });
        outcome
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub(crate) async fn wait(mut self) -> Outcome<T, E> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(settled) => (*settled).clone().unwrap_or(Err(GateError::Aborted)),
            Err(_) => Err(GateError::Aborted),
        }
    }
}

/// One keyed execution and when it started.
pub(crate) struct Slot<T, E> {
    /// Distinguishes a slot from a later one under the same key.
    pub(crate) id: u64,
    pub(crate) started_at: Instant,
    pub(crate) outcome: SharedOutcome<T, E>,
}

pub(crate) type SlotMap<T, E> = HashMap<CallKey, Slot<T, E>>;

pub(crate) type SharedSlots<T, E> = Arc<Mutex<SlotMap<T, E>>>;

/// Removes slot `id` under `key` when dropped, unless a newer slot has replaced it.
///
/// Holds the map weakly; once the gate is gone there is nothing to clean up.
pub(crate) struct SlotGuard<T, E> {
    slots: Weak<Mutex<SlotMap<T, E>>>,
    key: CallKey,
    id: u64,
}

impl<T, E> SlotGuard<T, E> {
    pub(crate) fn new(slots: &SharedSlots<T, E>, key: CallKey, id: u64) -> Self {
        Self {
            slots: Arc::downgrade(slots),
            key,
            id,
        }
    }
}

impl<T, E> Drop for SlotGuard<T, E> {
    fn drop(&mut self) {
        let Some(slots) = self.slots.upgrade() else {
            return;
        };
        let mut slots = lock(&slots);
        if slots.get(&self.key).is_some_and(|slot| slot.id == self.id) {
            slots.remove(&self.key);
        }
    }
}
