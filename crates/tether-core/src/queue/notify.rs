//! Lifecycle notifications, keyed by `(EventKind, task name)`.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::trace;

use super::task::QueuedTask;
use crate::domain::EventKind;
use crate::sync::lock;

/// Receiving end of a subscription.
pub type NotificationReceiver = mpsc::UnboundedReceiver<QueuedTask>;

/// Per-queue notification fan-out.
#[derive(Debug, Default)]
pub(crate) struct NotificationHub {
    channels: Mutex<HashMap<(EventKind, String), Vec<mpsc::UnboundedSender<QueuedTask>>>>,
}

impl NotificationHub {
    pub(crate) fn subscribe(&self, kind: EventKind, name: &str) -> NotificationReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.channels)
            .entry((kind, name.to_string()))
            .or_default()
            .push(tx);
        rx
    }

    /// Deliver `task` to every live subscriber. Returns the number of deliveries.
    ///
    /// Dropped receivers are pruned here.
    pub(crate) fn emit(&self, kind: EventKind, task: &QueuedTask) -> usize {
        let mut channels = lock(&self.channels);
        let Some(senders) = channels.get_mut(&(kind, task.name().to_string())) else {
            return 0;
        };
        senders.retain(|tx| tx.send(task.clone()).is_ok());
        let delivered = senders.len();
        trace!(topic = %kind.topic(task.name()), delivered, "notification emitted");
        if senders.is_empty() {
            channels.remove(&(kind, task.name().to_string()));
        }
        delivered
    }
}
