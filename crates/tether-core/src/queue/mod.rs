//! Queue - 永続リトライキュー
//!
//! # 設計原則
//! - 正本は TaskStore。キュー自身はタスクをメモリに保持しない
//! - 識別キーは (name, payload)。同じキーの add は既存レコードをリセットする
//! - 配信は at-least-once。consumer 側で冪等に処理すること
//!
//! # ライフサイクル
//! ```text
//! add ──> store ──> attempt ──(sweep: due)──> attempt ──> ...
//!                     │                          │
//!                 check_off                 attempts > max_retries
//!                     ▼                          ▼
//!                   done                        fail
//! ```

pub mod config;
pub mod notify;
pub mod retry;
pub mod task;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use self::config::SweepAction;
use self::notify::NotificationHub;
use crate::domain::{AbandonReason, EventKind, TaskRecord};
use crate::error::TetherError;
use crate::observability::{QueueCounts, SweepReport};
use crate::ports::{Clock, TaskStore};
use crate::sync::lock;

pub use self::config::{DelaySetting, QueueSettings, RetryQueueBuilder, RetryQueueConfig};
pub use self::notify::NotificationReceiver;
pub use self::retry::DelayPolicy;
pub use self::task::QueuedTask;

/// State shared by the queue, its sweeper and every task handle.
pub(crate) struct QueueShared {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) hub: NotificationHub,
    pub(crate) config: RetryQueueConfig,
}

struct SweepHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Durable retry queue.
///
/// Dropping the queue stops the periodic sweep.
pub struct RetryQueue {
    shared: Arc<QueueShared>,
    sweeper: Mutex<Option<SweepHandle>>,
}

impl RetryQueue {
    pub fn builder() -> RetryQueueBuilder {
        RetryQueueBuilder::new()
    }

    pub(crate) fn from_parts(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        config: RetryQueueConfig,
    ) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                store,
                clock,
                hub: NotificationHub::default(),
                config,
            }),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RetryQueueConfig {
        &self.shared.config
    }

    /// Wait before the next attempt of a task with `attempts` attempts. Zero for a fresh task.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        self.shared.config.delay.delay_for(attempts)
    }

    /// Receive `<name>-<kind>` notifications.
    pub fn subscribe(&self, kind: EventKind, name: &str) -> NotificationReceiver {
        self.shared.hub.subscribe(kind, name)
    }

    /// Persist a fresh task (replacing any record with the same key) and attempt it once.
    pub async fn add(
        &self,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<QueuedTask, TetherError> {
        let mut task = QueuedTask::new(TaskRecord::new(name, payload), Arc::clone(&self.shared));
        task.store().await?;
        task.attempt().await?;
        Ok(task)
    }

    /// Handles for every persisted task, in store order.
    pub async fn tasks(&self) -> Result<Vec<QueuedTask>, TetherError> {
        let records = self.shared.store.find_all().await?;
        Ok(records
            .into_iter()
            .map(|record| QueuedTask::new(record, Arc::clone(&self.shared)))
            .collect())
    }

    /// Run one sweep now: abandon exhausted tasks, re-attempt due ones.
    pub async fn process(&self) -> Result<SweepReport, TetherError> {
        sweep(&self.shared).await
    }

    /// Sweep every `process_interval`, replacing any schedule already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let join = tokio::spawn(sweep_loop(shared, shutdown_rx));

        let previous = lock(&self.sweeper).replace(SweepHandle { shutdown_tx, join });
        if let Some(previous) = previous {
            // ignore send error: the loop may already be gone
            let _ = previous.shutdown_tx.send(true);
            debug!("replaced running sweep schedule");
        }
        info!(
            interval_ms = self.shared.config.process_interval.as_millis() as u64,
            "sweep schedule started"
        );
    }

    /// Stop the periodic sweep. A sweep already in progress runs to completion.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.sweeper).take() {
            let _ = handle.shutdown_tx.send(true);
            info!("sweep schedule stopped");
        }
    }

    /// Stop and wait for the sweep loop to exit.
    pub async fn stop_and_join(&self) {
        let handle = lock(&self.sweeper).take();
        if let Some(handle) = handle {
            let _ = handle.shutdown_tx.send(true);
            let _ = handle.join.await;
            info!("sweep schedule stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.sweeper)
            .as_ref()
            .is_some_and(|handle| !handle.join.is_finished())
    }

    /// Delete every persisted task without notifying anyone.
    pub async fn clear(&self) -> Result<(), TetherError> {
        self.shared.store.delete_everything().await?;
        warn!("queue cleared");
        Ok(())
    }

    /// What a sweep would do right now, without doing it.
    pub async fn counts(&self) -> Result<QueueCounts, TetherError> {
        let now = self.shared.clock.now();
        let records = self.shared.store.find_all().await?;
        let mut counts = QueueCounts {
            pending: records.len(),
            ..QueueCounts::default()
        };
        for record in &records {
            match self.shared.config.evaluate(record, now) {
                Some(SweepAction::Attempt) => counts.due += 1,
                Some(SweepAction::Abandon) => counts.exhausted += 1,
                None => {}
            }
        }
        Ok(counts)
    }
}

impl std::fmt::Debug for RetryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryQueue")
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for RetryQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(shared: Arc<QueueShared>, mut shutdown_rx: watch::Receiver<bool>) {
    let period = shared.config.process_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    // sweeps never overlap; a slow sweep pushes the next tick back
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        match sweep(&shared).await {
            Ok(report) if report.is_idle() => debug!(?report, "sweep finished"),
            Ok(report) => info!(?report, "sweep finished"),
            Err(e) => error!(error = %e, "sweep failed to load tasks"),
        }
    }
}

/// One pass over the store.
///
/// `now` is read once, so every record is judged against the same instant. The n-th
/// record's action is delayed by `spread * n`. A failing item is logged and counted;
/// it never stops the rest of the sweep.
async fn sweep(shared: &Arc<QueueShared>) -> Result<SweepReport, TetherError> {
    let now = shared.clock.now();
    let records = shared.store.find_all().await?;
    let max_retries = shared.config.max_retries;

    let mut report = SweepReport {
        inspected: records.len(),
        ..SweepReport::default()
    };
    let mut items = JoinSet::new();

    for (index, record) in records.into_iter().enumerate() {
        let Some(action) = shared.config.evaluate(&record, now) else {
            report.waiting += 1;
            continue;
        };
        let stagger = shared.config.stagger(index);
        let mut task = QueuedTask::new(record, Arc::clone(shared));

        items.spawn(async move {
            if !stagger.is_zero() {
                time::sleep(stagger).await;
            }
            let result = match action {
                SweepAction::Attempt => task.attempt().await,
                SweepAction::Abandon => {
                    let reason = AbandonReason::Exhausted {
                        attempts: task.attempts(),
                        max_retries,
                    };
                    task.abandon(reason).await
                }
            };
            (action, task.name().to_string(), result)
        });
    }

    while let Some(joined) = items.join_next().await {
        match joined {
            Ok((SweepAction::Attempt, _, Ok(()))) => report.attempted += 1,
            Ok((SweepAction::Abandon, _, Ok(()))) => report.abandoned += 1,
            Ok((action, name, Err(e))) => {
                warn!(task = %name, ?action, error = %e, "sweep item failed");
                report.failed += 1;
            }
            Err(e) => {
                error!(error = %e, "sweep item panicked");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}
