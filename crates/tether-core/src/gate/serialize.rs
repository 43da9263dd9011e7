//! Serialize - 提出順に 1 つずつ実行するゲート
//!
//! # 実装詳細
//! - レーン（SerialLane）は 1 本のワーカータスクと unbounded mpsc で構成
//! - 各呼び出しはジョブとしてキューに積まれ、前のジョブが終わってから実行される
//! - ジョブは個別の tokio タスクで実行するので、失敗や panic はレーンを止めない
//! - 1 本のレーンを複数の操作で共有すると、操作をまたいで全順序になる

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::{operation_error, BoxFuture, GateError, Operation};

type Job = BoxFuture<'static, ()>;

struct LaneInner {
    tx: mpsc::UnboundedSender<Job>,
    worker: JoinHandle<()>,
}

impl Drop for LaneInner {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// A single execution chain. Clones share the chain.
///
/// The worker stops when the last clone (and every wrapper using it) is dropped.
#[derive(Clone)]
pub struct SerialLane {
    inner: Arc<LaneInner>,
}

impl SerialLane {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_lane(rx));
        Self {
            inner: Arc::new(LaneInner { tx, worker }),
        }
    }

    /// Wrap `op` so its calls are ordered on this lane.
    pub fn wrap<A, O>(&self, op: O) -> Serialize<A, O>
    where
        A: Send + 'static,
        O: Operation<A> + 'static,
    {
        Serialize {
            op: Arc::new(op),
            lane: self.clone(),
            open: Arc::new(AtomicBool::new(true)),
            _args: PhantomData,
        }
    }
}

impl fmt::Debug for SerialLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialLane")
            .field("running", &!self.inner.worker.is_finished())
            .finish()
    }
}

async fn run_lane(mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        if let Err(e) = tokio::spawn(job).await {
            error!(error = %e, "serialized call panicked");
        }
    }
}

/// Runs calls one at a time, in submission order.
///
/// Completion order equals submission order regardless of how long each call takes.
/// [`Serialize::submit`] enqueues immediately; [`Operation::call`] enqueues when first polled.
pub struct Serialize<A, O> {
    op: Arc<O>,
    lane: SerialLane,
    open: Arc<AtomicBool>,
    _args: PhantomData<fn(A)>,
}

impl<A, O> Serialize<A, O>
where
    A: Send + 'static,
    O: Operation<A> + 'static,
    O::Error: fmt::Display,
{
    /// Wrap `op` on a private lane. Must be called from within a tokio runtime.
    pub fn new(op: O) -> Self {
        SerialLane::new().wrap(op)
    }

    pub fn lane(&self) -> &SerialLane {
        &self.lane
    }

    pub fn original(&self) -> &Arc<O> {
        &self.op
    }

    /// Queue one call and return its eventual result.
    pub fn submit(&self, args: A) -> BoxFuture<'static, Result<O::Output, GateError<O::Error>>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let op = Arc::clone(&self.op);
        let open = Arc::clone(&self.open);

        let job: Job = Box::pin(async move {
            if !open.load(Ordering::Acquire) {
                return;
            }
            let result = op.call(args).await;
            if let Err(e) = &result {
                warn!(error = %e, "serialized call failed");
            }
            let _ = reply_tx.send(result.map_err(operation_error));
        });
        // a closed lane drops the job, and with it the reply sender
        let _ = self.lane.inner.tx.send(job);

        Box::pin(async move { reply_rx.await.unwrap_or(Err(GateError::Aborted)) })
    }

    /// Discard the wrapper and get the original operation back.
    ///
    /// Calls still waiting in the lane are abandoned; their callers see [`GateError::Aborted`].
    /// A call already running finishes normally.
    pub fn restore(self) -> Arc<O> {
        Arc::clone(&self.op)
    }
}

impl<A, O> Drop for Serialize<A, O> {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
    }
}

#[async_trait]
impl<A, O> Operation<A> for Serialize<A, O>
where
    A: Send + 'static,
    O: Operation<A> + 'static,
    O::Error: fmt::Display,
{
    type Output = O::Output;
    type Error = GateError<O::Error>;

    async fn call(&self, args: A) -> Result<Self::Output, Self::Error> {
        self.submit(args).await
    }
}
