use serde::Deserialize;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::task::JoinSet;
use tokio::time::{Duration, sleep, timeout};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tether_core::{
    Collate, EventKind, JsonFileTaskStore, NotificationReceiver, Operation, QueueSettings,
    RetryQueue,
};

const DEMO_SETTINGS: &str =
    r#"{"delay_ms": [200, 400, 800], "spread_ms": 50, "process_interval_ms": 100}"#;

#[derive(Debug, Deserialize)]
struct SyncPayload {
    repo: String,
    issue: u64,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

async fn load_settings(path: Option<&str>) -> Result<QueueSettings, Box<dyn Error>> {
    let text = match path {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => DEMO_SETTINGS.to_string(),
    };
    Ok(QueueSettings::from_json_str(&text)?)
}

/// consumer：attempt 通知を受けて実際の作業をする
/// 最初の `failures` 回はわざと失敗し、sweep による再試行に任せる
async fn consume(mut attempts: NotificationReceiver, mut failures: u32) {
    while let Some(mut task) = attempts.recv().await {
        let payload: SyncPayload = match serde_json::from_value(task.payload().clone()) {
            Ok(p) => p,
            Err(e) => {
                if let Err(e) = task.abandon(format!("json decode: {e}")).await {
                    warn!(error = %e, "abandon failed");
                }
                continue;
            }
        };

        if failures > 0 {
            failures -= 1;
            warn!(
                repo = %payload.repo,
                attempts = task.attempts(),
                "intentional failure, leaving it to the sweep"
            );
            continue;
        }

        info!(repo = %payload.repo, issue = payload.issue, "synced");
        if let Err(e) = task.check_off().await {
            warn!(error = %e, "check_off failed");
        }
    }
}

/// 5 つの同時呼び出しが 1 回の lookup にまとまることを見せる
async fn collate_demo() -> Result<(), Box<dyn Error>> {
    let lookups = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&lookups);
    let gate = Arc::new(Collate::new(move |repo: String| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(100)).await;
            Ok::<_, std::io::Error>(format!("metadata for {repo}"))
        }
    }));

    let mut callers = JoinSet::new();
    for _ in 0..5 {
        let gate = Arc::clone(&gate);
        callers.spawn(async move { gate.call("tether".to_string()).await });
    }
    while let Some(joined) = callers.join_next().await {
        joined??;
    }

    info!(
        callers = 5,
        executions = lookups.load(Ordering::SeqCst),
        "collate demo finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let store_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("tether-demo-queue.json"));
    let settings = load_settings(args.next().as_deref()).await?;

    // (A) store と queue を用意（前回の実行で残ったタスクもここから再開される）
    let store = Arc::new(JsonFileTaskStore::open(&store_path).await?);
    let queue = RetryQueue::builder().store(store).settings(settings).build()?;
    let resumed = queue.counts().await?;
    info!(
        path = %store_path.display(),
        pending = resumed.pending,
        "queue opened"
    );

    // (B) consumer を起動
    let consumer = tokio::spawn(consume(queue.subscribe(EventKind::Attempt, "sync"), 2));
    let mut done = queue.subscribe(EventKind::Done, "sync");
    let mut failed = queue.subscribe(EventKind::Fail, "sync");

    // (C) sweep を開始してタスク投入
    queue.start();
    let task = queue
        .add("sync", serde_json::json!({ "repo": "tether", "issue": 42 }))
        .await?;
    info!(task = %task.name(), "task added");

    // (D) done / fail のどちらかを待つ
    let finished = timeout(Duration::from_secs(10), async {
        tokio::select! {
            Some(task) = done.recv() => format!("done after {} attempts", task.attempts()),
            Some(task) = failed.recv() => format!(
                "abandoned: {}",
                task.reason().map(ToString::to_string).unwrap_or_default()
            ),
            else => "notification channels closed".to_string(),
        }
    })
    .await;
    match finished {
        Ok(outcome) => info!(%outcome, "task finished"),
        Err(_) => warn!("gave up waiting for the task"),
    }
    let counts = queue.counts().await?;
    info!(?counts, "final counts");

    // (E) サンプルなので consumer を止める
    queue.stop_and_join().await;
    consumer.abort();

    collate_demo().await
}
