//! JsonFileTaskStore - JSON ファイルに永続化するタスクストア
//!
//! # 実装詳細
//! - open 時にファイル全体を読み込む（存在しなければ空、0 バイトなら破損として拒否）
//! - 変更のたびにファイル全体を書き直す（一時ファイル → sync → rename → ディレクトリ sync）
//! - 書き込みに失敗した変更はメモリにも反映しない

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use ulid::Ulid;

use super::memory_store::{delete_in, update_in, upsert_in};
use crate::domain::{TaskKey, TaskRecord};
use crate::ports::{StoreError, TaskStore};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    tasks: Vec<TaskRecord>,
}

/// File-backed store; survives process restarts.
///
/// Suitable for a single process. Concurrent writers on the same file are not coordinated.
#[derive(Debug)]
pub struct JsonFileTaskStore {
    path: PathBuf,
    records: Mutex<Vec<TaskRecord>>,
}

impl JsonFileTaskStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file is an empty store. An existing file with no content is never written
    /// by this store, so it is reported as corruption.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => {
                return Err(StoreError::Backend(format!(
                    "task store {} is empty (torn write?)",
                    path.display()
                )));
            }
            Ok(text) => {
                let doc: StoreDocument = serde_json::from_str(&text)?;
                if doc.version != FORMAT_VERSION {
                    return Err(StoreError::Backend(format!(
                        "unsupported store format version {} in {}",
                        doc.version,
                        path.display()
                    )));
                }
                doc.tasks
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), tasks = records.len(), "opened task store");

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the full document next to the target, then swap it in.
    ///
    /// The temp file is synced before the rename and the directory after it, so the
    /// target is either the old document or the new one, never a partial write.
    async fn persist(&self, records: &[TaskRecord]) -> Result<(), StoreError> {
        let doc = StoreDocument {
            version: FORMAT_VERSION,
            tasks: records.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(format!(".{}.tmp", Ulid::new()));
        let tmp = PathBuf::from(tmp);

        if let Err(e) = write_synced(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        // the new document is in place; memory must follow it even if this fails
        if let Err(e) = sync_parent_dir(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "directory sync failed");
        }
        Ok(())
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Make the rename itself durable.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl TaskStore for JsonFileTaskStore {
    async fn find_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self.records.lock().await.clone())
    }

    async fn upsert(&self, key: &TaskKey, record: TaskRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        upsert_in(&mut next, key, record);
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn atomic_update(
        &self,
        key: &TaskKey,
        at: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        let Some(updated) = update_in(&mut next, key, at) else {
            return Ok(None);
        };
        self.persist(&next).await?;
        *records = next;
        Ok(Some(updated))
    }

    async fn delete(&self, key: &TaskKey) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        if !delete_in(&mut next, key) {
            return Ok(false);
        }
        self.persist(&next).await?;
        *records = next;
        Ok(true)
    }

    async fn delete_everything(&self) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        self.persist(&[]).await?;
        records.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("tether-store-{}.json", Ulid::new()))
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let path = temp_path();
        let key = TaskKey::new("sync", json!({"id": 42}));
        {
            let store = JsonFileTaskStore::open(&path).await.unwrap();
            store
                .upsert(&key, TaskRecord::new("sync", json!({"id": 42})))
                .await
                .unwrap();
            store.atomic_update(&key, Utc::now()).await.unwrap();
        }

        let reopened = JsonFileTaskStore::open(&path).await.unwrap();
        let records = reopened.find_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attempts, 1);
        assert!(records[0].last_attempt_at.is_some());

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let store = JsonFileTaskStore::open(temp_path()).await.unwrap();
        assert!(store.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_everything_truncates_file() {
        let path = temp_path();
        let store = JsonFileTaskStore::open(&path).await.unwrap();
        let key = TaskKey::new("sync", json!(1));
        store
            .upsert(&key, TaskRecord::new("sync", json!(1)))
            .await
            .unwrap();

        store.delete_everything().await.unwrap();
        assert!(!store.delete(&key).await.unwrap());

        let reopened = JsonFileTaskStore::open(&path).await.unwrap();
        assert!(reopened.find_all().await.unwrap().is_empty());

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn zero_length_file_is_corruption() {
        let path = temp_path();
        tokio::fs::write(&path, "").await.unwrap();

        let err = JsonFileTaskStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("empty")));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn persist_leaves_no_temp_files_behind() {
        let dir = std::env::temp_dir().join(format!("tether-store-dir-{}", Ulid::new()));
        tokio::fs::create_dir(&dir).await.unwrap();
        let path = dir.join("queue.json");

        let store = JsonFileTaskStore::open(&path).await.unwrap();
        let key = TaskKey::new("sync", json!(1));
        store
            .upsert(&key, TaskRecord::new("sync", json!(1)))
            .await
            .unwrap();
        store.atomic_update(&key, Utc::now()).await.unwrap();

        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names, vec![std::ffi::OsString::from("queue.json")]);

        let reopened = JsonFileTaskStore::open(&path).await.unwrap();
        assert_eq!(reopened.find_all().await.unwrap()[0].attempts, 1);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_unknown_format_version() {
        let path = temp_path();
        tokio::fs::write(&path, r#"{"version": 99, "tasks": []}"#)
            .await
            .unwrap();

        let err = JsonFileTaskStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
