use crate::index::RecordIndex;
use async_trait::async_trait;
use snipper_core::error::Result;
use snipper_core::{Record, ServiceStats, Storage, StorageError};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// JSON-lines file implementation of the [`Storage`] trait.
///
/// The whole file is read into memory on open. Every mutation is applied to
/// a copy of the in-memory state, the copy is written out in full, and only
/// then does it replace the live state, so a failed write leaves both the
/// file and the process view unchanged.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    index: Mutex<RecordIndex>,
}

impl FileStorage {
    /// Opens the storage at `path`, creating an empty file if none exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let index = RecordIndex::restore(read_records(&path).await?);
        debug!(path = %path.display(), "opened file storage");

        Ok(Self {
            path,
            index: Mutex::new(index),
        })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn mutate<T>(&self, apply: impl FnOnce(&mut RecordIndex) -> Result<T>) -> Result<T> {
        let mut index = self.index.lock().await;
        let mut next = index.clone();
        let output = apply(&mut next)?;
        write_records(&self.path, &next).await?;
        *index = next;
        Ok(output)
    }
}

async fn read_records(path: &Path) -> Result<Vec<Record>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::write(path, b"").await?;
            return Ok(Vec::new());
        }
        Err(err) => return Err(err.into()),
    };

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str(line).map_err(|e| {
                StorageError::InvalidData(format!(
                    "{}:{}: {e}",
                    path.display(),
                    number + 1
                ))
            })
        })
        .collect()
}

async fn write_records(path: &Path, index: &RecordIndex) -> Result<()> {
    let mut buffer = Vec::new();
    for record in index.records() {
        serde_json::to_writer(&mut buffer, record)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        buffer.push(b'\n');
    }

    let staging = staging_path(path);
    tokio::fs::write(&staging, &buffer).await?;
    tokio::fs::rename(&staging, path).await?;
    trace!(path = %path.display(), bytes = buffer.len(), "rewrote storage file");
    Ok(())
}

/// Sibling file the next state is written to before it replaces `path`.
fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    PathBuf::from(staging)
}

#[async_trait]
impl Storage for FileStorage {
    async fn store(&self, record: Record) -> Result<()> {
        self.mutate(|index| index.insert(record)).await
    }

    async fn store_batch(&self, records: Vec<Record>) -> Result<()> {
        self.mutate(|index| index.insert_all(records)).await
    }

    async fn load(&self, short: &str) -> Result<Record> {
        self.index.lock().await.get(short)
    }

    async fn load_batch(&self, shorts: &[String]) -> Result<Vec<Record>> {
        Ok(self.index.lock().await.live_among(shorts))
    }

    async fn load_for_user(&self, user_id: &str) -> Result<Vec<Record>> {
        Ok(self.index.lock().await.live_for_user(user_id))
    }

    async fn delete(&self, short: &str) -> Result<()> {
        self.mutate(|index| index.mark_deleted(short)).await
    }

    async fn delete_batch(&self, shorts: &[String]) -> Result<()> {
        self.mutate(|index| Ok(index.mark_deleted_all(shorts)))
            .await
            .map(|_| ())
    }

    async fn ping(&self) -> Result<()> {
        tokio::fs::metadata(&self.path).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<ServiceStats> {
        Ok(self.index.lock().await.stats())
    }
}
