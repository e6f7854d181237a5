use crate::index::RecordIndex;
use async_trait::async_trait;
use parking_lot::RwLock;
use snipper_core::error::Result;
use snipper_core::{Record, ServiceStats, Storage};

/// In-memory implementation of the [`Storage`] trait.
///
/// Both the record map and the URL index sit behind one lock so that the
/// duplicate-URL check and the insert happen atomically.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    index: RwLock<RecordIndex>,
}

impl InMemoryStorage {
    /// Creates an empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory storage pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            index: RwLock::new(RecordIndex::restore(records)),
        }
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn store(&self, record: Record) -> Result<()> {
        self.index.write().insert(record)
    }

    async fn store_batch(&self, records: Vec<Record>) -> Result<()> {
        self.index.write().insert_all(records)
    }

    async fn load(&self, short: &str) -> Result<Record> {
        self.index.read().get(short)
    }

    async fn load_batch(&self, shorts: &[String]) -> Result<Vec<Record>> {
        Ok(self.index.read().live_among(shorts))
    }

    async fn load_for_user(&self, user_id: &str) -> Result<Vec<Record>> {
        Ok(self.index.read().live_for_user(user_id))
    }

    async fn delete(&self, short: &str) -> Result<()> {
        self.index.write().mark_deleted(short)
    }

    async fn delete_batch(&self, shorts: &[String]) -> Result<()> {
        self.index.write().mark_deleted_all(shorts);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> Result<ServiceStats> {
        Ok(self.index.read().stats())
    }
}
