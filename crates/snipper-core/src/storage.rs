use crate::error::Result;
use crate::record::{Record, ServiceStats};
use async_trait::async_trait;

/// The capability contract every persistence backend satisfies.
///
/// Backends are called concurrently from request handlers and from the
/// batch delete worker, so each implementation guards its own state.
/// Deletion is always soft: records are flagged, never removed.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Inserts a new record.
    ///
    /// Returns `Err(Conflict)` carrying the existing record when a live
    /// record with the same `full` URL is already stored.
    /// Returns `Err(DuplicateShort)` when the short belongs to another record.
    async fn store(&self, record: Record) -> Result<()>;

    /// Inserts all records or none of them.
    async fn store_batch(&self, records: Vec<Record>) -> Result<()>;

    /// Loads a record by short, including soft-deleted ones.
    /// Returns `Err(NotFound)` if the short was never stored.
    async fn load(&self, short: &str) -> Result<Record>;

    /// Loads the live records among `shorts`. Unknown shorts are skipped.
    async fn load_batch(&self, shorts: &[String]) -> Result<Vec<Record>>;

    /// Loads every live record owned by `user_id`.
    async fn load_for_user(&self, user_id: &str) -> Result<Vec<Record>>;

    /// Marks a single record as deleted.
    /// Returns `Err(NotFound)` if the short was never stored.
    async fn delete(&self, short: &str) -> Result<()>;

    /// Marks every known record among `shorts` as deleted.
    /// Unknown shorts are ignored.
    async fn delete_batch(&self, shorts: &[String]) -> Result<()>;

    /// Liveness check without side effects.
    async fn ping(&self) -> Result<()>;

    /// Counts live records and their distinct owners.
    async fn stats(&self) -> Result<ServiceStats>;
}
