use crate::error::ShortenerError;
use crate::record::{Record, ServiceStats};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

type Result<T> = std::result::Result<T, ShortenerError>;

/// One URL of a bulk create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Caller-chosen id echoed back in the response.
    pub correlation_id: String,
    /// The original URL to be shortened.
    pub original_url: String,
}

/// The result of shortening one [`BatchItem`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCreated {
    pub correlation_id: String,
    pub record: Record,
}

/// Operations request handlers (HTTP or RPC) invoke on the shortener core.
#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Shortens `full_url` for `user_id`.
    ///
    /// Returns `Err(Conflict)` with the existing record when the URL is
    /// already shortened.
    async fn create_record(&self, full_url: &str, user_id: &str) -> Result<Record>;

    /// Shortens every item in one multi-row write.
    async fn create_batch(&self, items: Vec<BatchItem>, user_id: &str)
        -> Result<Vec<BatchCreated>>;

    /// Resolves a short to its record.
    ///
    /// Returns `Err(Gone)` for a soft-deleted record and `Err(NotFound)` for
    /// an unknown short.
    async fn resolve(&self, short: &str) -> Result<Record>;

    /// Lists the live records owned by `user_id`.
    async fn records_for_user(&self, user_id: &str) -> Result<Vec<Record>>;

    /// Schedules deletion of `shorts` on behalf of `user_id`.
    ///
    /// Acceptance is immediate and unconditional; the deletion is applied
    /// later and failures never reach the caller.
    fn queue_delete(&self, shorts: Vec<String>, user_id: &str);

    /// Checks that the storage backend is reachable.
    async fn ping(&self) -> Result<()>;

    /// Aggregate counters over live records.
    async fn stats(&self) -> Result<ServiceStats>;
}
