//! Storage backends and batching helpers for the Snipper URL shortener.
//!
//! Three interchangeable [`Storage`] implementations live here, along with
//! the [`BatchInserter`] used by bulk creates and the [`BatchDeleter`]
//! background worker that coalesces delete requests per owner.

pub mod deleter;
pub mod file;
mod index;
pub mod inserter;
pub mod memory;
pub mod postgres;

pub use deleter::{BatchDeleter, DeleteQueue, DeleteQueueConfig, DeleteTask};
pub use file::FileStorage;
pub use inserter::BatchInserter;
pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;
pub use snipper_core::error::Result;
pub use snipper_core::{Record, ServiceStats, Storage, StorageError};
