//! Core types and traits for the Snipper URL shortener.
//!
//! This crate holds the record model, the storage capability contract shared
//! by every backend, and the shortener façade that request handlers call.

pub mod error;
pub mod record;
pub mod shortener;
pub mod storage;

pub use error::{ShortenerError, StorageError};
pub use record::{Record, ServiceStats};
pub use shortener::{BatchCreated, BatchItem, Shortener};
pub use storage::Storage;
