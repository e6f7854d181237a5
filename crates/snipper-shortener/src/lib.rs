//! URL shortener service implementation.
//!
//! This crate wires a storage backend, a short generator and the batch
//! delete queue into the [`Shortener`] façade. Core types are re-exported
//! from `snipper_core`.

pub mod service;

pub use service::ShortenerService;
pub use snipper_core::{BatchCreated, BatchItem, Record, ServiceStats, Shortener, ShortenerError};
