use snipper_core::error::Result;
use snipper_core::{Record, Storage};
use tracing::trace;

/// Default number of records written per multi-row insert.
pub const DEFAULT_CAPACITY: usize = 10;

/// Accumulates records and writes them with one [`Storage::store_batch`] call
/// whenever the buffer fills up or [`flush`](Self::flush) is called.
///
/// A buffer belongs to a single bulk request; the `&mut self` API keeps it
/// off shared paths.
#[derive(Debug)]
pub struct BatchInserter<'a, S: ?Sized> {
    storage: &'a S,
    capacity: usize,
    buffer: Vec<Record>,
}

impl<'a, S: Storage + ?Sized> BatchInserter<'a, S> {
    /// Creates a buffer that flushes every `capacity` records.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(storage: &'a S, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            storage,
            capacity,
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Creates a buffer with [`DEFAULT_CAPACITY`].
    pub fn with_default_capacity(storage: &'a S) -> Self {
        Self::new(storage, DEFAULT_CAPACITY)
    }

    /// Appends a record, flushing when the buffer reaches capacity.
    ///
    /// If an earlier flush failed and left the buffer full, that flush is
    /// retried first so the buffer never grows past its capacity.
    pub async fn add_item(&mut self, record: Record) -> Result<()> {
        if self.buffer.len() >= self.capacity {
            self.flush().await?;
        }

        self.buffer.push(record);

        if self.buffer.len() == self.capacity {
            self.flush().await?;
        }
        Ok(())
    }

    /// Writes all buffered records. The buffer is emptied only on success.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        trace!(count = self.buffer.len(), "flushing insert buffer");
        self.storage.store_batch(self.buffer.clone()).await?;
        self.buffer.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
