use async_trait::async_trait;
use snipper_core::{
    BatchCreated, BatchItem, Record, ServiceStats, Shortener, ShortenerError, Storage,
};
use snipper_generator::Generator;
use snipper_storage::inserter::{BatchInserter, DEFAULT_CAPACITY};
use snipper_storage::DeleteQueue;
use std::sync::Arc;
use tracing::{debug, trace};

/// A concrete implementation of the `Shortener` trait.
///
/// Creates and reads go straight to the storage. Bulk creates go through a
/// [`BatchInserter`] owned by the request. Deletes are handed to the
/// [`DeleteQueue`] and applied later by its worker.
///
/// The `Generator` is responsible for the uniqueness of generated shorts.
/// No collision retry is performed.
#[derive(Debug, Clone)]
pub struct ShortenerService<S, G> {
    storage: Arc<S>,
    generator: Arc<G>,
    deletes: DeleteQueue,
    base_url: String,
}

impl<S: Storage, G: Generator> ShortenerService<S, G> {
    /// Creates a service on top of `storage`.
    ///
    /// `deletes` must be the queue handle of a
    /// [`BatchDeleter`](snipper_storage::BatchDeleter) built over the same
    /// storage.
    pub fn new(
        storage: Arc<S>,
        generator: G,
        deletes: DeleteQueue,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            generator: Arc::new(generator),
            deletes,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Composes the public URL of `short`.
    pub fn short_url(&self, short: &str) -> String {
        format!("{}/{}", self.base_url, short)
    }

    /// Validates that the URL is absolute with an http(s) scheme and a host.
    fn validate_url(url: &str) -> Result<(), ShortenerError> {
        if url.is_empty() {
            return Err(ShortenerError::InvalidUrl(
                "URL cannot be empty".to_string(),
            ));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a scheme and host: {url}"
            )));
        };

        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL scheme must be http or https: {scheme}"
            )));
        }

        let authority = rest
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default();
        let host_port = authority
            .rsplit_once('@')
            .map_or(authority, |(_, host)| host);
        let host = match host_port.strip_prefix('[') {
            // IPv6 literal
            Some(literal) => literal.split(']').next().unwrap_or_default(),
            None => host_port.split(':').next().unwrap_or_default(),
        };

        if host.is_empty() {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a host: {url}"
            )));
        }

        Ok(())
    }

    fn new_record(&self, full_url: &str, user_id: &str) -> Record {
        Record::new(self.generator.generate(), full_url, user_id)
    }
}

#[async_trait]
impl<S: Storage, G: Generator> Shortener for ShortenerService<S, G> {
    async fn create_record(&self, full_url: &str, user_id: &str) -> Result<Record, ShortenerError> {
        Self::validate_url(full_url)?;

        let record = self.new_record(full_url, user_id);
        self.storage.store(record.clone()).await?;

        debug!(short = %record.short, user_id = %user_id, "created record");
        Ok(record)
    }

    async fn create_batch(
        &self,
        items: Vec<BatchItem>,
        user_id: &str,
    ) -> Result<Vec<BatchCreated>, ShortenerError> {
        for item in &items {
            Self::validate_url(&item.original_url)?;
        }

        let mut inserter = BatchInserter::new(self.storage.as_ref(), DEFAULT_CAPACITY);
        let mut created = Vec::with_capacity(items.len());

        for item in items {
            let record = self.new_record(&item.original_url, user_id);
            inserter.add_item(record.clone()).await?;
            created.push(BatchCreated {
                correlation_id: item.correlation_id,
                record,
            });
        }
        inserter.flush().await?;

        debug!(count = created.len(), user_id = %user_id, "created batch");
        Ok(created)
    }

    async fn resolve(&self, short: &str) -> Result<Record, ShortenerError> {
        let record = self.storage.load(short).await?;
        if !record.is_live() {
            return Err(ShortenerError::Gone(record.short));
        }
        Ok(record)
    }

    async fn records_for_user(&self, user_id: &str) -> Result<Vec<Record>, ShortenerError> {
        Ok(self.storage.load_for_user(user_id).await?)
    }

    fn queue_delete(&self, shorts: Vec<String>, user_id: &str) {
        trace!(count = shorts.len(), user_id = %user_id, "accepted delete request");
        self.deletes.queue_items(shorts, user_id);
    }

    async fn ping(&self) -> Result<(), ShortenerError> {
        Ok(self.storage.ping().await?)
    }

    async fn stats(&self) -> Result<ServiceStats, ShortenerError> {
        Ok(self.storage.stats().await?)
    }
}
