use snipper_core::error::Result;
use snipper_core::{Record, ServiceStats, StorageError};
use std::collections::{HashMap, HashSet};

/// Record map shared by the in-process backends.
///
/// Keeps a secondary index from `full` URL to the short of its live record,
/// so duplicate submissions are detected without scanning.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordIndex {
    records: HashMap<String, Record>,
    live_by_full: HashMap<String, String>,
}

impl RecordIndex {
    /// Builds an index from previously persisted records without conflict
    /// checks. Later records with the same short replace earlier ones.
    pub(crate) fn restore(records: impl IntoIterator<Item = Record>) -> Self {
        let mut index = Self::default();
        for record in records {
            index.put(record);
        }
        index
    }

    pub(crate) fn insert(&mut self, record: Record) -> Result<()> {
        if let Some(existing) = self.blocking(&record) {
            return Err(StorageError::blocked_by(&record, existing.clone()));
        }
        self.put(record);
        Ok(())
    }

    /// Validates the whole batch before applying any of it.
    pub(crate) fn insert_all(&mut self, records: Vec<Record>) -> Result<()> {
        let mut staged_shorts: HashMap<&str, &Record> = HashMap::new();
        let mut staged_fulls: HashMap<&str, &Record> = HashMap::new();

        for record in &records {
            if let Some(existing) = self.blocking(record) {
                return Err(StorageError::blocked_by(record, existing.clone()));
            }
            let earlier = staged_fulls
                .get(record.full.as_str())
                .or_else(|| staged_shorts.get(record.short.as_str()));
            if let Some(earlier) = earlier {
                return Err(StorageError::blocked_by(record, (*earlier).clone()));
            }
            staged_shorts.insert(&record.short, record);
            staged_fulls.insert(&record.full, record);
        }

        for record in records {
            self.put(record);
        }
        Ok(())
    }

    pub(crate) fn get(&self, short: &str) -> Result<Record> {
        self.records
            .get(short)
            .cloned()
            .ok_or_else(|| StorageError::not_found(short))
    }

    pub(crate) fn live_among(&self, shorts: &[String]) -> Vec<Record> {
        let mut seen = HashSet::new();
        shorts
            .iter()
            .filter(|short| seen.insert(short.as_str()))
            .filter_map(|short| self.records.get(short))
            .filter(|record| record.is_live())
            .cloned()
            .collect()
    }

    pub(crate) fn live_for_user(&self, user_id: &str) -> Vec<Record> {
        self.live()
            .filter(|record| record.is_owned_by(user_id))
            .cloned()
            .collect()
    }

    pub(crate) fn mark_deleted(&mut self, short: &str) -> Result<()> {
        if !self.flag_deleted(short) {
            return Err(StorageError::not_found(short));
        }
        Ok(())
    }

    /// Returns how many known shorts were flagged.
    pub(crate) fn mark_deleted_all(&mut self, shorts: &[String]) -> usize {
        shorts
            .iter()
            .filter(|short| self.flag_deleted(short))
            .count()
    }

    pub(crate) fn stats(&self) -> ServiceStats {
        let users: HashSet<&str> = self.live().map(|record| record.user_id.as_str()).collect();
        ServiceStats {
            urls_count: self.live().count() as u64,
            users_count: users.len() as u64,
        }
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    fn live(&self) -> impl Iterator<Item = &Record> {
        self.records.values().filter(|record| record.is_live())
    }

    /// The stored record that prevents `record` from being inserted, if any.
    /// A live record with the same URL wins over one holding the same short.
    fn blocking(&self, record: &Record) -> Option<&Record> {
        self.live_by_full
            .get(&record.full)
            .and_then(|short| self.records.get(short))
            .or_else(|| self.records.get(&record.short))
    }

    fn put(&mut self, record: Record) {
        if let Some(previous) = self.records.get(&record.short) {
            if self.live_by_full.get(&previous.full) == Some(&record.short) {
                self.live_by_full.remove(&previous.full);
            }
        }
        if record.is_live() {
            self.live_by_full
                .insert(record.full.clone(), record.short.clone());
        }
        self.records.insert(record.short.clone(), record);
    }

    fn flag_deleted(&mut self, short: &str) -> bool {
        let Some(record) = self.records.get_mut(short) else {
            return false;
        };
        record.deleted = true;
        if self.live_by_full.get(&record.full).map(String::as_str) == Some(short) {
            self.live_by_full.remove(&record.full);
        }
        true
    }
}
