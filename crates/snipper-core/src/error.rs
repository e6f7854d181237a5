use crate::record::Record;
use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("record \"{value}\" not found")]
    NotFound { value: String },
    #[error("record already exists with short: \"{}\"", old_record.short)]
    Conflict { old_record: Record },
    #[error("short \"{short}\" is already taken")]
    DuplicateShort { short: String },
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage io failed: {0}")]
    Io(String),
    #[error("storage operation failed: {0}")]
    Operation(String),
}

impl StorageError {
    pub fn not_found(value: impl Into<String>) -> Self {
        Self::NotFound {
            value: value.into(),
        }
    }

    pub fn conflict(old_record: Record) -> Self {
        Self::Conflict { old_record }
    }

    /// Classifies why `existing` prevents `record` from being stored.
    ///
    /// Only a live record holding the same URL is a [`Conflict`]; its short
    /// is safe to hand back to the caller. Anything else means the short
    /// itself is taken by an unrelated record.
    ///
    /// [`Conflict`]: StorageError::Conflict
    pub fn blocked_by(record: &Record, existing: Record) -> Self {
        if existing.is_live() && existing.full == record.full {
            Self::conflict(existing)
        } else {
            Self::DuplicateShort {
                short: record.short.clone(),
            }
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

/// Errors surfaced synchronously to request handlers.
#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("url already shortened as \"{}\"", old_record.short)]
    Conflict { old_record: Record },
    #[error("short \"{0}\" not found")]
    NotFound(String),
    #[error("short \"{0}\" has been deleted")]
    Gone(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for ShortenerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Conflict { old_record } => Self::Conflict { old_record },
            StorageError::NotFound { value } => Self::NotFound(value),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_existing_short() {
        let err = StorageError::conflict(Record::new("abc", "http://x.com", "u1"));
        assert_eq!(err.to_string(), "record already exists with short: \"abc\"");
    }

    #[test]
    fn storage_conflict_maps_to_shortener_conflict() {
        let old = Record::new("abc", "http://x.com", "u1");
        let err = ShortenerError::from(StorageError::conflict(old.clone()));
        assert!(matches!(err, ShortenerError::Conflict { old_record } if old_record == old));
    }

    #[test]
    fn same_url_blocker_is_a_conflict() {
        let existing = Record::new("abc", "http://x.com", "u1");
        let err = StorageError::blocked_by(&Record::new("def", "http://x.com", "u2"), existing);
        assert!(matches!(err, StorageError::Conflict { old_record } if old_record.short == "abc"));
    }

    #[test]
    fn taken_short_is_not_a_conflict() {
        let existing = Record::new("0", "http://old.com", "u1");
        let err = StorageError::blocked_by(&Record::new("0", "http://new.com", "u2"), existing);
        assert!(matches!(err, StorageError::DuplicateShort { ref short } if short == "0"));

        let mapped = ShortenerError::from(err);
        assert!(matches!(mapped, ShortenerError::Storage(_)));
    }

    #[test]
    fn deleted_record_with_same_url_only_blocks_its_short() {
        let mut existing = Record::new("0", "http://x.com", "u1");
        existing.deleted = true;
        let err = StorageError::blocked_by(&Record::new("0", "http://x.com", "u1"), existing);
        assert!(matches!(err, StorageError::DuplicateShort { .. }));
    }

    #[test]
    fn transient_errors_map_to_storage() {
        let err = ShortenerError::from(StorageError::Timeout("load".to_string()));
        assert!(matches!(err, ShortenerError::Storage(_)));
    }
}
