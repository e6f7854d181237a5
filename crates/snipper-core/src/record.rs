use serde::{Deserialize, Serialize};

/// A stored association between a short identifier and the original URL.
///
/// `short` is the identity of a record and stays unique across live and
/// soft-deleted records. Once stored, only `deleted` ever changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The unique short identifier.
    pub short: String,
    /// The original URL that was shortened.
    pub full: String,
    /// Owner of the record.
    pub user_id: String,
    /// Soft-delete marker.
    #[serde(default)]
    pub deleted: bool,
}

impl Record {
    /// Creates a live record.
    pub fn new(
        short: impl Into<String>,
        full: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            short: short.into(),
            full: full.into(),
            user_id: user_id.into(),
            deleted: false,
        }
    }

    /// Whether the record is visible to listing reads.
    ///
    /// Every in-process backend filters with this predicate so that
    /// `load_batch`, `load_for_user` and the stats counters agree.
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    /// Whether `user_id` owns this record.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// Aggregate counters over live records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub urls_count: u64,
    pub users_count: u64,
}
