use serde::{Deserialize, Serialize};

use super::{StoreError, StoreResult};

/// Row payload: a flat JSON property bag (partition and row keys live outside it).
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Opaque concurrency tag handed out on every read and write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ETag(pub String);

impl ETag {
    pub fn as_str(&self) -> &str { &self.0 }
}

#[derive(Debug, Clone)]
pub struct StoredRow {
    pub properties: Properties,
    pub etag: ETag,
}

/// Key-value table collaborator. Each call touches exactly one row; there is no cross-row
/// atomicity and no automatic retry on `Conflict`.
pub trait TableEngine: Send + Sync {
    /// Returns true when the table was created by this call. Safe to call concurrently.
    fn create_table_if_absent(&self, table: &str) -> StoreResult<bool>;

    fn get_if_exists(&self, table: &str, partition: &str, row: &str) -> StoreResult<Option<StoredRow>>;

    /// Like `get_if_exists` but a missing row is `StoreError::NotFound`.
    fn get(&self, table: &str, partition: &str, row: &str) -> StoreResult<StoredRow> {
        self.get_if_exists(table, partition, row)?.ok_or_else(|| StoreError::not_found(table, partition, row))
    }

    /// Insert a new row; an existing row with the same key is `StoreError::AlreadyExists`.
    fn insert(&self, table: &str, partition: &str, row: &str, properties: Properties) -> StoreResult<ETag>;

    /// Overlay `properties` onto the stored row if its etag still equals `etag`.
    /// A `null` property removes the field. Stale etag is `StoreError::Conflict`.
    fn merge_update(&self, table: &str, partition: &str, row: &str, properties: Properties, etag: &ETag) -> StoreResult<ETag>;

    /// All rows of one partition ordered by row key.
    fn list_partition(&self, table: &str, partition: &str) -> StoreResult<Vec<(String, StoredRow)>>;
}
