//! Row shapes for the five identity tables. Keys (partition/row) and etags live outside the
//! property bag, so they are `#[serde(skip)]` and filled in by `IdentityStore` after a read.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::engine::{ETag, Properties, StoredRow};
use super::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(skip)]
    pub id: String,
    /// Normalized (trimmed, lowercased).
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub etag: Option<ETag>,
}

/// `UsersByEmail` row: normalized email (row key) -> user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailIndexEntry {
    #[serde(skip)]
    pub email_key: String,
    pub user_id: String,
    /// Email as the user typed it.
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(skip)]
    pub sid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ua_hash: Option<String>,
    #[serde(skip)]
    pub etag: Option<ETag>,
}

impl Session {
    pub fn is_ended(&self) -> bool { self.ended_at.is_some() }
}

/// `EventsBySession` row, partitioned by sid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    #[serde(skip)]
    pub sid: String,
    #[serde(skip)]
    pub row_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub event_type: String,
    #[serde(default = "empty_object")]
    pub data_json: String,
    pub created_at: DateTime<Utc>,
}

/// `EventsByUser` row, partitioned by user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    #[serde(skip)]
    pub user_id: String,
    #[serde(skip)]
    pub row_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub event_type: String,
    #[serde(default = "empty_object")]
    pub data_json: String,
    pub created_at: DateTime<Utc>,
}

fn empty_object() -> String { "{}".to_string() }

pub(crate) fn to_properties<T: Serialize>(entity: &T) -> StoreResult<Properties> {
    match serde_json::to_value(entity)? {
        Value::Object(m) => Ok(m),
        other => Err(StoreError::InvalidArgument(format!("entity serialized to non-object: {}", other))),
    }
}

pub(crate) fn from_row<T: DeserializeOwned>(row: &StoredRow) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(row.properties.clone()))?)
}
