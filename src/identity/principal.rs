use serde::{Deserialize, Serialize};

/// Authenticated identity recovered from a valid token.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    /// Normalized (trimmed, lowercased) email.
    #[serde(default)]
    pub email: String,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, email: impl AsRef<str>) -> Self {
        Self { user_id: user_id.into(), email: crate::storage::normalize_email(email.as_ref()) }
    }
}
