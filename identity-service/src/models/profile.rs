//! Profile model - the owner of name variants and contexts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Profile entity.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub profile_id: Uuid,
    pub email: String,
    pub created_utc: DateTime<Utc>,
}

impl Profile {
    /// Create a new profile. Emails are stored lowercased.
    pub fn new(email: &str) -> Self {
        Self {
            profile_id: Uuid::new_v4(),
            email: email.trim().to_lowercase(),
            created_utc: Utc::now(),
        }
    }
}
