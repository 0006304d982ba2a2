//! Client registration model - a third-party application keyed by its origin.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::FromRow;

const CLIENT_ID_PREFIX: &str = "tnp_";
const CLIENT_ID_HEX_LEN: usize = 16;

/// Derive the stable client id for an origin domain.
///
/// The domain is trimmed and lowercased before hashing, so `Example.com` and
/// `example.com` share an id.
pub fn derive_client_id(origin_domain: &str) -> String {
    let normalized = origin_domain.trim().to_lowercase();
    let digest = hex::encode(Sha256::digest(normalized.as_bytes()));
    format!("{}{}", CLIENT_ID_PREFIX, &digest[..CLIENT_ID_HEX_LEN])
}

/// Client registration entity.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
    pub client_id: String,
    pub display_name: String,
    pub publisher_domain: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl ClientRegistration {
    pub fn new(origin_domain: &str, display_name: &str) -> Self {
        let now = Utc::now();
        Self {
            client_id: derive_client_id(origin_domain),
            display_name: display_name.to_string(),
            publisher_domain: origin_domain.trim().to_lowercase(),
            created_utc: now,
            updated_utc: now,
        }
    }
}
