//! Authorization session model - one-time handshake between a profile and a client.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

/// Authorization session entity.
///
/// Only the SHA-256 hash of the session token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct AuthSession {
    pub session_id: Uuid,
    pub token_hash: String,
    pub client_id: String,
    pub profile_id: Uuid,
    pub context_id: Uuid,
    pub return_url: String,
    pub state: String,
    pub created_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub used_utc: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn new(
        session_token: &str,
        client_id: String,
        profile_id: Uuid,
        context_id: Uuid,
        return_url: String,
        state: String,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            token_hash: Self::hash_token(session_token),
            client_id,
            profile_id,
            context_id,
            return_url,
            state,
            created_utc: now,
            expiry_utc: now + ttl,
            used_utc: None,
        }
    }

    pub fn hash_token(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }

    pub fn is_used(&self) -> bool {
        self.used_utc.is_some()
    }
}
