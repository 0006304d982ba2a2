//! Bearer token record - server-side binding for an issued access token.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::AuthSession;

/// Issued bearer token, bound to (profile, client, context).
#[derive(Debug, Clone, FromRow)]
pub struct BearerToken {
    pub token_id: Uuid,
    pub token_hash: String,
    pub profile_id: Uuid,
    pub client_id: String,
    pub context_id: Uuid,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
}

impl BearerToken {
    /// Record for a freshly signed token. `token_id` is the token's `jti`.
    pub fn for_session(
        token_id: Uuid,
        token: &str,
        session: &AuthSession,
        issued_utc: DateTime<Utc>,
        expiry_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            token_id,
            token_hash: Self::hash_token(token),
            profile_id: session.profile_id,
            client_id: session.client_id.clone(),
            context_id: session.context_id,
            issued_utc,
            expiry_utc,
        }
    }

    pub fn hash_token(token: &str) -> String {
        AuthSession::hash_token(token)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }
}
