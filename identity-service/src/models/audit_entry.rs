//! Audit entry model - immutable transparency record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Audit action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    NameDisclosed,
    ConsentRequested,
    ConsentGranted,
    ConsentRevoked,
    AuthorizationSessionCreated,
    TokenIssued,
    TokenExchangeFailed,
    ClaimsResolved,
    ClaimsResolutionFailed,
    ContextCreated,
    ContextDeleted,
}

impl AuditAction {
    pub const ALL: [AuditAction; 11] = [
        AuditAction::NameDisclosed,
        AuditAction::ConsentRequested,
        AuditAction::ConsentGranted,
        AuditAction::ConsentRevoked,
        AuditAction::AuthorizationSessionCreated,
        AuditAction::TokenIssued,
        AuditAction::TokenExchangeFailed,
        AuditAction::ClaimsResolved,
        AuditAction::ClaimsResolutionFailed,
        AuditAction::ContextCreated,
        AuditAction::ContextDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::NameDisclosed => "NAME_DISCLOSED",
            AuditAction::ConsentRequested => "CONSENT_REQUESTED",
            AuditAction::ConsentGranted => "CONSENT_GRANTED",
            AuditAction::ConsentRevoked => "CONSENT_REVOKED",
            AuditAction::AuthorizationSessionCreated => "AUTHORIZATION_SESSION_CREATED",
            AuditAction::TokenIssued => "TOKEN_ISSUED",
            AuditAction::TokenExchangeFailed => "TOKEN_EXCHANGE_FAILED",
            AuditAction::ClaimsResolved => "CLAIMS_RESOLVED",
            AuditAction::ClaimsResolutionFailed => "CLAIMS_RESOLUTION_FAILED",
            AuditAction::ContextCreated => "CONTEXT_CREATED",
            AuditAction::ContextDeleted => "CONTEXT_DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }
}

/// Audit entry entity. Never updated or deleted once written.
#[derive(Debug, Clone, FromRow)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub action_code: String,
    pub actor_id: Option<Uuid>,
    pub target_id: Option<Uuid>,
    pub context_id: Option<Uuid>,
    pub resolved_name: Option<String>,
    pub request_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        actor_id: Option<Uuid>,
        target_id: Option<Uuid>,
        context_id: Option<Uuid>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            action_code: action.as_str().to_string(),
            actor_id,
            target_id,
            context_id,
            resolved_name: None,
            request_id: None,
            details: None,
            created_utc: Utc::now(),
        }
    }

    pub fn with_resolved_name(mut self, name: impl Into<String>) -> Self {
        self.resolved_name = Some(name.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn action(&self) -> Option<AuditAction> {
        AuditAction::parse(&self.action_code)
    }
}

/// Audit entry as returned to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntryResponse {
    pub id: Uuid,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub target_id: Option<Uuid>,
    pub context_id: Option<Uuid>,
    pub resolved_name: Option<String>,
    pub request_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl From<AuditEntry> for AuditEntryResponse {
    fn from(entry: AuditEntry) -> Self {
        Self {
            id: entry.entry_id,
            action: entry.action_code,
            actor_id: entry.actor_id,
            target_id: entry.target_id,
            context_id: entry.context_id,
            resolved_name: entry.resolved_name,
            request_id: entry.request_id,
            details: entry.details,
            timestamp: entry.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_codes_round_trip() {
        for action in AuditAction::ALL {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
    }

    #[test]
    fn builder_sets_optional_fields() {
        let target = Uuid::new_v4();
        let entry = AuditEntry::new(AuditAction::NameDisclosed, None, Some(target), None)
            .with_resolved_name("Jane Smith")
            .with_request_id("req-9")
            .with_details(serde_json::json!({"source": "preferred"}));

        assert_eq!(entry.action(), Some(AuditAction::NameDisclosed));
        assert_eq!(entry.resolved_name.as_deref(), Some("Jane Smith"));

        let response = AuditEntryResponse::from(entry);
        assert_eq!(response.action, "NAME_DISCLOSED");
        assert_eq!(response.target_id, Some(target));
        assert_eq!(response.request_id.as_deref(), Some("req-9"));
    }
}
