//! Consent grant model - permission from a name owner for one requester.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Stored consent status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsentStatus {
    Pending,
    Granted,
    Revoked,
}

impl ConsentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentStatus::Pending => "pending",
            ConsentStatus::Granted => "granted",
            ConsentStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ConsentStatus::Pending),
            "granted" => Some(ConsentStatus::Granted),
            "revoked" => Some(ConsentStatus::Revoked),
            _ => None,
        }
    }
}

/// Status as observed at a point in time. Expiry is derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveConsentStatus {
    Pending,
    Granted,
    Expired,
    Revoked,
}

impl EffectiveConsentStatus {
    pub fn is_active(&self) -> bool {
        *self == EffectiveConsentStatus::Granted
    }
}

/// Consent grant entity. Unique per (granter, requester).
#[derive(Debug, Clone, FromRow)]
pub struct ConsentGrant {
    pub consent_id: Uuid,
    pub granter_id: Uuid,
    pub requester_id: Uuid,
    pub context_id: Uuid,
    pub status_code: String,
    pub created_utc: DateTime<Utc>,
    pub granted_utc: Option<DateTime<Utc>>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub expiry_utc: Option<DateTime<Utc>>,
}

impl ConsentGrant {
    /// Create a new pending request.
    pub fn request(
        granter_id: Uuid,
        requester_id: Uuid,
        context_id: Uuid,
        expiry_utc: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            consent_id: Uuid::new_v4(),
            granter_id,
            requester_id,
            context_id,
            status_code: ConsentStatus::Pending.as_str().to_string(),
            created_utc: Utc::now(),
            granted_utc: None,
            revoked_utc: None,
            expiry_utc,
        }
    }

    /// Stored status. Unknown codes are treated as revoked so they never disclose.
    pub fn status(&self) -> ConsentStatus {
        ConsentStatus::parse(&self.status_code).unwrap_or(ConsentStatus::Revoked)
    }

    /// The single place expiry is applied to the stored status.
    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveConsentStatus {
        match self.status() {
            ConsentStatus::Pending => EffectiveConsentStatus::Pending,
            ConsentStatus::Revoked => EffectiveConsentStatus::Revoked,
            ConsentStatus::Granted => match self.expiry_utc {
                Some(expiry) if expiry <= now => EffectiveConsentStatus::Expired,
                _ => EffectiveConsentStatus::Granted,
            },
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now).is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn granted(expiry: Option<DateTime<Utc>>) -> ConsentGrant {
        let mut grant = ConsentGrant::request(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), expiry);
        grant.status_code = ConsentStatus::Granted.as_str().to_string();
        grant.granted_utc = Some(Utc::now());
        grant
    }

    #[test]
    fn granted_without_expiry_is_active() {
        assert!(granted(None).is_active(Utc::now()));
    }

    #[test]
    fn granted_past_expiry_is_expired_not_active() {
        let now = Utc::now();
        let grant = granted(Some(now - Duration::minutes(1)));
        assert_eq!(grant.status(), ConsentStatus::Granted);
        assert_eq!(grant.effective_status(now), EffectiveConsentStatus::Expired);
        assert!(!grant.is_active(now));
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let now = Utc::now();
        let grant = granted(Some(now));
        assert_eq!(grant.effective_status(now), EffectiveConsentStatus::Expired);
        assert!(grant.is_active(now - Duration::seconds(1)));
    }

    #[test]
    fn pending_and_revoked_never_active() {
        let now = Utc::now();
        let pending = ConsentGrant::request(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), None);
        assert_eq!(pending.effective_status(now), EffectiveConsentStatus::Pending);

        let mut revoked = granted(None);
        revoked.status_code = ConsentStatus::Revoked.as_str().to_string();
        assert_eq!(revoked.effective_status(now), EffectiveConsentStatus::Revoked);

        let mut garbage = granted(None);
        garbage.status_code = "granted-ish".to_string();
        assert!(!garbage.is_active(now));
    }
}
