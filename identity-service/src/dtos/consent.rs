use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::{ConsentGrant, ConsentStatus, EffectiveConsentStatus};

/// Body of `POST /consents`, discriminated by `action`.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ConsentCommand {
    Request(ConsentRequestPayload),
    Grant(ConsentPairPayload),
    Revoke(ConsentPairPayload),
}

impl ConsentCommand {
    pub fn action(&self) -> &'static str {
        match self {
            ConsentCommand::Request(_) => "request",
            ConsentCommand::Grant(_) => "grant",
            ConsentCommand::Revoke(_) => "revoke",
        }
    }
}

impl Validate for ConsentCommand {
    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            ConsentCommand::Request(payload) => payload.validate(),
            ConsentCommand::Grant(payload) | ConsentCommand::Revoke(payload) => payload.validate(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "distinct_request_parties"))]
pub struct ConsentRequestPayload {
    pub granter_id: Uuid,
    pub requester_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub context_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "distinct_pair_parties"))]
pub struct ConsentPairPayload {
    pub granter_id: Uuid,
    pub requester_id: Uuid,
}

fn distinct(granter_id: Uuid, requester_id: Uuid) -> Result<(), ValidationError> {
    if granter_id == requester_id {
        let mut err = ValidationError::new("self_consent");
        err.message = Some("granterId and requesterId must differ".into());
        return Err(err);
    }
    Ok(())
}

fn distinct_request_parties(payload: &ConsentRequestPayload) -> Result<(), ValidationError> {
    distinct(payload.granter_id, payload.requester_id)
}

fn distinct_pair_parties(payload: &ConsentPairPayload) -> Result<(), ValidationError> {
    distinct(payload.granter_id, payload.requester_id)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentResponse {
    pub action: &'static str,
    pub consent_id: Uuid,
    pub granter_id: Uuid,
    pub requester_id: Uuid,
    pub context_id: Uuid,
    pub status: ConsentStatus,
    pub effective_status: EffectiveConsentStatus,
    pub created_at: DateTime<Utc>,
    pub granted_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ConsentResponse {
    pub fn new(action: &'static str, grant: &ConsentGrant, now: DateTime<Utc>) -> Self {
        Self {
            action,
            consent_id: grant.consent_id,
            granter_id: grant.granter_id,
            requester_id: grant.requester_id,
            context_id: grant.context_id,
            status: grant.status(),
            effective_status: grant.effective_status(now),
            created_at: grant.created_utc,
            granted_at: grant.granted_utc,
            revoked_at: grant.revoked_utc,
            expires_at: grant.expiry_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_selects_the_variant() {
        let granter = Uuid::new_v4();
        let requester = Uuid::new_v4();

        let cmd: ConsentCommand = serde_json::from_value(json!({
            "action": "request",
            "granterId": granter,
            "requesterId": requester,
            "contextName": "Work",
        }))
        .unwrap();
        match cmd {
            ConsentCommand::Request(p) => assert_eq!(p.context_name.as_deref(), Some("Work")),
            other => panic!("unexpected {:?}", other),
        }

        let cmd: ConsentCommand = serde_json::from_value(json!({
            "action": "revoke",
            "granterId": granter,
            "requesterId": requester,
        }))
        .unwrap();
        assert_eq!(cmd.action(), "revoke");
    }

    #[test]
    fn unknown_action_is_rejected() {
        let result = serde_json::from_value::<ConsentCommand>(json!({
            "action": "approve",
            "granterId": Uuid::new_v4(),
            "requesterId": Uuid::new_v4(),
        }));
        assert!(result.is_err());
    }

    #[test]
    fn self_consent_fails_validation() {
        let id = Uuid::new_v4();
        let cmd = ConsentCommand::Grant(ConsentPairPayload {
            granter_id: id,
            requester_id: id,
        });
        assert!(cmd.validate().is_err());
    }
}
