//! Consent Ledger - PENDING -> GRANTED -> REVOKED, keyed by (granter, requester).
//!
//! `grant` and `revoke` are compare-and-set writes on the expected current status.
//! When the precondition does not hold they return `TransitionOutcome::NotFound`
//! instead of an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use super::audit::AuditLogger;
use super::metrics::CONSENT_TRANSITIONS_TOTAL;
use crate::models::{AuditAction, AuditEntry, ConsentGrant, ConsentStatus, EffectiveConsentStatus};
use crate::store::IdentityStore;

/// Result of a precondition-checked transition.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Transitioned(ConsentGrant),
    /// No record in the expected state; nothing was written.
    NotFound,
}

pub struct ConsentLedger {
    store: Arc<dyn IdentityStore>,
    audit: Arc<AuditLogger>,
}

impl ConsentLedger {
    pub fn new(store: Arc<dyn IdentityStore>, audit: Arc<AuditLogger>) -> Self {
        Self { store, audit }
    }

    /// Create a pending request, superseding a revoked or expired record for the pair.
    ///
    /// `context_name` is looked up among the granter's contexts; without one the
    /// granter's permanent context is used.
    #[tracing::instrument(skip(self, request_id))]
    pub async fn request(
        &self,
        granter_id: Uuid,
        requester_id: Uuid,
        context_name: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        request_id: &str,
    ) -> Result<ConsentGrant, AppError> {
        if granter_id == requester_id {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Granter and requester must be different profiles"
            )));
        }
        let now = Utc::now();
        if expires_at.is_some_and(|at| at <= now) {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "expiresAt must be in the future"
            )));
        }

        for (role, id) in [("Granter", granter_id), ("Requester", requester_id)] {
            if self.store.find_profile(id).await?.is_none() {
                return Err(AppError::NotFound(anyhow::anyhow!("{} profile not found", role)));
            }
        }

        let context = match context_name {
            Some(name) => self.store.find_context_by_name(granter_id, name).await?,
            None => self.store.find_permanent_context(granter_id).await?,
        }
        .ok_or_else(|| {
            AppError::ValidationError(anyhow::anyhow!("Context is not owned by the granter"))
        })?;

        let existing = self.store.find_consent(granter_id, requester_id).await?;
        if let Some(current) = &existing {
            if current.effective_status(now) == EffectiveConsentStatus::Granted {
                return Err(AppError::ValidationError(anyhow::anyhow!(
                    "An active consent already exists for this requester"
                )));
            }
        }

        let request = ConsentGrant::request(granter_id, requester_id, context.context_id, expires_at);
        let saved = self
            .store
            .save_consent_request(&request, existing.as_ref())
            .await?
            .ok_or_else(|| {
                AppError::ValidationError(anyhow::anyhow!(
                    "Consent was modified concurrently, please retry"
                ))
            })?;

        CONSENT_TRANSITIONS_TOTAL
            .with_label_values(&["request", "transitioned"])
            .inc();
        self.audit
            .append(
                AuditEntry::new(
                    AuditAction::ConsentRequested,
                    Some(requester_id),
                    Some(granter_id),
                    Some(saved.context_id),
                )
                .with_request_id(request_id)
                .with_details(json!({
                    "consentId": saved.consent_id,
                    "expiresAt": saved.expiry_utc,
                    "superseded": existing.map(|c| c.status_code),
                })),
            )
            .await;

        tracing::info!(consent_id = %saved.consent_id, "Consent requested");
        Ok(saved)
    }

    /// PENDING -> GRANTED.
    #[tracing::instrument(skip(self, request_id))]
    pub async fn grant(
        &self,
        granter_id: Uuid,
        requester_id: Uuid,
        request_id: &str,
    ) -> Result<TransitionOutcome, AppError> {
        self.transition(
            granter_id,
            requester_id,
            ConsentStatus::Pending,
            ConsentStatus::Granted,
            request_id,
        )
        .await
    }

    /// GRANTED -> REVOKED. An expired grant can still be revoked.
    #[tracing::instrument(skip(self, request_id))]
    pub async fn revoke(
        &self,
        granter_id: Uuid,
        requester_id: Uuid,
        request_id: &str,
    ) -> Result<TransitionOutcome, AppError> {
        self.transition(
            granter_id,
            requester_id,
            ConsentStatus::Granted,
            ConsentStatus::Revoked,
            request_id,
        )
        .await
    }

    async fn transition(
        &self,
        granter_id: Uuid,
        requester_id: Uuid,
        from: ConsentStatus,
        to: ConsentStatus,
        request_id: &str,
    ) -> Result<TransitionOutcome, AppError> {
        let (label, action) = match to {
            ConsentStatus::Granted => ("grant", AuditAction::ConsentGranted),
            ConsentStatus::Revoked => ("revoke", AuditAction::ConsentRevoked),
            ConsentStatus::Pending => ("request", AuditAction::ConsentRequested),
        };

        let Some(updated) = self
            .store
            .transition_consent(granter_id, requester_id, from, to, Utc::now())
            .await?
        else {
            CONSENT_TRANSITIONS_TOTAL
                .with_label_values(&[label, "not_found"])
                .inc();
            tracing::debug!(from = from.as_str(), "No consent in expected state");
            return Ok(TransitionOutcome::NotFound);
        };

        CONSENT_TRANSITIONS_TOTAL
            .with_label_values(&[label, "transitioned"])
            .inc();
        self.audit
            .append(
                AuditEntry::new(
                    action,
                    Some(granter_id),
                    Some(requester_id),
                    Some(updated.context_id),
                )
                .with_request_id(request_id)
                .with_details(json!({
                    "consentId": updated.consent_id,
                    "from": from.as_str(),
                    "to": to.as_str(),
                })),
            )
            .await;

        tracing::info!(consent_id = %updated.consent_id, to = to.as_str(), "Consent transitioned");
        Ok(TransitionOutcome::Transitioned(updated))
    }
}
