//! Context Store - profiles, name variants, contexts and their assignments.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use super::audit::AuditLogger;
use super::consent::{ConsentLedger, TransitionOutcome};
use crate::models::{
    AuditAction, AuditEntry, ConsentStatus, Context, ContextAssignment, IdentityProperty,
    NameVariant, Profile,
};
use crate::store::{ContextMutation, IdentityStore, VariantDeletion};

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_CONTEXT_NAME_LEN: usize = 100;
const MAX_DELETE_ATTEMPTS: usize = 3;

/// A context with its property assignments.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextView {
    #[serde(flatten)]
    pub context: Context,
    pub assignments: Vec<ContextAssignment>,
}

pub struct ContextService {
    store: Arc<dyn IdentityStore>,
    audit: Arc<AuditLogger>,
    consents: Arc<ConsentLedger>,
}

fn validation(msg: &'static str) -> AppError {
    AppError::ValidationError(anyhow::anyhow!(msg))
}

fn not_found(msg: &'static str) -> AppError {
    AppError::NotFound(anyhow::anyhow!(msg))
}

fn clean_context_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_CONTEXT_NAME_LEN {
        return Err(validation("Context name must be 1-100 characters"));
    }
    Ok(name.to_string())
}

impl ContextService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        audit: Arc<AuditLogger>,
        consents: Arc<ConsentLedger>,
    ) -> Self {
        Self {
            store,
            audit,
            consents,
        }
    }

    async fn require_profile(&self, profile_id: Uuid) -> Result<(), AppError> {
        match self.store.find_profile(profile_id).await? {
            Some(_) => Ok(()),
            None => Err(not_found("Profile not found")),
        }
    }

    async fn owned_context(&self, owner: Uuid, context_id: Uuid) -> Result<Context, AppError> {
        self.store
            .find_context(context_id)
            .await?
            .filter(|c| c.profile_id == owner)
            .ok_or_else(|| not_found("Context not found"))
    }

    // ==================== Profiles ====================

    /// Create a profile and its permanent public context.
    #[tracing::instrument(skip(self, email))]
    pub async fn create_profile(&self, email: &str) -> Result<Profile, AppError> {
        let profile = Profile::new(email);
        let public = Context::permanent(profile.profile_id);

        if !self.store.insert_profile(&profile, &public).await? {
            return Err(validation("A profile with this email already exists"));
        }
        tracing::info!(profile_id = %profile.profile_id, "Profile created");
        Ok(profile)
    }

    // ==================== Name variants ====================

    #[tracing::instrument(skip(self, name_text, metadata))]
    pub async fn add_name_variant(
        &self,
        owner: Uuid,
        name_text: &str,
        is_preferred: bool,
        metadata: Option<serde_json::Value>,
    ) -> Result<NameVariant, AppError> {
        let name_text = name_text.trim();
        if name_text.is_empty() || name_text.chars().count() > MAX_NAME_LEN {
            return Err(validation("Name must be 1-200 characters"));
        }
        if metadata.as_ref().is_some_and(|m| !m.is_object()) {
            return Err(validation("Name metadata must be a JSON object"));
        }
        self.require_profile(owner).await?;

        let variant = NameVariant::new(owner, name_text.to_string(), is_preferred, metadata);
        self.store.insert_name_variant(&variant).await?;
        Ok(variant)
    }

    pub async fn list_name_variants(&self, owner: Uuid) -> Result<Vec<NameVariant>, AppError> {
        self.store.list_name_variants(owner).await
    }

    pub async fn set_preferred_variant(&self, owner: Uuid, variant_id: Uuid) -> Result<(), AppError> {
        if self.store.set_preferred_variant(owner, variant_id).await? {
            Ok(())
        } else {
            Err(not_found("Name variant not found"))
        }
    }

    pub async fn delete_name_variant(&self, owner: Uuid, variant_id: Uuid) -> Result<(), AppError> {
        match self.store.delete_name_variant(owner, variant_id).await? {
            VariantDeletion::Deleted => Ok(()),
            VariantDeletion::NotFound => Err(not_found("Name variant not found")),
            VariantDeletion::InUse => Err(validation(
                "Name variant is assigned to a context and cannot be deleted",
            )),
        }
    }

    // ==================== Contexts ====================

    #[tracing::instrument(skip(self, description, request_id))]
    pub async fn create_context(
        &self,
        owner: Uuid,
        name: &str,
        description: Option<String>,
        request_id: &str,
    ) -> Result<Context, AppError> {
        let name = clean_context_name(name)?;
        self.require_profile(owner).await?;

        let context = Context::new(owner, name, description);
        if !self.store.insert_context(&context).await? {
            return Err(validation("A context with this name already exists"));
        }

        self.audit
            .append(
                AuditEntry::new(AuditAction::ContextCreated, Some(owner), Some(owner), Some(context.context_id))
                    .with_request_id(request_id)
                    .with_details(json!({ "contextName": context.context_name })),
            )
            .await;
        Ok(context)
    }

    pub async fn list_contexts(&self, owner: Uuid) -> Result<Vec<ContextView>, AppError> {
        let contexts = self.store.list_contexts(owner).await?;
        let mut views = Vec::with_capacity(contexts.len());
        for context in contexts {
            let assignments = self.store.list_assignments(context.context_id).await?;
            views.push(ContextView {
                context,
                assignments,
            });
        }
        Ok(views)
    }

    pub async fn rename_context(
        &self,
        owner: Uuid,
        context_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Context, AppError> {
        let name = clean_context_name(name)?;
        match self
            .store
            .rename_context(owner, context_id, &name, description)
            .await?
        {
            ContextMutation::Applied(Some(context)) => Ok(context),
            ContextMutation::Applied(None) => self.owned_context(owner, context_id).await,
            ContextMutation::NotFound => Err(not_found("Context not found")),
            ContextMutation::Permanent => Err(validation("The permanent context cannot be renamed")),
            ContextMutation::DuplicateName => {
                Err(validation("A context with this name already exists"))
            }
            ContextMutation::ConsentsBound => Err(validation("Context has bound consents")),
        }
    }

    /// Delete a context. Granted consents bound to it are revoked through the
    /// ledger first so each requester sees a `CONSENT_REVOKED` entry.
    #[tracing::instrument(skip(self, request_id))]
    pub async fn delete_context(
        &self,
        owner: Uuid,
        context_id: Uuid,
        request_id: &str,
    ) -> Result<(), AppError> {
        let context = self.owned_context(owner, context_id).await?;
        if context.is_permanent {
            return Err(validation("The permanent context cannot be deleted"));
        }

        let mut revoked = Vec::new();
        for _ in 0..MAX_DELETE_ATTEMPTS {
            let bound = self.store.list_context_consents(context_id).await?;
            for consent in bound.iter().filter(|c| c.status() == ConsentStatus::Granted) {
                if let TransitionOutcome::Transitioned(c) = self
                    .consents
                    .revoke(owner, consent.requester_id, request_id)
                    .await?
                {
                    revoked.push(c.consent_id);
                }
            }

            match self.store.delete_context(owner, context_id).await? {
                ContextMutation::Applied(_) => {
                    let dropped: Vec<Uuid> = bound
                        .iter()
                        .map(|c| c.consent_id)
                        .filter(|id| !revoked.contains(id))
                        .collect();
                    self.audit
                        .append(
                            AuditEntry::new(AuditAction::ContextDeleted, Some(owner), Some(owner), Some(context_id))
                                .with_request_id(request_id)
                                .with_details(json!({
                                    "contextName": context.context_name,
                                    "revokedConsentIds": revoked,
                                    "droppedConsentIds": dropped,
                                })),
                        )
                        .await;
                    return Ok(());
                }
                // A consent was granted between the revoke pass and the delete.
                ContextMutation::ConsentsBound => continue,
                ContextMutation::Permanent => {
                    return Err(validation("The permanent context cannot be deleted"))
                }
                ContextMutation::NotFound | ContextMutation::DuplicateName => {
                    return Err(not_found("Context not found"))
                }
            }
        }

        tracing::warn!(%context_id, "Context delete kept racing with consent grants");
        Err(validation("Consents on this context changed concurrently, please retry"))
    }

    // ==================== Assignments ====================

    pub async fn assign_name(
        &self,
        owner: Uuid,
        context_id: Uuid,
        property: IdentityProperty,
        variant_id: Uuid,
        is_primary: bool,
    ) -> Result<ContextAssignment, AppError> {
        let context = self.owned_context(owner, context_id).await?;
        self.store
            .find_name_variant(variant_id)
            .await?
            .filter(|v| v.profile_id == owner)
            .ok_or_else(|| not_found("Name variant not found"))?;

        let assignment = ContextAssignment::new(context.context_id, property, variant_id, is_primary);
        self.store.upsert_assignment(&assignment).await?;
        Ok(assignment)
    }

    pub async fn remove_assignment(
        &self,
        owner: Uuid,
        context_id: Uuid,
        property: IdentityProperty,
    ) -> Result<(), AppError> {
        let context = self.owned_context(owner, context_id).await?;
        if self
            .store
            .remove_assignment(context.context_id, property.as_str())
            .await?
        {
            Ok(())
        } else {
            Err(not_found("No name is assigned to this property"))
        }
    }
}
