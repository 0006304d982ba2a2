//! In-memory `IdentityStore` for tests and local development.
//!
//! All state sits behind one mutex, so each method is atomic exactly like the
//! single-statement writes in `PgStore`. Faults can be injected per operation to
//! exercise degradation paths.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

use super::{AuditPage, AuditQuery, ContextMutation, IdentityStore, VariantDeletion};
use crate::models::{
    AuditEntry, AuthSession, BearerToken, ClientRegistration, ConsentGrant, ConsentStatus,
    Context, ContextAssignment, NameVariant, Profile,
};

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    FindProfile,
    FindConsent,
    FindContextByName,
    FindPrimaryVariant,
    FindFallbackVariant,
    AppendAudit,
}

#[derive(Default)]
struct State {
    profiles: HashMap<Uuid, Profile>,
    variants: Vec<NameVariant>,
    contexts: Vec<Context>,
    assignments: Vec<ContextAssignment>,
    consents: Vec<ConsentGrant>,
    clients: HashMap<String, ClientRegistration>,
    sessions: Vec<AuthSession>,
    bearer_tokens: Vec<BearerToken>,
    audit: Vec<AuditEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    faults: Mutex<HashMap<FaultPoint, u32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls at `point` fail with a database error.
    pub fn inject_fault(&self, point: FaultPoint, count: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(point, count);
        }
    }

    /// Number of audit entries written so far.
    pub fn audit_len(&self) -> usize {
        self.state.lock().map(|s| s.audit.len()).unwrap_or(0)
    }

    /// Every audit entry in append order.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.lock().map(|s| s.audit.clone()).unwrap_or_default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, AppError> {
        self.state
            .lock()
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Memory store mutex poisoned: {}", e)))
    }

    fn trip(&self, point: FaultPoint) -> Result<(), AppError> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Fault table poisoned: {}", e)))?;
        match faults.get_mut(&point) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Injected fault at {:?}",
                    point
                )))
            }
            _ => Ok(()),
        }
    }
}

fn oldest_first(a: &NameVariant, b: &NameVariant) -> std::cmp::Ordering {
    a.created_utc
        .cmp(&b.created_utc)
        .then(a.variant_id.cmp(&b.variant_id))
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.state().map(|_| ())
    }

    async fn insert_profile(
        &self,
        profile: &Profile,
        permanent: &Context,
    ) -> Result<bool, AppError> {
        let mut state = self.state()?;
        if state.profiles.values().any(|p| p.email == profile.email) {
            return Ok(false);
        }
        state.profiles.insert(profile.profile_id, profile.clone());
        state.contexts.push(permanent.clone());
        Ok(true)
    }

    async fn find_profile(&self, profile_id: Uuid) -> Result<Option<Profile>, AppError> {
        self.trip(FaultPoint::FindProfile)?;
        Ok(self.state()?.profiles.get(&profile_id).cloned())
    }

    async fn insert_name_variant(&self, variant: &NameVariant) -> Result<(), AppError> {
        let mut state = self.state()?;
        if variant.is_preferred {
            for other in state
                .variants
                .iter_mut()
                .filter(|v| v.profile_id == variant.profile_id)
            {
                other.is_preferred = false;
            }
        }
        state.variants.push(variant.clone());
        Ok(())
    }

    async fn find_name_variant(&self, variant_id: Uuid) -> Result<Option<NameVariant>, AppError> {
        Ok(self
            .state()?
            .variants
            .iter()
            .find(|v| v.variant_id == variant_id)
            .cloned())
    }

    async fn list_name_variants(&self, profile_id: Uuid) -> Result<Vec<NameVariant>, AppError> {
        let mut variants: Vec<_> = self
            .state()?
            .variants
            .iter()
            .filter(|v| v.profile_id == profile_id)
            .cloned()
            .collect();
        variants.sort_by(oldest_first);
        Ok(variants)
    }

    async fn find_fallback_variant(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<NameVariant>, AppError> {
        self.trip(FaultPoint::FindFallbackVariant)?;
        let state = self.state()?;
        let owned = state.variants.iter().filter(|v| v.profile_id == profile_id);

        if let Some(preferred) = owned.clone().find(|v| v.is_preferred) {
            return Ok(Some(preferred.clone()));
        }
        Ok(owned.min_by(|a, b| oldest_first(a, b)).cloned())
    }

    async fn set_preferred_variant(
        &self,
        profile_id: Uuid,
        variant_id: Uuid,
    ) -> Result<bool, AppError> {
        let mut state = self.state()?;
        let exists = state
            .variants
            .iter()
            .any(|v| v.profile_id == profile_id && v.variant_id == variant_id);
        if !exists {
            return Ok(false);
        }

        let now = Utc::now();
        for variant in state.variants.iter_mut().filter(|v| v.profile_id == profile_id) {
            let preferred = variant.variant_id == variant_id;
            if variant.is_preferred != preferred {
                variant.is_preferred = preferred;
                variant.updated_utc = now;
            }
        }
        Ok(true)
    }

    async fn delete_name_variant(
        &self,
        profile_id: Uuid,
        variant_id: Uuid,
    ) -> Result<VariantDeletion, AppError> {
        let mut state = self.state()?;
        let Some(index) = state
            .variants
            .iter()
            .position(|v| v.profile_id == profile_id && v.variant_id == variant_id)
        else {
            return Ok(VariantDeletion::NotFound);
        };

        if state.assignments.iter().any(|a| a.variant_id == variant_id) {
            return Ok(VariantDeletion::InUse);
        }

        state.variants.remove(index);
        Ok(VariantDeletion::Deleted)
    }

    async fn insert_context(&self, context: &Context) -> Result<bool, AppError> {
        let mut state = self.state()?;
        let clash = state.contexts.iter().any(|c| {
            c.profile_id == context.profile_id
                && (same_name(&c.context_name, &context.context_name)
                    || (c.is_permanent && context.is_permanent))
        });
        if clash {
            return Ok(false);
        }
        state.contexts.push(context.clone());
        Ok(true)
    }

    async fn find_context(&self, context_id: Uuid) -> Result<Option<Context>, AppError> {
        Ok(self
            .state()?
            .contexts
            .iter()
            .find(|c| c.context_id == context_id)
            .cloned())
    }

    async fn find_context_by_name(
        &self,
        profile_id: Uuid,
        context_name: &str,
    ) -> Result<Option<Context>, AppError> {
        self.trip(FaultPoint::FindContextByName)?;
        Ok(self
            .state()?
            .contexts
            .iter()
            .find(|c| c.profile_id == profile_id && same_name(&c.context_name, context_name))
            .cloned())
    }

    async fn find_permanent_context(&self, profile_id: Uuid) -> Result<Option<Context>, AppError> {
        Ok(self
            .state()?
            .contexts
            .iter()
            .find(|c| c.profile_id == profile_id && c.is_permanent)
            .cloned())
    }

    async fn list_contexts(&self, profile_id: Uuid) -> Result<Vec<Context>, AppError> {
        let mut contexts: Vec<_> = self
            .state()?
            .contexts
            .iter()
            .filter(|c| c.profile_id == profile_id)
            .cloned()
            .collect();
        contexts.sort_by(|a, b| {
            b.is_permanent
                .cmp(&a.is_permanent)
                .then(a.created_utc.cmp(&b.created_utc))
        });
        Ok(contexts)
    }

    async fn rename_context(
        &self,
        profile_id: Uuid,
        context_id: Uuid,
        context_name: &str,
        description: Option<&str>,
    ) -> Result<ContextMutation, AppError> {
        let mut state = self.state()?;
        let duplicate = state.contexts.iter().any(|c| {
            c.profile_id == profile_id
                && c.context_id != context_id
                && same_name(&c.context_name, context_name)
        });

        let Some(context) = state
            .contexts
            .iter_mut()
            .find(|c| c.profile_id == profile_id && c.context_id == context_id)
        else {
            return Ok(ContextMutation::NotFound);
        };
        if context.is_permanent {
            return Ok(ContextMutation::Permanent);
        }
        if duplicate {
            return Ok(ContextMutation::DuplicateName);
        }

        context.context_name = context_name.to_string();
        if let Some(description) = description {
            context.description = Some(description.to_string());
        }
        Ok(ContextMutation::Applied(Some(context.clone())))
    }

    async fn delete_context(
        &self,
        profile_id: Uuid,
        context_id: Uuid,
    ) -> Result<ContextMutation, AppError> {
        let mut state = self.state()?;
        let Some(index) = state
            .contexts
            .iter()
            .position(|c| c.profile_id == profile_id && c.context_id == context_id)
        else {
            return Ok(ContextMutation::NotFound);
        };
        if state.contexts[index].is_permanent {
            return Ok(ContextMutation::Permanent);
        }
        let granted = ConsentStatus::Granted.as_str();
        if state
            .consents
            .iter()
            .any(|c| c.context_id == context_id && c.status_code == granted)
        {
            return Ok(ContextMutation::ConsentsBound);
        }

        state.contexts.remove(index);
        state.assignments.retain(|a| a.context_id != context_id);
        state.consents.retain(|c| c.context_id != context_id);
        state.sessions.retain(|s| s.context_id != context_id);
        state.bearer_tokens.retain(|t| t.context_id != context_id);
        Ok(ContextMutation::Applied(None))
    }

    async fn upsert_assignment(&self, assignment: &ContextAssignment) -> Result<(), AppError> {
        let mut state = self.state()?;
        if assignment.is_primary {
            for other in state
                .assignments
                .iter_mut()
                .filter(|a| a.context_id == assignment.context_id)
            {
                other.is_primary = false;
            }
        }

        match state.assignments.iter_mut().find(|a| {
            a.context_id == assignment.context_id && a.property_code == assignment.property_code
        }) {
            Some(existing) => {
                existing.variant_id = assignment.variant_id;
                existing.is_primary = assignment.is_primary;
            }
            None => state.assignments.push(assignment.clone()),
        }
        Ok(())
    }

    async fn remove_assignment(
        &self,
        context_id: Uuid,
        property_code: &str,
    ) -> Result<bool, AppError> {
        let mut state = self.state()?;
        let before = state.assignments.len();
        state
            .assignments
            .retain(|a| !(a.context_id == context_id && a.property_code == property_code));
        Ok(state.assignments.len() != before)
    }

    async fn list_assignments(
        &self,
        context_id: Uuid,
    ) -> Result<Vec<ContextAssignment>, AppError> {
        let mut assignments: Vec<_> = self
            .state()?
            .assignments
            .iter()
            .filter(|a| a.context_id == context_id)
            .cloned()
            .collect();
        assignments.sort_by(|a, b| a.property_code.cmp(&b.property_code));
        Ok(assignments)
    }

    async fn find_primary_variant(
        &self,
        context_id: Uuid,
    ) -> Result<Option<NameVariant>, AppError> {
        self.trip(FaultPoint::FindPrimaryVariant)?;
        let state = self.state()?;
        let variant = state
            .assignments
            .iter()
            .find(|a| a.context_id == context_id && a.is_primary)
            .and_then(|a| state.variants.iter().find(|v| v.variant_id == a.variant_id))
            .cloned();
        Ok(variant)
    }

    async fn find_consent(
        &self,
        granter_id: Uuid,
        requester_id: Uuid,
    ) -> Result<Option<ConsentGrant>, AppError> {
        self.trip(FaultPoint::FindConsent)?;
        Ok(self
            .state()?
            .consents
            .iter()
            .find(|c| c.granter_id == granter_id && c.requester_id == requester_id)
            .cloned())
    }

    async fn list_context_consents(
        &self,
        context_id: Uuid,
    ) -> Result<Vec<ConsentGrant>, AppError> {
        Ok(self
            .state()?
            .consents
            .iter()
            .filter(|c| c.context_id == context_id)
            .cloned()
            .collect())
    }

    async fn save_consent_request(
        &self,
        request: &ConsentGrant,
        replacing: Option<&ConsentGrant>,
    ) -> Result<Option<ConsentGrant>, AppError> {
        let mut state = self.state()?;
        let existing = state.consents.iter_mut().find(|c| {
            c.granter_id == request.granter_id && c.requester_id == request.requester_id
        });

        match (existing, replacing) {
            (None, None) => {
                state.consents.push(request.clone());
                Ok(Some(request.clone()))
            }
            (Some(current), Some(prior))
                if current.consent_id == prior.consent_id
                    && current.status_code == prior.status_code
                    && current.created_utc == prior.created_utc
                    && current.expiry_utc == prior.expiry_utc =>
            {
                current.context_id = request.context_id;
                current.status_code = request.status_code.clone();
                current.created_utc = request.created_utc;
                current.granted_utc = None;
                current.revoked_utc = None;
                current.expiry_utc = request.expiry_utc;
                Ok(Some(current.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn transition_consent(
        &self,
        granter_id: Uuid,
        requester_id: Uuid,
        from: ConsentStatus,
        to: ConsentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<ConsentGrant>, AppError> {
        let mut state = self.state()?;
        let Some(consent) = state.consents.iter_mut().find(|c| {
            c.granter_id == granter_id
                && c.requester_id == requester_id
                && c.status_code == from.as_str()
        }) else {
            return Ok(None);
        };

        consent.status_code = to.as_str().to_string();
        match to {
            ConsentStatus::Granted => consent.granted_utc = Some(at),
            ConsentStatus::Revoked => consent.revoked_utc = Some(at),
            ConsentStatus::Pending => {}
        }
        Ok(Some(consent.clone()))
    }

    async fn upsert_client(
        &self,
        client: &ClientRegistration,
    ) -> Result<ClientRegistration, AppError> {
        let mut state = self.state()?;
        let stored = state
            .clients
            .entry(client.client_id.clone())
            .and_modify(|existing| {
                existing.display_name = client.display_name.clone();
                existing.updated_utc = client.updated_utc;
            })
            .or_insert_with(|| client.clone());
        Ok(stored.clone())
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<ClientRegistration>, AppError> {
        Ok(self.state()?.clients.get(client_id).cloned())
    }

    async fn insert_auth_session(&self, session: &AuthSession) -> Result<(), AppError> {
        self.state()?.sessions.push(session.clone());
        Ok(())
    }

    async fn find_auth_session(&self, token_hash: &str) -> Result<Option<AuthSession>, AppError> {
        Ok(self
            .state()?
            .sessions
            .iter()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn redeem_auth_session(
        &self,
        token_hash: &str,
        bearer: &BearerToken,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthSession>, AppError> {
        let mut state = self.state()?;
        let Some(session) = state
            .sessions
            .iter_mut()
            .find(|s| s.token_hash == token_hash && s.used_utc.is_none() && !s.is_expired(now))
        else {
            return Ok(None);
        };

        session.used_utc = Some(now);
        let redeemed = session.clone();
        state.bearer_tokens.push(bearer.clone());
        Ok(Some(redeemed))
    }

    async fn find_bearer_token(&self, token_hash: &str) -> Result<Option<BearerToken>, AppError> {
        Ok(self
            .state()?
            .bearer_tokens
            .iter()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), AppError> {
        self.trip(FaultPoint::AppendAudit)?;
        let mut state = self.state()?;
        if !state.audit.iter().any(|e| e.entry_id == entry.entry_id) {
            state.audit.push(entry.clone());
        }
        Ok(())
    }

    async fn query_audit_entries(&self, query: &AuditQuery) -> Result<AuditPage, AppError> {
        let state = self.state()?;
        let total = state.audit.iter().filter(|e| query.involves(e)).count() as i64;

        let mut matching: Vec<_> = state.audit.iter().filter(|e| query.matches(e)).collect();
        matching.sort_by(|a, b| {
            b.created_utc
                .cmp(&a.created_utc)
                .then(b.entry_id.cmp(&a.entry_id))
        });
        let filtered = matching.len() as i64;

        let entries = matching
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .cloned()
            .collect();

        Ok(AuditPage {
            entries,
            total,
            filtered,
        })
    }
}
