//! Persistence seam for identity-service.
//!
//! Every mutating method is a single atomic store operation: one SQL statement or
//! one transaction in `PgStore`, one critical section in `MemoryStore`. A cancelled
//! call therefore never leaves partial state behind.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    AuditAction, AuditEntry, AuthSession, BearerToken, ClientRegistration, ConsentGrant,
    ConsentStatus, Context, ContextAssignment, NameVariant, Profile,
};

pub use memory::{FaultPoint, MemoryStore};
pub use postgres::PgStore;

/// Result of deleting a name variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantDeletion {
    Deleted,
    NotFound,
    /// Still referenced by a context assignment.
    InUse,
}

/// Result of renaming or deleting a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextMutation {
    Applied(Option<Context>),
    NotFound,
    Permanent,
    DuplicateName,
    /// A granted consent is still bound to the context.
    ConsentsBound,
}

/// Filters for an audit query. `subject_id` matches either the actor or the target.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub subject_id: Uuid,
    pub action: Option<AuditAction>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl AuditQuery {
    pub(crate) fn matches(&self, entry: &AuditEntry) -> bool {
        self.involves(entry)
            && self
                .action
                .is_none_or(|action| entry.action_code == action.as_str())
            && self.date_from.is_none_or(|from| entry.created_utc >= from)
            && self.date_to.is_none_or(|to| entry.created_utc <= to)
    }

    pub(crate) fn involves(&self, entry: &AuditEntry) -> bool {
        entry.actor_id == Some(self.subject_id) || entry.target_id == Some(self.subject_id)
    }
}

/// One page of audit entries, newest first.
#[derive(Debug, Clone)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    /// Entries involving the subject, ignoring filters.
    pub total: i64,
    /// Entries matching every filter, ignoring pagination.
    pub filtered: i64,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // ==================== Profiles ====================

    /// Insert a profile together with its permanent context.
    /// Returns false if the email is already registered.
    async fn insert_profile(&self, profile: &Profile, permanent: &Context)
        -> Result<bool, AppError>;

    async fn find_profile(&self, profile_id: Uuid) -> Result<Option<Profile>, AppError>;

    // ==================== Name variants ====================

    /// Insert a variant. A preferred variant clears the flag on the owner's others.
    async fn insert_name_variant(&self, variant: &NameVariant) -> Result<(), AppError>;

    async fn find_name_variant(&self, variant_id: Uuid) -> Result<Option<NameVariant>, AppError>;

    /// All variants of a profile, oldest first.
    async fn list_name_variants(&self, profile_id: Uuid) -> Result<Vec<NameVariant>, AppError>;

    /// The preferred variant, or the oldest-created one when none is flagged.
    async fn find_fallback_variant(&self, profile_id: Uuid)
        -> Result<Option<NameVariant>, AppError>;

    /// Flag one variant preferred. Returns false if the owner has no such variant.
    async fn set_preferred_variant(
        &self,
        profile_id: Uuid,
        variant_id: Uuid,
    ) -> Result<bool, AppError>;

    async fn delete_name_variant(
        &self,
        profile_id: Uuid,
        variant_id: Uuid,
    ) -> Result<VariantDeletion, AppError>;

    // ==================== Contexts ====================

    /// Insert a context. Returns false if the owner already has one with that name.
    async fn insert_context(&self, context: &Context) -> Result<bool, AppError>;

    async fn find_context(&self, context_id: Uuid) -> Result<Option<Context>, AppError>;

    /// Case-insensitive lookup by name.
    async fn find_context_by_name(
        &self,
        profile_id: Uuid,
        context_name: &str,
    ) -> Result<Option<Context>, AppError>;

    async fn find_permanent_context(&self, profile_id: Uuid) -> Result<Option<Context>, AppError>;

    async fn list_contexts(&self, profile_id: Uuid) -> Result<Vec<Context>, AppError>;

    /// Rename a context. The permanent context is never modified.
    async fn rename_context(
        &self,
        profile_id: Uuid,
        context_id: Uuid,
        context_name: &str,
        description: Option<&str>,
    ) -> Result<ContextMutation, AppError>;

    /// Delete a context with its assignments and the pending or revoked consents
    /// bound to it. Refused while a granted consent is bound, and the permanent
    /// context is never deleted.
    async fn delete_context(
        &self,
        profile_id: Uuid,
        context_id: Uuid,
    ) -> Result<ContextMutation, AppError>;

    // ==================== Assignments ====================

    /// Insert or replace the assignment for (context, property). A primary
    /// assignment demotes the context's previous primary.
    async fn upsert_assignment(&self, assignment: &ContextAssignment) -> Result<(), AppError>;

    /// Returns false if nothing was assigned to that property.
    async fn remove_assignment(&self, context_id: Uuid, property_code: &str)
        -> Result<bool, AppError>;

    async fn list_assignments(&self, context_id: Uuid)
        -> Result<Vec<ContextAssignment>, AppError>;

    /// The variant behind the context's primary assignment.
    async fn find_primary_variant(&self, context_id: Uuid)
        -> Result<Option<NameVariant>, AppError>;

    // ==================== Consent ====================

    async fn find_consent(
        &self,
        granter_id: Uuid,
        requester_id: Uuid,
    ) -> Result<Option<ConsentGrant>, AppError>;

    /// Every consent record bound to a context.
    async fn list_context_consents(&self, context_id: Uuid)
        -> Result<Vec<ConsentGrant>, AppError>;

    /// Store a pending request. With `replacing`, the prior record for the pair is
    /// overwritten only if its status, creation time and expiry are still as
    /// observed; otherwise nothing is written and `None` is returned. Without it,
    /// the insert fails the same way if a record for the pair appeared concurrently.
    async fn save_consent_request(
        &self,
        request: &ConsentGrant,
        replacing: Option<&ConsentGrant>,
    ) -> Result<Option<ConsentGrant>, AppError>;

    /// Compare-and-set transition keyed on (granter, requester, expected status).
    /// Stamps `granted_utc` or `revoked_utc` according to `to`.
    async fn transition_consent(
        &self,
        granter_id: Uuid,
        requester_id: Uuid,
        from: ConsentStatus,
        to: ConsentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<ConsentGrant>, AppError>;

    // ==================== Clients ====================

    /// Idempotent upsert keyed by client id. Refreshes the display name.
    async fn upsert_client(&self, client: &ClientRegistration)
        -> Result<ClientRegistration, AppError>;

    async fn find_client(&self, client_id: &str) -> Result<Option<ClientRegistration>, AppError>;

    // ==================== Sessions and tokens ====================

    async fn insert_auth_session(&self, session: &AuthSession) -> Result<(), AppError>;

    async fn find_auth_session(&self, token_hash: &str) -> Result<Option<AuthSession>, AppError>;

    /// Mark the session used and record the bearer token in one step. Succeeds
    /// only while the session is unused and unexpired at `now`.
    async fn redeem_auth_session(
        &self,
        token_hash: &str,
        bearer: &BearerToken,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthSession>, AppError>;

    async fn find_bearer_token(&self, token_hash: &str) -> Result<Option<BearerToken>, AppError>;

    // ==================== Audit ====================

    /// Append an entry. Re-appending the same entry id is a no-op.
    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), AppError>;

    async fn query_audit_entries(&self, query: &AuditQuery) -> Result<AuditPage, AppError>;
}
