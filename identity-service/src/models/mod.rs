//! Domain models for identity-service.

pub mod audit_entry;
pub mod auth_session;
pub mod bearer_token;
pub mod client;
pub mod consent;
pub mod context;
pub mod name_variant;
pub mod profile;

pub use audit_entry::{AuditAction, AuditEntry, AuditEntryResponse};
pub use auth_session::AuthSession;
pub use bearer_token::BearerToken;
pub use client::{derive_client_id, ClientRegistration};
pub use consent::{ConsentGrant, ConsentStatus, EffectiveConsentStatus};
pub use context::{Context, ContextAssignment, IdentityProperty, PERMANENT_CONTEXT_NAME};
pub use name_variant::NameVariant;
pub use profile::Profile;
