//! Services layer for identity-service.
//!
//! Context Store, Consent Ledger, Name Resolver, Session/Token Issuer and Audit
//! Logger, each holding an `Arc<dyn IdentityStore>`.

pub mod audit;
pub mod consent;
pub mod contexts;
pub mod issuer;
mod jwt;
pub mod metrics;
pub mod resolver;

pub use audit::AuditLogger;
pub use consent::{ConsentLedger, TransitionOutcome};
pub use contexts::{ContextService, ContextView};
pub use issuer::{origin_domain, ClaimSet, Exchange, IssuedToken, TokenIssuer};
pub use jwt::{BearerClaims, JwtService, SignedBearer};
pub use resolver::{ContextSelector, NameResolver, Resolution, ResolutionSource};
