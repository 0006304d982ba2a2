//! Session/Token Issuer - the authorization handshake for third-party applications.
//!
//! register client -> create one-time session -> exchange for bearer -> resolve
//! claims with the bearer until it expires.

use std::sync::Arc;

use axum::http::Uri;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use super::audit::AuditLogger;
use super::jwt::{BearerClaims, JwtService};
use super::metrics::{CLAIMS_RESOLUTIONS_TOTAL, TOKEN_EXCHANGES_TOTAL};
use super::resolver::{ContextSelector, NameResolver, Resolution, ResolutionSource};
use crate::models::{
    AuditAction, AuditEntry, AuthSession, BearerToken, ClientRegistration, IdentityProperty,
};
use crate::store::IdentityStore;

const SESSION_TOKEN_BYTES: usize = 32;
const MAX_STATE_LEN: usize = 512;

/// Token returned by a successful exchange.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

/// A successful exchange together with the session it consumed.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub token: IssuedToken,
    pub session: AuthSession,
}

/// OIDC-like claim set returned for a bearer token.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimSet {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub jti: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoneinfo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    pub name_source: ResolutionSource,
}

/// Optional claims taken from the bound context's property assignments.
#[derive(Debug, Default)]
struct PropertyClaims {
    given_name: Option<String>,
    family_name: Option<String>,
    nickname: Option<String>,
    preferred_username: Option<String>,
}

/// Extract the origin domain from an absolute http(s) URL.
pub fn origin_domain(url: &str) -> Result<String, AppError> {
    let invalid = || AppError::ValidationError(anyhow::anyhow!("returnUrl must be an absolute http(s) URL"));

    let uri: Uri = url.parse().map_err(|_| invalid())?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(invalid()),
    }
    uri.host()
        .filter(|h| !h.is_empty())
        .map(|h| h.to_lowercase())
        .ok_or_else(invalid)
}

fn generate_session_token() -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    rng.fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn auth_failed(msg: &'static str) -> AppError {
    AppError::AuthFailed(anyhow::anyhow!(msg))
}

pub struct TokenIssuer {
    store: Arc<dyn IdentityStore>,
    resolver: Arc<NameResolver>,
    jwt: JwtService,
    audit: Arc<AuditLogger>,
    session_ttl: Duration,
    claims_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        resolver: Arc<NameResolver>,
        jwt: JwtService,
        audit: Arc<AuditLogger>,
        session_ttl: Duration,
        claims_ttl: Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            jwt,
            audit,
            session_ttl,
            claims_ttl,
        }
    }

    /// Register (or refresh) the client for an origin domain.
    #[tracing::instrument(skip(self))]
    pub async fn register_client(
        &self,
        origin_domain: Option<&str>,
        app_name: &str,
    ) -> Result<ClientRegistration, AppError> {
        let domain = origin_domain
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| AppError::ValidationError(anyhow::anyhow!("An origin domain is required")))?;

        let client = self
            .store
            .upsert_client(&ClientRegistration::new(domain, app_name))
            .await?;
        tracing::debug!(client_id = %client.client_id, "Client registered");
        Ok(client)
    }

    /// Create a one-time session. Returns the raw session token, which is never stored.
    #[tracing::instrument(skip(self, return_url, state, request_id))]
    pub async fn create_authorization_session(
        &self,
        profile_id: Uuid,
        client_id: &str,
        context_id: Uuid,
        return_url: &str,
        state: &str,
        request_id: &str,
    ) -> Result<(String, AuthSession), AppError> {
        if state.is_empty() || state.len() > MAX_STATE_LEN {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "state must be 1-512 characters"
            )));
        }
        origin_domain(return_url)?;

        if self.store.find_client(client_id).await?.is_none() {
            return Err(AppError::ValidationError(anyhow::anyhow!("Unknown client")));
        }
        self.store
            .find_context(context_id)
            .await?
            .filter(|c| c.profile_id == profile_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Context not found")))?;

        let session_token = generate_session_token();
        let session = AuthSession::new(
            &session_token,
            client_id.to_string(),
            profile_id,
            context_id,
            return_url.to_string(),
            state.to_string(),
            self.session_ttl,
        );
        self.store.insert_auth_session(&session).await?;

        self.audit
            .append(
                AuditEntry::new(
                    AuditAction::AuthorizationSessionCreated,
                    Some(profile_id),
                    Some(profile_id),
                    Some(context_id),
                )
                .with_request_id(request_id)
                .with_details(json!({
                    "clientId": client_id,
                    "sessionId": session.session_id,
                    "expiresAt": session.expiry_utc,
                })),
            )
            .await;

        Ok((session_token, session))
    }

    /// Exchange a session token for a bearer token. Works at most once per session.
    #[tracing::instrument(skip(self, session_token, request_id))]
    pub async fn exchange_session(
        &self,
        session_token: &str,
        request_id: &str,
    ) -> Result<Exchange, AppError> {
        let token_hash = AuthSession::hash_token(session_token);
        let now = Utc::now();

        let session = match self.store.find_auth_session(&token_hash).await? {
            None => return Err(self.exchange_failed(None, "unknown_session", request_id).await),
            Some(s) if s.is_used() => {
                return Err(self.exchange_failed(Some(&s), "already_used", request_id).await)
            }
            Some(s) if s.is_expired(now) => {
                return Err(self.exchange_failed(Some(&s), "expired", request_id).await)
            }
            Some(s) => s,
        };

        let signed = self
            .jwt
            .issue_bearer(session.profile_id, &session.client_id, session.context_id)
            .map_err(AppError::InternalError)?;
        let bearer = BearerToken::for_session(
            signed.token_id,
            &signed.token,
            &session,
            signed.issued_at,
            signed.expires_at,
        );

        // Lost a race with a concurrent exchange if this comes back empty.
        let Some(session) = self
            .store
            .redeem_auth_session(&token_hash, &bearer, now)
            .await?
        else {
            return Err(self.exchange_failed(Some(&session), "already_used", request_id).await);
        };

        TOKEN_EXCHANGES_TOTAL.with_label_values(&["issued"]).inc();
        self.audit
            .append(
                AuditEntry::new(
                    AuditAction::TokenIssued,
                    Some(session.profile_id),
                    Some(session.profile_id),
                    Some(session.context_id),
                )
                .with_request_id(request_id)
                .with_details(json!({
                    "clientId": session.client_id,
                    "sessionId": session.session_id,
                    "tokenId": bearer.token_id,
                    "expiresAt": bearer.expiry_utc,
                })),
            )
            .await;

        tracing::info!(client_id = %session.client_id, "Bearer token issued");
        Ok(Exchange {
            token: IssuedToken {
                access_token: signed.token,
                token_type: "Bearer",
                expires_in: (signed.expires_at - signed.issued_at).num_seconds(),
            },
            session,
        })
    }

    async fn exchange_failed(
        &self,
        session: Option<&AuthSession>,
        reason: &'static str,
        request_id: &str,
    ) -> AppError {
        TOKEN_EXCHANGES_TOTAL.with_label_values(&[reason]).inc();
        tracing::warn!(reason, "Session exchange refused");

        let profile_id = session.map(|s| s.profile_id);
        self.audit
            .append(
                AuditEntry::new(
                    AuditAction::TokenExchangeFailed,
                    profile_id,
                    profile_id,
                    session.map(|s| s.context_id),
                )
                .with_request_id(request_id)
                .with_details(json!({
                    "reason": reason,
                    "clientId": session.map(|s| s.client_id.as_str()),
                })),
            )
            .await;

        auth_failed("Invalid, expired, or already used session token")
    }

    /// Validate a bearer token and resolve the claims for its bound profile and context.
    ///
    /// Appends exactly one audit entry per call.
    #[tracing::instrument(skip(self, token, request_id))]
    pub async fn resolve_bearer(&self, token: &str, request_id: &str) -> Result<ClaimSet, AppError> {
        if token.is_empty() {
            return Err(self.claims_failed(None, "missing_token", request_id).await);
        }
        let claims = match self.jwt.validate_bearer(token) {
            Ok(claims) => claims,
            Err(e) => {
                let reason = match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => "token_expired",
                    _ => "invalid_token",
                };
                return Err(self.claims_failed(None, reason, request_id).await);
            }
        };

        let record = match self.store.find_bearer_token(&BearerToken::hash_token(token)).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(self.claims_failed(Some(&claims), "unknown_token", request_id).await),
            Err(e) => {
                self.claims_failed_with(Some(&claims), "internal_error", request_id).await;
                return Err(e);
            }
        };
        let bound = record.profile_id.to_string() == claims.sub
            && record.client_id == claims.aud
            && record.context_id.to_string() == claims.ctx;
        if !bound {
            return Err(self.claims_failed(Some(&claims), "binding_mismatch", request_id).await);
        }
        if record.is_expired(Utc::now()) {
            return Err(self.claims_failed(Some(&claims), "token_expired", request_id).await);
        }

        let resolution = match self
            .resolver
            .resolve(
                record.profile_id,
                None,
                Some(&ContextSelector::Id(record.context_id)),
                Utc::now(),
            )
            .await
        {
            Ok(resolution) => resolution,
            Err(e) => {
                let reason = e.code().as_str().to_lowercase();
                self.claims_failed_with(Some(&claims), &reason, request_id).await;
                return Err(e);
            }
        };

        let claim_set = self.build_claims(&record, &resolution).await;

        CLAIMS_RESOLUTIONS_TOTAL.with_label_values(&["resolved"]).inc();
        self.audit
            .append(
                AuditEntry::new(
                    AuditAction::ClaimsResolved,
                    Some(record.profile_id),
                    Some(record.profile_id),
                    Some(record.context_id),
                )
                .with_resolved_name(resolution.name.clone())
                .with_request_id(request_id)
                .with_details(json!({
                    "clientId": record.client_id,
                    "appName": claim_set.app_name,
                    "source": resolution.source,
                    "tokenId": record.token_id,
                    "jti": claim_set.jti,
                })),
            )
            .await;

        Ok(claim_set)
    }

    async fn build_claims(&self, record: &BearerToken, resolution: &Resolution) -> ClaimSet {
        let iat = Utc::now();
        let exp = iat + self.claims_ttl;

        let context_name = match self.store.find_context(record.context_id).await {
            Ok(ctx) => ctx.map(|c| c.context_name),
            Err(e) => {
                tracing::warn!(error = %e, "Context lookup failed while building claims");
                None
            }
        };
        let app_name = match self.store.find_client(&record.client_id).await {
            Ok(client) => client.map(|c| c.display_name),
            Err(e) => {
                tracing::warn!(error = %e, "Client lookup failed while building claims");
                None
            }
        };
        let properties = self.property_claims(record.context_id).await;

        ClaimSet {
            sub: record.profile_id.to_string(),
            iss: self.jwt.issuer().to_string(),
            aud: record.client_id.clone(),
            iat: iat.timestamp(),
            exp: exp.timestamp(),
            nbf: iat.timestamp(),
            jti: Uuid::new_v4().to_string(),
            name: resolution.name.clone(),
            given_name: properties.given_name,
            family_name: properties.family_name,
            nickname: properties.nickname,
            preferred_username: properties.preferred_username,
            locale: resolution.variant.locale(),
            zoneinfo: resolution.variant.zoneinfo(),
            context_name,
            app_name,
            name_source: resolution.source,
        }
    }

    /// Optional claims are best effort; lookup failures leave them out.
    async fn property_claims(&self, context_id: Uuid) -> PropertyClaims {
        let mut claims = PropertyClaims::default();
        let assignments = match self.store.list_assignments(context_id).await {
            Ok(assignments) => assignments,
            Err(e) => {
                tracing::warn!(error = %e, "Assignment lookup failed while building claims");
                return claims;
            }
        };

        for assignment in assignments {
            let slot = match assignment.property() {
                Some(IdentityProperty::GivenName) => &mut claims.given_name,
                Some(IdentityProperty::FamilyName) => &mut claims.family_name,
                Some(IdentityProperty::Nickname) => &mut claims.nickname,
                Some(IdentityProperty::PreferredUsername) => &mut claims.preferred_username,
                _ => continue,
            };
            match self.store.find_name_variant(assignment.variant_id).await {
                Ok(variant) => *slot = variant.map(|v| v.name_text),
                Err(e) => tracing::warn!(error = %e, "Variant lookup failed while building claims"),
            }
        }
        claims
    }

    async fn claims_failed(
        &self,
        claims: Option<&BearerClaims>,
        reason: &'static str,
        request_id: &str,
    ) -> AppError {
        self.claims_failed_with(claims, reason, request_id).await;
        auth_failed("Invalid or expired bearer token")
    }

    async fn claims_failed_with(&self, claims: Option<&BearerClaims>, reason: &str, request_id: &str) {
        CLAIMS_RESOLUTIONS_TOTAL.with_label_values(&["failed"]).inc();
        tracing::warn!(reason, "Bearer claim resolution failed");

        // Only trust identifiers from a token whose signature checked out.
        let profile_id = claims.and_then(|c| c.sub.parse::<Uuid>().ok());
        let context_id = claims.and_then(|c| c.ctx.parse::<Uuid>().ok());
        self.audit
            .append(
                AuditEntry::new(AuditAction::ClaimsResolutionFailed, profile_id, profile_id, context_id)
                    .with_request_id(request_id)
                    .with_details(json!({
                        "reason": reason,
                        "clientId": claims.map(|c| c.aud.as_str()),
                    })),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_domain_requires_http_url_with_host() {
        assert_eq!(origin_domain("https://App.Example.com/cb?x=1").unwrap(), "app.example.com");
        assert_eq!(origin_domain("http://localhost:3000/").unwrap(), "localhost");
        assert!(origin_domain("ftp://example.com/").is_err());
        assert!(origin_domain("/relative/path").is_err());
        assert!(origin_domain("javascript:alert(1)").is_err());
        assert!(origin_domain("").is_err());
    }

    #[test]
    fn session_tokens_are_random_and_url_safe() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
