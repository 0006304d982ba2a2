//! Name Resolver - decides which name variant to disclose.
//!
//! Precedence, first match wins:
//! 1. an effectively granted consent from the target to the requester, using the
//!    primary assignment of the consent's context (the caller's context choice is
//!    ignored);
//! 2. the selected context's primary assignment;
//! 3. the target's preferred variant, or its oldest variant when none is flagged.
//!
//! Store failures while evaluating 1 and 2 skip that rule. Failures in 3 are
//! fatal. The resolver never writes; callers record the disclosure.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use service_core::error::AppError;
use uuid::Uuid;

use super::metrics::{RESOLUTIONS_TOTAL, RESOLUTION_DEGRADED_TOTAL};
use crate::models::NameVariant;
use crate::store::IdentityStore;

/// Which rule produced a disclosed name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    Consent,
    Context,
    Preferred,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Consent => "consent",
            ResolutionSource::Context => "context",
            ResolutionSource::Preferred => "preferred",
        }
    }
}

/// How the caller selects a context for rule 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextSelector {
    Name(String),
    Id(Uuid),
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub name: String,
    pub source: ResolutionSource,
    pub variant: NameVariant,
    /// Context whose assignment produced the name, if any.
    pub context_id: Option<Uuid>,
}

impl Resolution {
    fn new(variant: NameVariant, source: ResolutionSource, context_id: Option<Uuid>) -> Self {
        Self {
            name: variant.name_text.clone(),
            source,
            variant,
            context_id,
        }
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.variant.metadata.as_ref()
    }
}

pub struct NameResolver {
    store: Arc<dyn IdentityStore>,
}

impl NameResolver {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self))]
    pub async fn resolve(
        &self,
        target_id: Uuid,
        requester_id: Option<Uuid>,
        context: Option<&ContextSelector>,
        now: DateTime<Utc>,
    ) -> Result<Resolution, AppError> {
        if self.store.find_profile(target_id).await?.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!("Target profile not found")));
        }

        let resolution = match self.by_consent(target_id, requester_id, now).await {
            Some(found) => found,
            None => match self.by_context(target_id, context).await {
                Some(found) => found,
                None => self.by_fallback(target_id).await?,
            },
        };

        RESOLUTIONS_TOTAL
            .with_label_values(&[resolution.source.as_str()])
            .inc();
        tracing::debug!(source = resolution.source.as_str(), "Name resolved");
        Ok(resolution)
    }

    async fn by_consent(
        &self,
        target_id: Uuid,
        requester_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Option<Resolution> {
        let requester_id = requester_id?;

        let consent = match self.store.find_consent(target_id, requester_id).await {
            Ok(consent) => consent?,
            Err(e) => return degraded("consent", e),
        };
        if !consent.is_active(now) {
            return None;
        }

        match self.store.find_primary_variant(consent.context_id).await {
            Ok(variant) => variant.map(|v| {
                Resolution::new(v, ResolutionSource::Consent, Some(consent.context_id))
            }),
            Err(e) => degraded("consent", e),
        }
    }

    async fn by_context(
        &self,
        target_id: Uuid,
        selector: Option<&ContextSelector>,
    ) -> Option<Resolution> {
        let lookup = match selector? {
            ContextSelector::Name(name) => self.store.find_context_by_name(target_id, name).await,
            ContextSelector::Id(id) => self.store.find_context(*id).await,
        };
        let context = match lookup {
            Ok(context) => context.filter(|c| c.profile_id == target_id)?,
            Err(e) => return degraded("context", e),
        };

        match self.store.find_primary_variant(context.context_id).await {
            Ok(variant) => variant.map(|v| {
                Resolution::new(v, ResolutionSource::Context, Some(context.context_id))
            }),
            Err(e) => degraded("context", e),
        }
    }

    async fn by_fallback(&self, target_id: Uuid) -> Result<Resolution, AppError> {
        self.store
            .find_fallback_variant(target_id)
            .await?
            .map(|v| Resolution::new(v, ResolutionSource::Preferred, None))
            .ok_or_else(|| {
                AppError::NoNameAvailable(anyhow::anyhow!("Target has no name variants"))
            })
    }
}

fn degraded(rule: &str, error: AppError) -> Option<Resolution> {
    RESOLUTION_DEGRADED_TOTAL.with_label_values(&[rule]).inc();
    tracing::warn!(rule, error = %error, "Resolver lookup failed, falling back");
    None
}
