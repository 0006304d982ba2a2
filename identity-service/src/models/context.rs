//! Context model - a named lens mapping identity properties to name variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Name of the context every profile receives at signup.
pub const PERMANENT_CONTEXT_NAME: &str = "Public";

/// Identity properties a context can assign a name variant to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityProperty {
    Name,
    GivenName,
    FamilyName,
    Nickname,
    DisplayName,
    PreferredUsername,
}

impl IdentityProperty {
    pub const ALL: [IdentityProperty; 6] = [
        IdentityProperty::Name,
        IdentityProperty::GivenName,
        IdentityProperty::FamilyName,
        IdentityProperty::Nickname,
        IdentityProperty::DisplayName,
        IdentityProperty::PreferredUsername,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityProperty::Name => "name",
            IdentityProperty::GivenName => "given_name",
            IdentityProperty::FamilyName => "family_name",
            IdentityProperty::Nickname => "nickname",
            IdentityProperty::DisplayName => "display_name",
            IdentityProperty::PreferredUsername => "preferred_username",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }
}

/// Context entity.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub context_id: Uuid,
    pub profile_id: Uuid,
    pub context_name: String,
    pub description: Option<String>,
    pub is_permanent: bool,
    pub created_utc: DateTime<Utc>,
}

impl Context {
    /// Create a regular, user-managed context.
    pub fn new(profile_id: Uuid, context_name: String, description: Option<String>) -> Self {
        Self {
            context_id: Uuid::new_v4(),
            profile_id,
            context_name,
            description,
            is_permanent: false,
            created_utc: Utc::now(),
        }
    }

    /// Create the permanent public context created alongside a profile.
    pub fn permanent(profile_id: Uuid) -> Self {
        Self {
            context_id: Uuid::new_v4(),
            profile_id,
            context_name: PERMANENT_CONTEXT_NAME.to_string(),
            description: Some("Default public identity".to_string()),
            is_permanent: true,
            created_utc: Utc::now(),
        }
    }
}

/// Assignment of a name variant to one property of a context.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextAssignment {
    pub context_id: Uuid,
    pub property_code: String,
    pub variant_id: Uuid,
    pub is_primary: bool,
    pub created_utc: DateTime<Utc>,
}

impl ContextAssignment {
    pub fn new(
        context_id: Uuid,
        property: IdentityProperty,
        variant_id: Uuid,
        is_primary: bool,
    ) -> Self {
        Self {
            context_id,
            property_code: property.as_str().to_string(),
            variant_id,
            is_primary,
            created_utc: Utc::now(),
        }
    }

    pub fn property(&self) -> Option<IdentityProperty> {
        IdentityProperty::parse(&self.property_code)
    }
}
