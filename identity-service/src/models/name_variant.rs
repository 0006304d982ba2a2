//! Name variant model - one candidate name a profile may present.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Name variant entity.
///
/// `metadata` is a free-form JSON object (pronunciation, locale, zoneinfo, ...).
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameVariant {
    pub variant_id: Uuid,
    pub profile_id: Uuid,
    pub name_text: String,
    pub is_preferred: bool,
    pub metadata: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl NameVariant {
    pub fn new(
        profile_id: Uuid,
        name_text: String,
        is_preferred: bool,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            variant_id: Uuid::new_v4(),
            profile_id,
            name_text,
            is_preferred,
            metadata,
            created_utc: now,
            updated_utc: now,
        }
    }

    fn metadata_str(&self, key: &str) -> Option<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    pub fn locale(&self) -> Option<String> {
        self.metadata_str("locale")
    }

    pub fn zoneinfo(&self) -> Option<String> {
        self.metadata_str("zoneinfo")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_locale_and_zoneinfo_from_metadata() {
        let variant = NameVariant::new(
            Uuid::new_v4(),
            "Jane Smith".to_string(),
            true,
            Some(json!({"locale": "en-GB", "zoneinfo": "Europe/London", "pronunciation": "jayn"})),
        );
        assert_eq!(variant.locale().as_deref(), Some("en-GB"));
        assert_eq!(variant.zoneinfo().as_deref(), Some("Europe/London"));
    }

    #[test]
    fn missing_metadata_yields_none() {
        let variant = NameVariant::new(Uuid::new_v4(), "J".to_string(), false, None);
        assert!(variant.locale().is_none());

        let variant = NameVariant::new(
            Uuid::new_v4(),
            "J".to_string(),
            false,
            Some(json!({"locale": 7})),
        );
        assert!(variant.locale().is_none());
    }
}
