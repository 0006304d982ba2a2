use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::models::{AuditAction, AuditEntryResponse};
use crate::store::{AuditPage, AuditQuery};

const DEFAULT_LIMIT: i64 = 50;

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

/// Query string of `GET /audit`.
///
/// `dateFrom`/`dateTo` are canonical. `startDate`/`endDate` are deprecated
/// aliases; sending a field together with its alias is rejected.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AuditQueryParams {
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 1000))]
    pub limit: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub offset: i64,
    pub action: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

fn canonical<T>(
    field: Option<T>,
    alias: Option<T>,
    field_name: &str,
    alias_name: &str,
) -> Result<Option<T>, AppError> {
    match (field, alias) {
        (Some(_), Some(_)) => Err(AppError::ValidationError(anyhow::anyhow!(
            "{} and its deprecated alias {} cannot both be supplied",
            field_name,
            alias_name
        ))),
        (Some(value), None) => Ok(Some(value)),
        (None, Some(value)) => {
            tracing::warn!(alias = alias_name, replacement = field_name, "Deprecated audit filter used");
            Ok(Some(value))
        }
        (None, None) => Ok(None),
    }
}

impl AuditQueryParams {
    pub fn into_query(self, subject_id: Uuid) -> Result<AuditQuery, AppError> {
        let date_from = canonical(self.date_from, self.start_date, "dateFrom", "startDate")?;
        let date_to = canonical(self.date_to, self.end_date, "dateTo", "endDate")?;
        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from > to {
                return Err(AppError::ValidationError(anyhow::anyhow!(
                    "dateFrom must not be after dateTo"
                )));
            }
        }

        let action = match self.action.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            Some(code) => Some(AuditAction::parse(&code.to_uppercase()).ok_or_else(|| {
                AppError::ValidationError(anyhow::anyhow!("Unknown audit action: {}", code))
            })?),
            None => None,
        };

        Ok(AuditQuery {
            subject_id,
            action,
            date_from,
            date_to,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditListMetadata {
    pub total: i64,
    pub filtered: i64,
    pub limit: i64,
    pub offset: i64,
    pub retrieved_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AuditListResponse {
    pub entries: Vec<AuditEntryResponse>,
    pub metadata: AuditListMetadata,
}

impl AuditListResponse {
    pub fn new(page: AuditPage, limit: i64, offset: i64) -> Self {
        Self {
            entries: page.entries.into_iter().map(AuditEntryResponse::from).collect(),
            metadata: AuditListMetadata {
                total: page.total,
                filtered: page.filtered,
                limit,
                offset,
                retrieved_at: Utc::now(),
            },
        }
    }
}
