use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::services::{Resolution, ResolutionSource};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub target_id: Uuid,
    pub requester_id: Option<Uuid>,
    #[validate(length(min = 1, max = 100))]
    pub context_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub name: String,
    pub source: ResolutionSource,
    pub metadata: Option<serde_json::Value>,
}

impl From<Resolution> for ResolveResponse {
    fn from(resolution: Resolution) -> Self {
        Self {
            metadata: resolution.metadata().cloned(),
            name: resolution.name,
            source: resolution.source,
        }
    }
}
