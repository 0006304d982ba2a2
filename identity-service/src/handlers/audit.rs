//! Transparency log: a profile reads the entries where it is actor or target.

use axum::extract::rejection::QueryRejection;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Response,
};
use service_core::error::AppError;

use crate::dtos::{AuditListResponse, AuditQueryParams};
use crate::middleware::RequestContext;
use crate::utils::validated_query;
use crate::AppState;

/// List the caller's audit entries, newest first.
///
/// GET /audit?limit&offset&action&dateFrom&dateTo
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn list_audit_entries(
    State(state): State<AppState>,
    ctx: RequestContext,
    query: Result<Query<AuditQueryParams>, QueryRejection>,
) -> Response {
    let result = async {
        let caller = ctx.require_caller()?;
        let params = validated_query(query)?;
        let query = params.into_query(caller)?;
        let page = state.audit.query(&query).await?;
        Ok::<_, AppError>(AuditListResponse::new(page, query.limit, query.offset))
    }
    .await;
    ctx.respond(StatusCode::OK, result)
}
