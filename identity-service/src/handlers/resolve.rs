use axum::extract::rejection::JsonRejection;
use axum::{extract::State, http::StatusCode, response::Response, Json};
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;

use crate::dtos::{ResolveRequest, ResolveResponse};
use crate::middleware::RequestContext;
use crate::models::{AuditAction, AuditEntry};
use crate::services::ContextSelector;
use crate::utils::validated_json;
use crate::AppState;

/// Resolve the name a target presents to a requester.
///
/// POST /resolve
///
/// Anonymous callers may resolve without a `requesterId`. Naming a requester
/// requires the caller to be that requester.
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn resolve(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<ResolveRequest>, JsonRejection>,
) -> Response {
    let result = resolve_name(&state, &ctx, payload).await;
    ctx.respond(StatusCode::OK, result)
}

async fn resolve_name(
    state: &AppState,
    ctx: &RequestContext,
    payload: Result<Json<ResolveRequest>, JsonRejection>,
) -> Result<ResolveResponse, AppError> {
    let req = validated_json(payload)?;
    if let Some(requester_id) = req.requester_id {
        ctx.require_caller_is(requester_id)?;
    }

    let selector = req
        .context_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| ContextSelector::Name(name.to_string()));

    let resolution = state
        .resolver
        .resolve(req.target_id, req.requester_id, selector.as_ref(), Utc::now())
        .await?;

    state
        .audit
        .append(
            AuditEntry::new(
                AuditAction::NameDisclosed,
                req.requester_id,
                Some(req.target_id),
                resolution.context_id,
            )
            .with_resolved_name(resolution.name.clone())
            .with_request_id(ctx.request_id.clone())
            .with_details(json!({
                "source": resolution.source,
                "requestedContext": req.context_name,
            })),
        )
        .await;

    Ok(ResolveResponse::from(resolution))
}
