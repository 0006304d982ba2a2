//! Contexts and their per-property name assignments.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{AssignNameRequest, CreateContextRequest, RenameContextRequest};
use crate::middleware::RequestContext;
use crate::models::IdentityProperty;
use crate::utils::{path_id, validated_json};
use crate::AppState;

fn assignment_path(
    path: Result<Path<(Uuid, String)>, PathRejection>,
) -> Result<(Uuid, IdentityProperty), AppError> {
    let Path((context_id, property)) =
        path.map_err(|_| AppError::ValidationError(anyhow::anyhow!("Invalid id in path")))?;
    let property = IdentityProperty::parse(&property).ok_or_else(|| {
        AppError::ValidationError(anyhow::anyhow!("Unknown identity property: {}", property))
    })?;
    Ok((context_id, property))
}

/// POST /contexts
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn create_context(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<CreateContextRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let owner = ctx.require_caller()?;
        let req = validated_json(payload)?;
        state
            .contexts
            .create_context(owner, &req.name, req.description, &ctx.request_id)
            .await
    }
    .await;
    ctx.respond(StatusCode::CREATED, result)
}

/// GET /contexts
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn list_contexts(State(state): State<AppState>, ctx: RequestContext) -> Response {
    let result = async {
        let owner = ctx.require_caller()?;
        state.contexts.list_contexts(owner).await
    }
    .await;
    ctx.respond(StatusCode::OK, result)
}

/// PATCH /contexts/:id
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn rename_context(
    State(state): State<AppState>,
    ctx: RequestContext,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<RenameContextRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let owner = ctx.require_caller()?;
        let context_id = path_id(path)?;
        let req = validated_json(payload)?;
        state
            .contexts
            .rename_context(owner, context_id, &req.name, req.description.as_deref())
            .await
    }
    .await;
    ctx.respond(StatusCode::OK, result)
}

/// DELETE /contexts/:id
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn delete_context(
    State(state): State<AppState>,
    ctx: RequestContext,
    path: Result<Path<Uuid>, PathRejection>,
) -> Response {
    let result = async {
        let owner = ctx.require_caller()?;
        let context_id = path_id(path)?;
        state
            .contexts
            .delete_context(owner, context_id, &ctx.request_id)
            .await?;
        Ok::<_, AppError>(json!({ "contextId": context_id, "deleted": true }))
    }
    .await;
    ctx.respond(StatusCode::OK, result)
}

/// PUT /contexts/:id/assignments/:property
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn assign_name(
    State(state): State<AppState>,
    ctx: RequestContext,
    path: Result<Path<(Uuid, String)>, PathRejection>,
    payload: Result<Json<AssignNameRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let owner = ctx.require_caller()?;
        let (context_id, property) = assignment_path(path)?;
        let req = validated_json(payload)?;
        state
            .contexts
            .assign_name(owner, context_id, property, req.variant_id, req.is_primary)
            .await
    }
    .await;
    ctx.respond(StatusCode::OK, result)
}

/// DELETE /contexts/:id/assignments/:property
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn remove_assignment(
    State(state): State<AppState>,
    ctx: RequestContext,
    path: Result<Path<(Uuid, String)>, PathRejection>,
) -> Response {
    let result = async {
        let owner = ctx.require_caller()?;
        let (context_id, property) = assignment_path(path)?;
        state
            .contexts
            .remove_assignment(owner, context_id, property)
            .await?;
        Ok::<_, AppError>(json!({ "contextId": context_id, "property": property, "removed": true }))
    }
    .await;
    ctx.respond(StatusCode::OK, result)
}
