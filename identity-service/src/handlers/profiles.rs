//! Profiles and their name variants.

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

use crate::dtos::{AddNameRequest, CreateProfileRequest};
use crate::middleware::RequestContext;
use crate::utils::{path_id, validated_json};
use crate::AppState;

/// POST /profiles
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn create_profile(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<CreateProfileRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let req = validated_json(payload)?;
        state.contexts.create_profile(&req.email).await
    }
    .await;
    ctx.respond(StatusCode::CREATED, result)
}

/// POST /names
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn add_name(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<AddNameRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let owner = ctx.require_caller()?;
        let req = validated_json(payload)?;
        state
            .contexts
            .add_name_variant(owner, &req.name, req.is_preferred, req.metadata)
            .await
    }
    .await;
    ctx.respond(StatusCode::CREATED, result)
}

/// GET /names
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn list_names(State(state): State<AppState>, ctx: RequestContext) -> Response {
    let result = async {
        let owner = ctx.require_caller()?;
        state.contexts.list_name_variants(owner).await
    }
    .await;
    ctx.respond(StatusCode::OK, result)
}

/// POST /names/:id/preferred
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn set_preferred(
    State(state): State<AppState>,
    ctx: RequestContext,
    path: Result<Path<Uuid>, PathRejection>,
) -> Response {
    let result = async {
        let owner = ctx.require_caller()?;
        let variant_id = path_id(path)?;
        state.contexts.set_preferred_variant(owner, variant_id).await?;
        Ok::<_, AppError>(json!({ "variantId": variant_id, "isPreferred": true }))
    }
    .await;
    ctx.respond(StatusCode::OK, result)
}

/// DELETE /names/:id
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn delete_name(
    State(state): State<AppState>,
    ctx: RequestContext,
    path: Result<Path<Uuid>, PathRejection>,
) -> Response {
    let result = async {
        let owner = ctx.require_caller()?;
        let variant_id = path_id(path)?;
        state.contexts.delete_name_variant(owner, variant_id).await?;
        Ok::<_, AppError>(json!({ "variantId": variant_id, "deleted": true }))
    }
    .await;
    ctx.respond(StatusCode::OK, result)
}
