//! Input checks for extracted request parts.
//!
//! Handlers take `Result<Json<T>, JsonRejection>` (and the `Query`/`Path`
//! equivalents) so a rejected payload is rendered through the same envelope,
//! with the request id, as every other error.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query};
use axum::Json;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub fn validated_json<T: Validate>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    let Json(value) = payload
        .map_err(|e| AppError::ValidationError(anyhow::anyhow!("Json parse error: {}", e.body_text())))?;
    value.validate()?;
    Ok(value)
}

pub fn validated_query<T: Validate>(query: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    let Query(value) = query
        .map_err(|e| AppError::ValidationError(anyhow::anyhow!("Invalid query: {}", e.body_text())))?;
    value.validate()?;
    Ok(value)
}

pub fn path_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, AppError> {
    path.map(|Path(id)| id)
        .map_err(|_| AppError::ValidationError(anyhow::anyhow!("Invalid id in path")))
}
