use axum::extract::rejection::JsonRejection;
use axum::{extract::State, http::StatusCode, response::Response, Json};
use chrono::Utc;
use service_core::error::AppError;

use crate::dtos::{ConsentCommand, ConsentResponse};
use crate::middleware::RequestContext;
use crate::services::TransitionOutcome;
use crate::utils::validated_json;
use crate::AppState;

/// Request, grant or revoke consent, dispatched on `action`.
///
/// POST /consents
///
/// The requester asks; only the granter grants or revokes. A grant with no
/// pending request, or a revoke with no granted consent, is `CONSENT_NOT_FOUND`.
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn consent(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<ConsentCommand>, JsonRejection>,
) -> Response {
    let command = match validated_json(payload) {
        Ok(command) => command,
        Err(e) => return ctx.fail(&e),
    };
    let status = match command {
        ConsentCommand::Request(_) => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    let result = apply(&state, &ctx, command).await;
    ctx.respond(status, result)
}

async fn apply(
    state: &AppState,
    ctx: &RequestContext,
    command: ConsentCommand,
) -> Result<ConsentResponse, AppError> {
    let action = command.action();
    let ledger = &state.consents;

    let outcome = match command {
        ConsentCommand::Request(p) => {
            ctx.require_caller_is(p.requester_id)?;
            let saved = ledger
                .request(
                    p.granter_id,
                    p.requester_id,
                    p.context_name.as_deref().map(str::trim),
                    p.expires_at,
                    &ctx.request_id,
                )
                .await?;
            TransitionOutcome::Transitioned(saved)
        }
        ConsentCommand::Grant(p) => {
            ctx.require_caller_is(p.granter_id)?;
            ledger.grant(p.granter_id, p.requester_id, &ctx.request_id).await?
        }
        ConsentCommand::Revoke(p) => {
            ctx.require_caller_is(p.granter_id)?;
            ledger.revoke(p.granter_id, p.requester_id, &ctx.request_id).await?
        }
    };

    match outcome {
        TransitionOutcome::Transitioned(grant) => Ok(ConsentResponse::new(action, &grant, Utc::now())),
        TransitionOutcome::NotFound => Err(AppError::ConsentNotFound(anyhow::anyhow!(
            "No consent in a state that allows {}",
            action
        ))),
    }
}
