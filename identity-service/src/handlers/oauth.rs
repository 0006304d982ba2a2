use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use service_core::error::AppError;

use crate::dtos::{AuthorizeQuery, TokenRequest, TokenResponse};
use crate::middleware::RequestContext;
use crate::services::{origin_domain, ClaimSet};
use crate::utils::{validated_json, validated_query};
use crate::AppState;

/// Append query parameters to a URL, keeping any fragment at the end.
pub fn append_query(url: &str, params: &[(&str, &str)]) -> String {
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };

    let mut out = base.to_string();
    if !base.contains('?') {
        out.push('?');
    } else if !base.ends_with('?') && !base.ends_with('&') {
        out.push('&');
    }
    let encoded: Vec<String> = params
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect();
    out.push_str(&encoded.join("&"));

    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Run the authorization handshake for the signed-in caller and send them back
/// to the application with a bearer token.
///
/// GET /oauth/authorize?appName&returnUrl&state[&contextName]
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn authorize(
    State(state): State<AppState>,
    ctx: RequestContext,
    query: Result<Query<AuthorizeQuery>, QueryRejection>,
) -> Response {
    match authorize_redirect(&state, &ctx, query).await {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(e) => ctx.fail(&e),
    }
}

async fn authorize_redirect(
    state: &AppState,
    ctx: &RequestContext,
    query: Result<Query<AuthorizeQuery>, QueryRejection>,
) -> Result<String, AppError> {
    let caller = ctx.require_caller()?;
    let q = validated_query(query)?;

    let domain = origin_domain(&q.return_url)?;
    let client = state.issuer.register_client(Some(&domain), q.app_name.trim()).await?;

    let context = match q.context_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => state
            .store
            .find_context_by_name(caller, name)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Context not found")))?,
        None => state
            .store
            .find_permanent_context(caller)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Profile not found")))?,
    };

    let (session_token, _session) = state
        .issuer
        .create_authorization_session(
            caller,
            &client.client_id,
            context.context_id,
            &q.return_url,
            &q.state,
            &ctx.request_id,
        )
        .await?;
    let exchange = state
        .issuer
        .exchange_session(&session_token, &ctx.request_id)
        .await?;

    tracing::info!(client_id = %client.client_id, "Authorization completed");
    Ok(append_query(
        &q.return_url,
        &[
            ("token", exchange.token.access_token.as_str()),
            ("state", q.state.as_str()),
        ],
    ))
}

/// Exchange a one-time session token for a bearer token.
///
/// POST /oauth/token
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn token(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let req = validated_json(payload)?;
        let exchange = state
            .issuer
            .exchange_session(&req.session_token, &ctx.request_id)
            .await?;
        Ok::<_, AppError>(TokenResponse {
            access_token: exchange.token.access_token,
            token_type: exchange.token.token_type,
            expires_in: exchange.token.expires_in,
            state: exchange.session.state,
        })
    }
    .await;
    ctx.respond(StatusCode::OK, result)
}

fn bearer_token(headers: &HeaderMap) -> &str {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("")
}

/// Resolve the claim set bound to a bearer token.
///
/// POST /oauth/resolve
#[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
pub async fn resolve_bearer(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Response {
    let result: Result<ClaimSet, AppError> = state
        .issuer
        .resolve_bearer(bearer_token(&headers), &ctx.request_id)
        .await;
    ctx.respond(StatusCode::OK, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_with_question_mark_or_ampersand() {
        assert_eq!(
            append_query("https://app.example.com/cb", &[("token", "t"), ("state", "s")]),
            "https://app.example.com/cb?token=t&state=s"
        );
        assert_eq!(
            append_query("https://app.example.com/cb?x=1", &[("token", "t")]),
            "https://app.example.com/cb?x=1&token=t"
        );
    }

    #[test]
    fn encodes_values_and_keeps_fragment() {
        assert_eq!(
            append_query("https://app.example.com/cb#top", &[("state", "a b&c")]),
            "https://app.example.com/cb?state=a%20b%26c#top"
        );
    }

    #[test]
    fn does_not_double_separators() {
        assert_eq!(
            append_query("https://app.example.com/cb?", &[("token", "t"), ("state", "s")]),
            "https://app.example.com/cb?token=t&state=s"
        );
    }

    #[test]
    fn reads_bearer_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), "");
        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), "abc.def");
    }
}
