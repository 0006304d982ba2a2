use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use axum::response::Response;
use serde::Serialize;
use service_core::config::Environment;
use service_core::error::AppError;
use service_core::middleware::tracing::REQUEST_ID_HEADER;
use service_core::response::{failure, success};
use std::convert::Infallible;
use uuid::Uuid;

use crate::AppState;

pub const USER_ID_HEADER: &str = "X-User-ID";

/// Per-request context handed to every handler: the correlation id, the caller
/// asserted by the gateway through `X-User-ID`, and the rendering environment.
///
/// Extraction never fails. A missing or malformed caller only surfaces when a
/// handler asks for it through `require_caller`, so the error still goes out
/// inside the envelope with the right request id.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    caller: CallerHeader,
    pub environment: Environment,
}

#[derive(Debug, Clone, Copy)]
enum CallerHeader {
    Missing,
    Malformed,
    Present(Uuid),
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, caller: Option<Uuid>, environment: Environment) -> Self {
        Self {
            request_id: request_id.into(),
            caller: caller.map_or(CallerHeader::Missing, CallerHeader::Present),
            environment,
        }
    }

    pub fn require_caller(&self) -> Result<Uuid, AppError> {
        match self.caller {
            CallerHeader::Present(id) => Ok(id),
            CallerHeader::Missing => Err(AppError::AuthenticationRequired(anyhow::anyhow!(
                "Missing {} header",
                USER_ID_HEADER
            ))),
            CallerHeader::Malformed => Err(AppError::AuthenticationRequired(anyhow::anyhow!(
                "Malformed {} header",
                USER_ID_HEADER
            ))),
        }
    }

    /// The caller, who must be `expected`.
    pub fn require_caller_is(&self, expected: Uuid) -> Result<Uuid, AppError> {
        let caller = self.require_caller()?;
        if caller != expected {
            return Err(AppError::AuthorizationFailed(anyhow::anyhow!(
                "Caller may not act on behalf of another profile"
            )));
        }
        Ok(caller)
    }

    /// Render a handler result inside the response envelope.
    pub fn respond<T: Serialize>(&self, status: StatusCode, result: Result<T, AppError>) -> Response {
        match result {
            Ok(data) => success(status, data, &self.request_id),
            Err(err) => self.fail(&err),
        }
    }

    pub fn fail(&self, err: &AppError) -> Response {
        failure(err, &self.request_id, self.environment.exposes_error_details())
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();

        let caller = match parts.headers.get(USER_ID_HEADER) {
            None => CallerHeader::Missing,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| Uuid::parse_str(v.trim()).ok())
                .map_or(CallerHeader::Malformed, CallerHeader::Present),
        };

        if let CallerHeader::Present(id) = caller {
            tracing::Span::current().record("user_id", tracing::field::display(id));
        }

        Ok(RequestContext {
            request_id,
            caller,
            environment: state.config.environment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_caller_requires_authentication() {
        let ctx = RequestContext::new("req-1", None, Environment::Dev);
        assert!(matches!(
            ctx.require_caller(),
            Err(AppError::AuthenticationRequired(_))
        ));
    }

    #[test]
    fn mismatched_caller_is_not_authorized() {
        let caller = Uuid::new_v4();
        let ctx = RequestContext::new("req-1", Some(caller), Environment::Dev);
        assert_eq!(ctx.require_caller_is(caller).unwrap(), caller);
        assert!(matches!(
            ctx.require_caller_is(Uuid::new_v4()),
            Err(AppError::AuthorizationFailed(_))
        ));
    }

    #[test]
    fn error_status_follows_taxonomy() {
        let ctx = RequestContext::new("req-1", None, Environment::Prod);
        let response = ctx.respond::<()>(
            StatusCode::OK,
            Err(AppError::ConsentNotFound(anyhow::anyhow!("none"))),
        );
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
