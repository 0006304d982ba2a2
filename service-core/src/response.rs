//! Uniform response envelope shared by every endpoint.
//!
//! Success: `{ success: true, data, requestId, timestamp }`
//! Failure: `{ success: false, error: { code, message, details? }, requestId, timestamp }`

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, ErrorCode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T, request_id: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            request_id: request_id.into(),
            timestamp: Utc::now(),
        }
    }
}

impl Envelope<()> {
    pub fn err(error: ErrorBody, request_id: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            request_id: request_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Render a successful payload inside the envelope.
pub fn success<T: Serialize>(status: StatusCode, data: T, request_id: &str) -> Response {
    (status, Json(Envelope::ok(data, request_id))).into_response()
}

/// Render an error inside the envelope. `expose_details` is false in production.
pub fn failure(err: &AppError, request_id: &str, expose_details: bool) -> Response {
    if err.is_server_error() {
        tracing::error!(request_id = %request_id, code = %err.code(), error = %err, "Request failed");
    } else {
        tracing::debug!(request_id = %request_id, code = %err.code(), error = %err, "Request rejected");
    }

    let body = ErrorBody {
        code: err.code(),
        message: err.public_message(),
        details: if expose_details {
            err.internal_details()
        } else {
            None
        },
    };

    let mut res = (err.status_code(), Json(Envelope::err(body, request_id))).into_response();

    if let Some(retry) = err.retry_after() {
        res.headers_mut().insert(header::RETRY_AFTER, retry.into());
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn success_envelope_shape() {
        let res = success(StatusCode::OK, serde_json::json!({"name": "Jane"}), "req-1");
        assert_eq!(res.status(), StatusCode::OK);

        let body = body_json(res).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["name"], "Jane");
        assert_eq!(body["requestId"], "req-1");
        assert!(body.get("error").is_none());
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn failure_redacts_details_in_production() {
        let err = AppError::InternalError(anyhow::anyhow!("pool exhausted"));

        let body = body_json(failure(&err, "req-2", false)).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert!(body["error"].get("details").is_none());

        let body = body_json(failure(&err, "req-2", true)).await;
        assert!(
            body["error"]["details"]
                .as_str()
                .unwrap()
                .contains("pool exhausted")
        );
    }

    #[tokio::test]
    async fn rate_limit_sets_retry_after() {
        let err = AppError::TooManyRequests("slow down".to_string(), Some(7));
        let res = failure(&err, "req-3", false);
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()[header::RETRY_AFTER], "7");
    }
}
