pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use service_core::axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::Response,
    routing::{get, post, put},
    Router,
};
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::IdentityConfig;
use crate::middleware::RequestContext;
use crate::services::{
    AuditLogger, ConsentLedger, ContextService, JwtService, NameResolver, TokenIssuer,
};
use crate::store::IdentityStore;
use service_core::error::AppError;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<IdentityConfig>,
    pub store: Arc<dyn IdentityStore>,
    pub audit: Arc<AuditLogger>,
    pub resolver: Arc<NameResolver>,
    pub consents: Arc<ConsentLedger>,
    pub contexts: Arc<ContextService>,
    pub issuer: Arc<TokenIssuer>,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire every service over one store.
    pub fn new(config: IdentityConfig, store: Arc<dyn IdentityStore>) -> Result<Self, AppError> {
        let tokens = &config.tokens;
        let jwt = JwtService::new(
            &tokens.signing_secret,
            &tokens.issuer,
            chrono::Duration::minutes(tokens.bearer_ttl_minutes),
        )
        .map_err(AppError::ConfigError)?;

        let audit = Arc::new(AuditLogger::new(
            store.clone(),
            std::time::Duration::from_millis(config.audit.retry_max_elapsed_ms),
        ));
        let resolver = Arc::new(NameResolver::new(store.clone()));
        let consents = Arc::new(ConsentLedger::new(store.clone(), audit.clone()));
        let contexts = Arc::new(ContextService::new(
            store.clone(),
            audit.clone(),
            consents.clone(),
        ));
        let issuer = Arc::new(TokenIssuer::new(
            store.clone(),
            resolver.clone(),
            jwt,
            audit.clone(),
            chrono::Duration::seconds(tokens.session_ttl_seconds),
            chrono::Duration::seconds(tokens.claims_ttl_seconds),
        ));
        let ip_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        );

        Ok(AppState {
            config: Arc::new(config),
            store,
            audit,
            resolver,
            consents,
            contexts,
            issuer,
            ip_rate_limiter,
        })
    }
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let ip_limiter = state.ip_rate_limiter.clone();
    let allowed_origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/profiles", post(handlers::profiles::create_profile))
        .route(
            "/names",
            post(handlers::profiles::add_name).get(handlers::profiles::list_names),
        )
        .route("/names/:id/preferred", post(handlers::profiles::set_preferred))
        .route(
            "/names/:id",
            service_core::axum::routing::delete(handlers::profiles::delete_name),
        )
        .route(
            "/contexts",
            post(handlers::contexts::create_context).get(handlers::contexts::list_contexts),
        )
        .route(
            "/contexts/:id",
            service_core::axum::routing::patch(handlers::contexts::rename_context)
                .delete(handlers::contexts::delete_context),
        )
        .route(
            "/contexts/:id/assignments/:property",
            put(handlers::contexts::assign_name).delete(handlers::contexts::remove_assignment),
        )
        .route("/resolve", post(handlers::resolve::resolve))
        .route("/consents", post(handlers::consent::consent))
        .route("/oauth/authorize", get(handlers::oauth::authorize))
        .route("/oauth/token", post(handlers::oauth::token))
        .route("/oauth/resolve", post(handlers::oauth::resolve_bearer))
        .route("/audit", get(handlers::audit::list_audit_entries))
        .with_state(state)
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    user_id = tracing::field::Empty,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static("x-request-id"),
                    HeaderName::from_static("x-user-id"),
                ])
                .expose_headers([HeaderName::from_static("x-request-id")]),
        );

    Ok(app)
}

/// Service health check
///
/// GET /health
pub async fn health_check(State(state): State<AppState>, ctx: RequestContext) -> Response {
    let result = state.store.health_check().await.map(|_| {
        serde_json::json!({
            "status": "healthy",
            "service": state.config.service_name,
            "version": state.config.service_version,
            "environment": format!("{:?}", state.config.environment),
            "checks": {
                "store": "up"
            }
        })
    });
    if let Err(e) = &result {
        tracing::error!(error = %e, "Store health check failed");
    }
    ctx.respond(StatusCode::OK, result)
}
