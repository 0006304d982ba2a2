//! Authorization handshake, session exchange and bearer claim resolution.

mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{jane, query_param, TestApp, TestResponse};
use identity_service::models::{derive_client_id, AuditAction};
use serde_json::json;
use uuid::Uuid;

const RETURN_URL: &str = "https://app.example.com/callback";

async fn authorize(app: &TestApp, caller: Option<Uuid>, query: &str) -> TestResponse {
    app.call(Method::GET, &format!("/oauth/authorize?{}", query), caller, None)
        .await
}

fn authorize_query(app_name: &str, return_url: &str, state: &str) -> String {
    format!(
        "appName={}&returnUrl={}&state={}",
        urlencoding::encode(app_name),
        urlencoding::encode(return_url),
        urlencoding::encode(state)
    )
}

async fn bearer_for(app: &TestApp, profile: Uuid, extra: &str) -> String {
    let res = authorize(
        app,
        Some(profile),
        &format!("{}{}", authorize_query("Demo App", RETURN_URL, "xyz"), extra),
    )
    .await;
    assert_eq!(res.status, StatusCode::SEE_OTHER, "{}", res.body);
    query_param(&res.location(), "token").expect("token in redirect")
}

async fn resolve_bearer(app: &TestApp, token: Option<&str>) -> TestResponse {
    let mut builder = Request::builder().method(Method::POST).uri("/oauth/resolve");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    app.send(builder.body(Body::empty()).unwrap()).await
}

#[tokio::test]
async fn authorize_redirects_with_token_and_state() {
    let app = TestApp::spawn().await;
    let (profile, _, _) = jane(&app).await;

    let res = authorize(
        &app,
        Some(profile),
        &authorize_query("Demo App", "https://app.example.com/callback?x=1", "a b&c"),
    )
    .await;
    assert_eq!(res.status, StatusCode::SEE_OTHER, "{}", res.body);

    let location = res.location();
    assert!(location.starts_with("https://app.example.com/callback?x=1&token="));
    assert_eq!(query_param(&location, "state").as_deref(), Some("a b&c"));
    assert!(query_param(&location, "token").is_some());
}

#[tokio::test]
async fn authorize_requires_a_caller() {
    let app = TestApp::spawn().await;
    let res = authorize(&app, None, &authorize_query("Demo App", RETURN_URL, "s")).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.error_code(), "AUTHENTICATION_REQUIRED");
}

#[tokio::test]
async fn authorize_rejects_non_http_return_urls() {
    let app = TestApp::spawn().await;
    let (profile, _, _) = jane(&app).await;

    for url in ["javascript:alert(1)", "ftp://app.example.com/cb", "/relative"] {
        let res = authorize(&app, Some(profile), &authorize_query("Demo App", url, "s")).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST, "{}", url);
        assert_eq!(res.error_code(), "VALIDATION_ERROR");
    }

    let missing_state = authorize(
        &app,
        Some(profile),
        &format!("appName=Demo&returnUrl={}", urlencoding::encode(RETURN_URL)),
    )
    .await;
    assert_eq!(missing_state.error_code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn claims_carry_the_bound_context_name() {
    let app = TestApp::spawn().await;
    let (profile, _, _) = jane(&app).await;
    let token = bearer_for(&app, profile, "&contextName=Work").await;

    let res = resolve_bearer(&app, Some(&token)).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let claims = res.data();
    assert_eq!(claims["sub"], profile.to_string());
    assert_eq!(claims["aud"], derive_client_id("app.example.com"));
    assert_eq!(claims["iss"], "http://localhost:8080");
    assert_eq!(claims["name"], "J. Smith");
    assert_eq!(claims["name_source"], "context");
    assert_eq!(claims["context_name"], "Work");
    assert_eq!(claims["app_name"], "Demo App");
    assert_eq!(claims["nbf"], claims["iat"]);
    assert_eq!(
        claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
        300
    );
}

#[tokio::test]
async fn default_context_is_public() {
    let app = TestApp::spawn().await;
    let (profile, _, _) = jane(&app).await;
    let token = bearer_for(&app, profile, "").await;

    let res = resolve_bearer(&app, Some(&token)).await;
    assert_eq!(res.data()["name"], "Jane Smith");
    assert_eq!(res.data()["context_name"], "Public");
}

#[tokio::test]
async fn every_resolution_has_a_fresh_jti() {
    let app = TestApp::spawn().await;
    let (profile, _, _) = jane(&app).await;
    let token = bearer_for(&app, profile, "").await;

    let first = resolve_bearer(&app, Some(&token)).await;
    let second = resolve_bearer(&app, Some(&token)).await;
    assert_ne!(first.data()["jti"], second.data()["jti"]);
    assert_eq!(first.data()["sub"], second.data()["sub"]);
}

#[tokio::test]
async fn each_resolution_appends_one_audit_entry() {
    let app = TestApp::spawn().await;
    let (profile, _, _) = jane(&app).await;
    let token = bearer_for(&app, profile, "").await;

    let before = app.store.audit_len();
    let ok = resolve_bearer(&app, Some(&token)).await;
    assert_eq!(ok.status, StatusCode::OK);
    assert_eq!(app.store.audit_len(), before + 1);

    let bad = resolve_bearer(&app, Some("not-a-jwt")).await;
    assert_eq!(bad.status, StatusCode::UNAUTHORIZED);
    assert_eq!(bad.error_code(), "AUTH_FAILED");
    assert_eq!(app.store.audit_len(), before + 2);

    let missing = resolve_bearer(&app, None).await;
    assert_eq!(missing.error_code(), "AUTH_FAILED");
    assert_eq!(app.store.audit_len(), before + 3);

    let audit = app
        .get("/audit?action=CLAIMS_RESOLVED", Some(profile))
        .await;
    assert_eq!(audit.data()["entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn bearer_from_another_issuer_is_rejected() {
    let app = TestApp::spawn().await;

    let mut config = identity_service::config::IdentityConfig::local();
    config.tokens.signing_secret = "another-secret-that-is-long-enough-0123456789".to_string();
    let other = TestApp::spawn_with(config).await;
    let (other_profile, _, _) = jane(&other).await;
    let foreign = bearer_for(&other, other_profile, "").await;

    let res = resolve_bearer(&app, Some(&foreign)).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.error_code(), "AUTH_FAILED");
}

#[tokio::test]
async fn session_exchanges_exactly_once() {
    let app = TestApp::spawn().await;
    let (profile, _, _) = jane(&app).await;
    let public = app.permanent_context(profile).await;

    let client = app
        .state
        .issuer
        .register_client(Some("app.example.com"), "Demo App")
        .await
        .unwrap();
    let (session_token, _) = app
        .state
        .issuer
        .create_authorization_session(profile, &client.client_id, public, RETURN_URL, "st", "req-1")
        .await
        .unwrap();

    let first = app
        .post("/oauth/token", None, json!({ "sessionToken": session_token }))
        .await;
    assert_eq!(first.status, StatusCode::OK, "{}", first.body);
    assert_eq!(first.data()["token_type"], "Bearer");
    assert_eq!(first.data()["state"], "st");
    assert_eq!(first.data()["expires_in"], 3600);

    let second = app
        .post("/oauth/token", None, json!({ "sessionToken": session_token }))
        .await;
    assert_eq!(second.status, StatusCode::UNAUTHORIZED);
    assert_eq!(second.error_code(), "AUTH_FAILED");

    let unknown = app
        .post("/oauth/token", None, json!({ "sessionToken": "nope" }))
        .await;
    assert_eq!(unknown.error_code(), "AUTH_FAILED");

    let audit = app
        .get("/audit?action=TOKEN_EXCHANGE_FAILED", Some(profile))
        .await;
    assert_eq!(audit.data()["entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn client_ids_follow_the_origin_domain() {
    let app = TestApp::spawn().await;
    let issuer = &app.state.issuer;

    let a = issuer.register_client(Some("app.example.com"), "A").await.unwrap();
    let again = issuer.register_client(Some("APP.example.com"), "A v2").await.unwrap();
    let b = issuer.register_client(Some("other.example.com"), "B").await.unwrap();

    assert_eq!(a.client_id, again.client_id);
    assert_eq!(again.display_name, "A v2");
    assert_ne!(a.client_id, b.client_id);
    assert!(a.client_id.starts_with("tnp_"));
    assert!(issuer.register_client(None, "C").await.is_err());
}

#[tokio::test]
async fn expired_session_cannot_be_exchanged() {
    let mut config = identity_service::config::IdentityConfig::local();
    config.tokens.session_ttl_seconds = -60;
    let app = TestApp::spawn_with(config).await;
    let (profile, _, _) = jane(&app).await;
    let public = app.permanent_context(profile).await;

    let client = app
        .state
        .issuer
        .register_client(Some("app.example.com"), "Demo App")
        .await
        .unwrap();
    let (session_token, _) = app
        .state
        .issuer
        .create_authorization_session(profile, &client.client_id, public, RETURN_URL, "st", "req-1")
        .await
        .unwrap();

    let res = app
        .post("/oauth/token", None, json!({ "sessionToken": session_token }))
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.error_code(), "AUTH_FAILED");

    let audit = app
        .get("/audit?action=TOKEN_EXCHANGE_FAILED", Some(profile))
        .await;
    let entries = audit.data()["entries"].as_array().unwrap().clone();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["details"]["reason"], "expired");
}

#[tokio::test]
async fn concurrent_exchanges_issue_one_bearer() {
    let app = TestApp::spawn().await;
    let (profile, _, _) = jane(&app).await;
    let public = app.permanent_context(profile).await;

    let issuer = &app.state.issuer;
    let client = issuer
        .register_client(Some("app.example.com"), "Demo App")
        .await
        .unwrap();
    let (session_token, _) = issuer
        .create_authorization_session(profile, &client.client_id, public, RETURN_URL, "st", "req-1")
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        issuer.exchange_session(&session_token, "a"),
        issuer.exchange_session(&session_token, "b"),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.code().as_str() == "AUTH_FAILED"));
}

#[tokio::test]
async fn expired_bearer_is_rejected_and_audited_once() {
    let mut config = identity_service::config::IdentityConfig::local();
    config.tokens.bearer_ttl_minutes = -5;
    let app = TestApp::spawn_with(config).await;
    let (profile, _, _) = jane(&app).await;
    let token = bearer_for(&app, profile, "").await;

    let before = app.store.audit_len();
    let res = resolve_bearer(&app, Some(&token)).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.error_code(), "AUTH_FAILED");
    assert_eq!(app.store.audit_len(), before + 1);

    let last = app.store.audit_entries().pop().expect("audit entry");
    assert_eq!(last.action(), Some(AuditAction::ClaimsResolutionFailed));
    assert_eq!(last.details.as_ref().unwrap()["reason"], "token_expired");

    let claims = app
        .get("/audit?action=CLAIMS_RESOLVED", Some(profile))
        .await;
    assert!(claims.data()["entries"].as_array().unwrap().is_empty());
}
