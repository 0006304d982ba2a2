//! Consent ledger lifecycle through `POST /consents`.

mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{jane, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn request_grant_revoke_lifecycle() {
    let app = TestApp::spawn().await;
    let (granter, work, _) = jane(&app).await;
    let requester = app.create_profile("bob@example.com").await;

    let requested = app
        .consent(requester, "request", granter, requester, Some("work"))
        .await;
    assert_eq!(requested.status, StatusCode::CREATED, "{}", requested.body);
    assert_eq!(requested.data()["action"], "request");
    assert_eq!(requested.data()["status"], "PENDING");
    assert_eq!(requested.data()["contextId"], work.to_string());
    let consent_id = requested.data()["consentId"].clone();

    let granted = app.consent(granter, "grant", granter, requester, None).await;
    assert_eq!(granted.status, StatusCode::OK, "{}", granted.body);
    assert_eq!(granted.data()["status"], "GRANTED");
    assert_eq!(granted.data()["effectiveStatus"], "GRANTED");
    assert!(granted.data()["grantedAt"].is_string());

    let revoked = app.consent(granter, "revoke", granter, requester, None).await;
    assert_eq!(revoked.status, StatusCode::OK, "{}", revoked.body);
    assert_eq!(revoked.data()["status"], "REVOKED");
    assert_eq!(revoked.data()["consentId"], consent_id);
}

#[tokio::test]
async fn grant_without_pending_is_consent_not_found() {
    let app = TestApp::spawn().await;
    let (granter, _, _) = jane(&app).await;
    let requester = app.create_profile("bob@example.com").await;

    let res = app.consent(granter, "grant", granter, requester, None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.error_code(), "CONSENT_NOT_FOUND");

    app.consent(requester, "request", granter, requester, None)
        .await;
    app.consent(granter, "grant", granter, requester, None).await;
    let again = app.consent(granter, "grant", granter, requester, None).await;
    assert_eq!(again.error_code(), "CONSENT_NOT_FOUND");
}

#[tokio::test]
async fn revoke_without_grant_is_consent_not_found() {
    let app = TestApp::spawn().await;
    let (granter, _, _) = jane(&app).await;
    let requester = app.create_profile("bob@example.com").await;

    app.consent(requester, "request", granter, requester, None)
        .await;
    let res = app.consent(granter, "revoke", granter, requester, None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.error_code(), "CONSENT_NOT_FOUND");
}

#[tokio::test]
async fn re_request_after_revoke_keeps_the_record() {
    let app = TestApp::spawn().await;
    let (granter, _, _) = jane(&app).await;
    let requester = app.create_profile("bob@example.com").await;

    let first = app
        .consent(requester, "request", granter, requester, Some("Work"))
        .await;
    app.consent(granter, "grant", granter, requester, None).await;
    app.consent(granter, "revoke", granter, requester, None).await;

    let second = app
        .consent(requester, "request", granter, requester, None)
        .await;
    assert_eq!(second.status, StatusCode::CREATED, "{}", second.body);
    assert_eq!(second.data()["status"], "PENDING");
    assert_eq!(second.data()["consentId"], first.data()["consentId"]);
    assert!(second.data()["revokedAt"].is_null());
}

#[tokio::test]
async fn request_while_granted_is_rejected() {
    let app = TestApp::spawn().await;
    let (granter, _, _) = jane(&app).await;
    let requester = app.create_profile("bob@example.com").await;

    app.consent(requester, "request", granter, requester, None)
        .await;
    app.consent(granter, "grant", granter, requester, None).await;

    let res = app
        .consent(requester, "request", granter, requester, None)
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.error_code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn only_the_granter_grants() {
    let app = TestApp::spawn().await;
    let (granter, _, _) = jane(&app).await;
    let requester = app.create_profile("bob@example.com").await;

    app.consent(requester, "request", granter, requester, None)
        .await;
    let res = app.consent(requester, "grant", granter, requester, None).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.error_code(), "AUTHORIZATION_FAILED");
}

#[tokio::test]
async fn only_the_requester_requests() {
    let app = TestApp::spawn().await;
    let (granter, _, _) = jane(&app).await;
    let requester = app.create_profile("bob@example.com").await;

    let res = app.consent(granter, "request", granter, requester, None).await;
    assert_eq!(res.error_code(), "AUTHORIZATION_FAILED");
}

#[tokio::test]
async fn missing_caller_requires_authentication() {
    let app = TestApp::spawn().await;
    let res = app
        .post(
            "/consents",
            None,
            json!({
                "action": "grant",
                "granterId": Uuid::new_v4(),
                "requesterId": Uuid::new_v4(),
            }),
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.error_code(), "AUTHENTICATION_REQUIRED");
}

#[tokio::test]
async fn malformed_payloads_are_validation_errors() {
    let app = TestApp::spawn().await;
    let caller = Uuid::new_v4();

    let unknown_action = app
        .post(
            "/consents",
            Some(caller),
            json!({ "action": "approve", "granterId": caller, "requesterId": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(unknown_action.status, StatusCode::BAD_REQUEST);
    assert_eq!(unknown_action.error_code(), "VALIDATION_ERROR");

    let self_consent = app.consent(caller, "grant", caller, caller, None).await;
    assert_eq!(self_consent.error_code(), "VALIDATION_ERROR");

    let missing_field = app
        .post("/consents", Some(caller), json!({ "action": "revoke", "granterId": caller }))
        .await;
    assert_eq!(missing_field.error_code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn context_must_belong_to_the_granter() {
    let app = TestApp::spawn().await;
    let (granter, _, _) = jane(&app).await;
    let requester = app.create_profile("bob@example.com").await;
    app.create_context(requester, "Gaming").await;

    let res = app
        .consent(requester, "request", granter, requester, Some("Gaming"))
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.error_code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn past_expiry_is_rejected() {
    let app = TestApp::spawn().await;
    let (granter, _, _) = jane(&app).await;
    let requester = app.create_profile("bob@example.com").await;

    let res = app
        .post(
            "/consents",
            Some(requester),
            json!({
                "action": "request",
                "granterId": granter,
                "requesterId": requester,
                "expiresAt": Utc::now() - Duration::minutes(5),
            }),
        )
        .await;
    assert_eq!(res.error_code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn transitions_are_audited() {
    let app = TestApp::spawn().await;
    let (granter, _, _) = jane(&app).await;
    let requester = app.create_profile("bob@example.com").await;

    app.consent(requester, "request", granter, requester, None)
        .await;
    app.consent(granter, "grant", granter, requester, None).await;
    app.consent(granter, "revoke", granter, requester, None).await;

    let res = app
        .call(Method::GET, "/audit?action=CONSENT_GRANTED", Some(granter), None)
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let entries = res.data()["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["actorId"], granter.to_string());
    assert_eq!(entries[0]["targetId"], requester.to_string());

    let all = app.get("/audit", Some(requester)).await;
    let actions: Vec<&str> = all.data()["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["action"].as_str())
        .collect();
    assert!(actions.contains(&"CONSENT_REQUESTED"));
    assert!(actions.contains(&"CONSENT_REVOKED"));
}
