#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use identity_service::{
    build_router, config::IdentityConfig, store::MemoryStore, AppState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn error_code(&self) -> &str {
        self.body["error"]["code"].as_str().unwrap_or("")
    }

    pub fn location(&self) -> String {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(IdentityConfig::local()).await
    }

    pub async fn spawn_with(config: IdentityConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(config, store.clone()).expect("Failed to build state");
        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");
        Self {
            router,
            state,
            store,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        caller: Option<Uuid>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(caller) = caller {
            builder = builder.header("X-User-ID", caller.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, caller: Option<Uuid>) -> TestResponse {
        self.call(Method::GET, uri, caller, None).await
    }

    pub async fn post(&self, uri: &str, caller: Option<Uuid>, body: Value) -> TestResponse {
        self.call(Method::POST, uri, caller, Some(body)).await
    }

    // ==================== Fixtures ====================

    pub async fn create_profile(&self, email: &str) -> Uuid {
        let res = self
            .post("/profiles", None, json!({ "email": email }))
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "create profile: {}", res.body);
        id_field(res.data(), "profileId")
    }

    pub async fn add_name(&self, owner: Uuid, name: &str, preferred: bool) -> Uuid {
        let res = self
            .post(
                "/names",
                Some(owner),
                json!({ "name": name, "isPreferred": preferred }),
            )
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "add name: {}", res.body);
        id_field(res.data(), "variantId")
    }

    pub async fn create_context(&self, owner: Uuid, name: &str) -> Uuid {
        let res = self
            .post("/contexts", Some(owner), json!({ "name": name }))
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "create context: {}", res.body);
        id_field(res.data(), "contextId")
    }

    pub async fn assign_primary(&self, owner: Uuid, context_id: Uuid, variant_id: Uuid) {
        let res = self
            .call(
                Method::PUT,
                &format!("/contexts/{}/assignments/name", context_id),
                Some(owner),
                Some(json!({ "variantId": variant_id, "isPrimary": true })),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "assign: {}", res.body);
    }

    pub async fn permanent_context(&self, owner: Uuid) -> Uuid {
        let res = self.get("/contexts", Some(owner)).await;
        assert_eq!(res.status, StatusCode::OK);
        let contexts = res.data().as_array().expect("contexts array");
        let public = contexts
            .iter()
            .find(|c| c["isPermanent"] == true)
            .expect("permanent context");
        id_field(public, "contextId")
    }

    pub async fn consent(
        &self,
        caller: Uuid,
        action: &str,
        granter: Uuid,
        requester: Uuid,
        context_name: Option<&str>,
    ) -> TestResponse {
        let mut body = json!({
            "action": action,
            "granterId": granter,
            "requesterId": requester,
        });
        if let Some(name) = context_name {
            body["contextName"] = json!(name);
        }
        self.post("/consents", Some(caller), body).await
    }

    pub async fn resolve(
        &self,
        caller: Option<Uuid>,
        target: Uuid,
        requester: Option<Uuid>,
        context_name: Option<&str>,
    ) -> TestResponse {
        let mut body = json!({ "targetId": target });
        if let Some(requester) = requester {
            body["requesterId"] = json!(requester);
        }
        if let Some(name) = context_name {
            body["contextName"] = json!(name);
        }
        self.post("/resolve", caller, body).await
    }
}

pub fn id_field(value: &Value, field: &str) -> Uuid {
    value[field]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(|| panic!("missing {} in {}", field, value))
}

/// Value of a query parameter in a redirect location.
pub fn query_param(url: &str, key: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| urlencoding::decode(v).map(|s| s.into_owned()).unwrap_or_default())
    })
}

/// A profile with a preferred name "Jane Smith" and a "Work" context whose
/// primary name is "J. Smith". Returns (profile, work context, work variant).
pub async fn jane(app: &TestApp) -> (Uuid, Uuid, Uuid) {
    let jane = app
        .create_profile(&format!("jane-{}@example.com", Uuid::new_v4()))
        .await;
    app.add_name(jane, "Jane Smith", true).await;
    let work_name = app.add_name(jane, "J. Smith", false).await;
    let work = app.create_context(jane, "Work").await;
    app.assign_primary(jane, work, work_name).await;
    (jane, work, work_name)
}
