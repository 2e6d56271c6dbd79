//! Test helper module for iam-service integration tests.
//!
//! Builds the real router over a `MemoryStore` and drives it with
//! `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use iam_service::{
    build_router,
    config::IamConfig,
    models::LoginActivity,
    services::{AuditSink, MemoryStore},
    AppState,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use totp_rs::{Algorithm, TOTP};
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "integration-test-secret-with-enough-bytes";
pub const PASSWORD: &str = "correct-horse-battery";
pub const CLIENT_IP: &str = "198.51.100.7";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub raw: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(customize: impl FnOnce(&mut IamConfig)) -> Self {
        let mut config = IamConfig::for_tests(TEST_JWT_SECRET);
        customize(&mut config);

        let store = Arc::new(MemoryStore::new());
        let (audit, _writer) = AuditSink::spawn(store.clone(), 256);
        let state = AppState::new(config, store.clone(), audit).expect("Failed to build state");
        state
            .registration
            .bootstrap_default_tenant()
            .await
            .expect("Failed to bootstrap default tenant");

        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");

        Self {
            router,
            state,
            store,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        self.send(build_request(method, uri, token, body)).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let raw = String::from_utf8_lossy(&bytes).to_string();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse { status, body, raw }
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::GET, uri, token, None).await
    }

    /// Register `username` as the founder of a new `organization`.
    pub async fn register(&self, username: &str, organization: Option<&str>) -> Value {
        let mut body = json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": PASSWORD,
        });
        if let Some(org) = organization {
            body["organization"] = json!(org);
        }

        let response = self.post("/auth/register", None, body).await;
        assert_eq!(response.status, StatusCode::CREATED, "register failed: {}", response.raw);
        response.body
    }

    /// Have `admin_token`'s holder create `username` in their organization.
    pub async fn create_member(&self, admin_token: &str, username: &str) -> TestResponse {
        self.post(
            "/s/iam/principals",
            Some(admin_token),
            json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "password": PASSWORD,
            }),
        )
        .await
    }

    pub async fn login(&self, tenant: Option<&str>, username: &str, password: &str) -> TestResponse {
        let mut body = json!({ "username": username, "password": password });
        if let Some(tenant) = tenant {
            body["tenant"] = json!(tenant);
        }
        self.post("/auth/login", None, body).await
    }

    /// Log in and return a full session token; panics on anything but 200.
    pub async fn session_token(&self, tenant: Option<&str>, username: &str) -> String {
        let response = self.login(tenant, username, PASSWORD).await;
        assert_eq!(response.status, StatusCode::OK, "login failed: {}", response.raw);
        token_of(&response)
    }

    /// Setup plus first verification. Returns the TOTP secret.
    pub async fn enable_second_factor(&self, token: &str) -> String {
        let setup = self.post("/s/auth/2fa/setup", Some(token), json!({})).await;
        assert_eq!(setup.status, StatusCode::OK, "setup failed: {}", setup.raw);
        let secret = setup.body["secret"].as_str().unwrap().to_string();

        let verify = self
            .post("/s/auth/2fa/verify", Some(token), json!({ "code": totp_now(&secret) }))
            .await;
        assert_eq!(verify.status, StatusCode::OK, "verify failed: {}", verify.raw);
        secret
    }

    /// Audit rows are written asynchronously; wait until `count` exist.
    pub async fn wait_for_login_activity(&self, count: usize) -> Vec<LoginActivity> {
        for _ in 0..100 {
            let rows = self.store.login_activity();
            if rows.len() >= count {
                return rows;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.store.login_activity()
    }
}

/// Request as it arrives from `CLIENT_IP`, the way `serve` with connect
/// info presents it.
pub fn build_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::USER_AGENT, "integration-test");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }

    let mut request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let peer: SocketAddr = format!("{}:40000", CLIENT_IP).parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

pub fn token_of(response: &TestResponse) -> String {
    response.body["token"]
        .as_str()
        .unwrap_or_else(|| panic!("no token in {}", response.raw))
        .to_string()
}

fn totp_for(secret: &str) -> TOTP {
    let bytes = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, secret)
        .expect("secret is base32");
    TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes, None, String::new()).expect("valid TOTP")
}

pub fn totp_now(secret: &str) -> String {
    totp_for(secret).generate_current().expect("clock after epoch")
}

/// A well-formed code that is not valid in the current window.
pub fn totp_wrong(secret: &str) -> String {
    let totp = totp_for(secret);
    let now = totp.generate_current().expect("clock after epoch");
    let first = now.as_bytes()[0];
    let flipped = if first == b'9' { '0' } else { (first + 1) as char };
    format!("{}{}", flipped, &now[1..])
}
