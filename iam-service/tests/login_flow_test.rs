mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use common::{build_request, token_of, TestApp, CLIENT_IP, PASSWORD};
use iam_service::services::IamStore;
use iam_service::services::TokenKind;
use serde_json::json;

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::spawn().await;
    let response = app.get("/health", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
}

#[tokio::test]
async fn test_login_without_second_factor_issues_day_long_session() {
    let app = TestApp::spawn().await;
    app.register("alice", Some("Acme")).await;

    let response = app.login(Some("acme"), "alice", PASSWORD).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["token_type"], "Bearer");
    assert_eq!(response.body["expires_in"], 86_400);

    let claims = app.state.jwt.validate(&token_of(&response)).unwrap();
    assert!(claims.second_factor_satisfied);
    assert_eq!(claims.kind, TokenKind::Session);
    assert_eq!(claims.exp - claims.iat, 86_400);
}

#[tokio::test]
async fn test_login_with_second_factor_issues_short_challenge() {
    let app = TestApp::spawn().await;
    app.register("alice", Some("Acme")).await;
    let token = app.session_token(Some("acme"), "alice").await;
    app.enable_second_factor(&token).await;

    let response = app.login(Some("acme"), "alice", PASSWORD).await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.body["expires_in"], 300);
    assert!(response.body["message"].as_str().unwrap().contains("Second factor"));

    let claims = app.state.jwt.validate(&token_of(&response)).unwrap();
    assert!(!claims.second_factor_satisfied);
    assert_eq!(claims.kind, TokenKind::Challenge);
    assert_eq!(claims.exp - claims.iat, 300);
}

#[tokio::test]
async fn test_credential_failures_are_indistinguishable() {
    let app = TestApp::spawn().await;
    app.register("alice", Some("Acme")).await;

    let wrong_password = app.login(Some("acme"), "alice", "not-the-password").await;
    let unknown_user = app.login(Some("acme"), "mallory", PASSWORD).await;
    let unknown_tenant = app.login(Some("nowhere"), "alice", PASSWORD).await;

    for response in [&wrong_password, &unknown_user, &unknown_tenant] {
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }
    assert_eq!(wrong_password.raw, r#"{"error":"invalid credentials"}"#);
    assert_eq!(wrong_password.raw, unknown_user.raw);
    assert_eq!(wrong_password.raw, unknown_tenant.raw);
}

#[tokio::test]
async fn test_login_attempts_are_audited() {
    let app = TestApp::spawn().await;
    app.register("alice", Some("Acme")).await;

    app.login(Some("acme"), "alice", "not-the-password").await;
    app.login(Some("acme"), "ghost", PASSWORD).await;
    app.login(Some("acme"), "alice", PASSWORD).await;

    let rows = app.wait_for_login_activity(3).await;
    let statuses: Vec<&str> = rows.iter().map(|r| r.status_code.as_str()).collect();
    assert_eq!(statuses, vec!["invalid_password", "user_not_found", "success"]);

    assert!(rows[2].success);
    assert!(rows[2].principal_id.is_some());
    assert!(rows[1].principal_id.is_none());
    assert_eq!(rows[0].ip_address.as_deref(), Some("198.51.100.7"));
    assert_eq!(rows[0].user_agent.as_deref(), Some("integration-test"));
}

#[tokio::test]
async fn test_registration_creates_organization_administered_by_registrant() {
    let app = TestApp::spawn().await;

    let alice = app.register("alice", Some("Acme")).await;
    assert_eq!(alice["tenant_slug"], "acme");
    assert_eq!(alice["tenant_created"], true);
    assert_eq!(alice["is_tenant_admin"], true);
    assert!(alice["principal"].get("password_hash").is_none());

    let token = app.session_token(Some("acme"), "alice").await;
    let group = app.post("/s/iam/groups", Some(&token), json!({ "name": "ops" })).await;
    assert_eq!(group.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_registering_a_taken_slug_never_joins_that_organization() {
    let app = TestApp::spawn().await;
    let owner = app.register("alice", Some("Acme")).await;

    let stranger = app.register("mallory", Some("ACME")).await;
    assert_ne!(stranger["tenant_id"], owner["tenant_id"]);
    assert_eq!(stranger["tenant_created"], true);
    let slug = stranger["tenant_slug"].as_str().unwrap().to_string();
    assert!(slug.starts_with("acme-"), "{}", slug);

    // The stranger cannot sign in to the owner's organization.
    let intrusion = app.login(Some("acme"), "mallory", PASSWORD).await;
    assert_eq!(intrusion.status, StatusCode::UNAUTHORIZED);

    let token = app.session_token(Some(slug.as_str()), "mallory").await;
    let claims = app.state.jwt.validate(&token).unwrap();
    assert_eq!(claims.tenant_id.to_string(), stranger["tenant_id"].as_str().unwrap());

    let same_name = app
        .post(
            "/auth/register",
            None,
            json!({
                "username": "eve",
                "email": "eve@example.com",
                "password": PASSWORD,
                "organization": "Acme",
            }),
        )
        .await;
    assert_eq!(same_name.status, StatusCode::CONFLICT);
    assert_eq!(same_name.body["error"], "organization name already exists");
}

#[tokio::test]
async fn test_registration_without_organization_stays_out_of_default_tenant() {
    let app = TestApp::spawn().await;
    let default = app.store.find_tenant_by_slug("default").await.unwrap().unwrap();

    let alice = app.register("alice", None).await;
    assert_ne!(alice["tenant_id"].as_str().unwrap(), default.tenant_id.to_string());
    assert_eq!(alice["is_tenant_admin"], true);
    assert_eq!(app.store.count_principals(default.tenant_id).await.unwrap(), 0);

    let default_login = app.login(None, "alice", PASSWORD).await;
    assert_eq!(default_login.status, StatusCode::UNAUTHORIZED);

    let slug = alice["tenant_slug"].as_str().unwrap().to_string();
    assert!(slug.starts_with("organization-"), "{}", slug);
    assert_eq!(app.login(Some(slug.as_str()), "alice", PASSWORD).await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_same_username_in_different_tenants() {
    let app = TestApp::spawn().await;
    app.register("alice", Some("Acme")).await;
    app.register("alice", Some("Globex")).await;

    let acme = app.session_token(Some("acme"), "alice").await;
    let globex = app.session_token(Some("globex"), "alice").await;
    let acme_claims = app.state.jwt.validate(&acme).unwrap();
    let globex_claims = app.state.jwt.validate(&globex).unwrap();
    assert_ne!(acme_claims.tenant_id, globex_claims.tenant_id);
}

#[tokio::test]
async fn test_admin_adds_member_who_can_sign_in() {
    let app = TestApp::spawn().await;
    let alice = app.register("alice", Some("Acme")).await;
    let alice_token = app.session_token(Some("acme"), "alice").await;

    let bob = app.create_member(&alice_token, "bob").await;
    assert_eq!(bob.status, StatusCode::CREATED, "{}", bob.raw);
    assert_eq!(bob.body["tenant_id"], alice["tenant_id"]);
    assert!(bob.body.get("password_hash").is_none());

    let bob_token = app.session_token(Some("acme"), "bob").await;
    let profile = app.get("/s/auth/profile", Some(&bob_token)).await;
    assert_eq!(profile.status, StatusCode::OK);
    assert_eq!(profile.body["principal_id"], bob.body["principal_id"]);

    let duplicate = app.create_member(&alice_token, "bob").await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_member_cannot_add_principals() {
    let app = TestApp::spawn().await;
    app.register("alice", Some("Acme")).await;
    let alice_token = app.session_token(Some("acme"), "alice").await;
    app.create_member(&alice_token, "bob").await;
    let bob_token = app.session_token(Some("acme"), "bob").await;

    let denied = app.create_member(&bob_token, "carol").await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);
    assert_eq!(denied.raw, r#"{"error":"access denied"}"#);
    assert_eq!(app.login(Some("acme"), "carol", PASSWORD).await.status, StatusCode::UNAUTHORIZED);

    let anonymous = app
        .post(
            "/s/iam/principals",
            None,
            json!({ "username": "carol", "email": "carol@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_rejects_bad_input() {
    let app = TestApp::spawn().await;

    let short_password = app
        .post(
            "/auth/register",
            None,
            json!({ "username": "alice", "email": "alice@example.com", "password": "short" }),
        )
        .await;
    assert_eq!(short_password.status, StatusCode::BAD_REQUEST);

    let bad_email = app
        .post(
            "/auth/register",
            None,
            json!({ "username": "alice", "email": "not-an-email", "password": PASSWORD }),
        )
        .await;
    assert_eq!(bad_email.status, StatusCode::BAD_REQUEST);

    let bad_username = app
        .post(
            "/auth/register",
            None,
            json!({ "username": "alice:admin", "email": "alice@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(bad_username.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_is_rate_limited_per_ip() {
    let app = TestApp::spawn_with(|config| {
        config.rate_limit.login_attempts = 2;
        config.rate_limit.login_window_seconds = 60;
    })
    .await;
    app.register("alice", Some("Acme")).await;

    assert_eq!(app.login(Some("acme"), "alice", PASSWORD).await.status, StatusCode::OK);
    assert_eq!(app.login(Some("acme"), "alice", PASSWORD).await.status, StatusCode::OK);

    let limited = app.login(Some("acme"), "alice", PASSWORD).await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
}

fn login_from(forwarded_for: &str) -> Request<Body> {
    let mut request = build_request(
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "tenant": "acme", "username": "alice", "password": "wrong-password" })),
    );
    request
        .headers_mut()
        .insert("x-forwarded-for", forwarded_for.parse().unwrap());
    request
}

#[tokio::test]
async fn test_rotating_forwarded_for_does_not_evade_rate_limit() {
    let app = TestApp::spawn_with(|config| {
        config.rate_limit.login_attempts = 2;
        config.rate_limit.login_window_seconds = 60;
    })
    .await;
    app.register("alice", Some("Acme")).await;

    let mut statuses = Vec::new();
    for hop in ["203.0.113.1", "203.0.113.2", "203.0.113.3"] {
        statuses.push(app.send(login_from(hop)).await.status);
    }
    assert_eq!(statuses[2], StatusCode::TOO_MANY_REQUESTS, "{:?}", statuses);

    // The audit trail records the connecting peer, not the claimed hop.
    let rows = app.wait_for_login_activity(2).await;
    assert!(rows.iter().all(|r| r.ip_address.as_deref() == Some(CLIENT_IP)));
}

#[tokio::test]
async fn test_forwarded_for_honoured_behind_trusted_proxy() {
    let app = TestApp::spawn_with(|config| {
        config.rate_limit.login_attempts = 2;
        config.rate_limit.login_window_seconds = 60;
        config.rate_limit.trust_forwarded_for = true;
    })
    .await;
    app.register("alice", Some("Acme")).await;

    for hop in ["203.0.113.1", "203.0.113.2", "203.0.113.3"] {
        assert_eq!(app.send(login_from(hop)).await.status, StatusCode::UNAUTHORIZED);
    }

    let rows = app.wait_for_login_activity(3).await;
    assert_eq!(rows[0].ip_address.as_deref(), Some("203.0.113.1"));
}
