mod common;

use axum::http::StatusCode;
use common::{TestApp, TEST_JWT_SECRET};
use iam_service::config::JwtConfig;
use iam_service::models::Principal;
use iam_service::services::JwtService;
use secrecy::SecretString;
use serde_json::{json, Value};
use uuid::Uuid;

fn id(value: &Value) -> String {
    value.as_str().unwrap().to_string()
}

/// alice founds Acme (FullAccess) and adds bob to it (SelfManage).
async fn acme(app: &TestApp) -> (String, String, Value, Value) {
    let alice = app.register("alice", Some("Acme")).await;
    let alice_token = app.session_token(Some("acme"), "alice").await;
    let bob = app.create_member(&alice_token, "bob").await;
    assert_eq!(bob.status, StatusCode::CREATED, "{}", bob.raw);
    let bob_token = app.session_token(Some("acme"), "bob").await;
    (alice_token, bob_token, alice, bob.body)
}

#[tokio::test]
async fn test_missing_or_malformed_token_is_unauthorized() {
    let app = TestApp::spawn().await;

    assert_eq!(app.get("/s/auth/profile", None).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        app.get("/s/auth/profile", Some("not-a-jwt")).await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.post("/s/auth/2fa/setup", None, json!({})).await.status,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_unauthorized() {
    let app = TestApp::spawn().await;
    app.register("alice", Some("Acme")).await;
    let claims = app
        .state
        .jwt
        .validate(&app.session_token(Some("acme"), "alice").await)
        .unwrap();

    let forger = JwtService::new(&JwtConfig {
        secret: SecretString::new(format!("{}-but-different", TEST_JWT_SECRET)),
        session_ttl_minutes: 1440,
        challenge_ttl_minutes: 5,
    })
    .unwrap();
    let mut principal = Principal::new(claims.tenant_id, "alice".into(), "a@x.test".into(), String::new());
    principal.principal_id = claims.sub;
    let forged = forger.issue_session(&principal).unwrap();

    assert_eq!(
        app.get("/s/auth/profile", Some(&forged.token)).await.status,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_expired_token_is_unauthorized() {
    let app = TestApp::spawn_with(|config| config.jwt.session_ttl_minutes = -1).await;
    app.register("alice", Some("Acme")).await;
    let token = app.session_token(Some("acme"), "alice").await;

    assert_eq!(app.get("/s/auth/profile", Some(&token)).await.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_for_unknown_principal_is_unauthorized() {
    let app = TestApp::spawn().await;
    let ghost = Principal::new(Uuid::new_v4(), "ghost".into(), "g@x.test".into(), String::new());
    let token = app.state.jwt.issue_session(&ghost).unwrap();

    assert_eq!(
        app.get("/s/auth/profile", Some(&token.token)).await.status,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_members_read_their_own_profile() {
    let app = TestApp::spawn().await;
    let (alice_token, bob_token, alice, bob) = acme(&app).await;

    let alice_profile = app.get("/s/auth/profile", Some(&alice_token)).await;
    assert_eq!(alice_profile.status, StatusCode::OK);
    assert_eq!(alice_profile.body["username"], "alice");
    assert_eq!(alice_profile.body["principal_id"], alice["principal"]["principal_id"]);
    assert!(alice_profile.body.get("totp_secret").is_none());

    let bob_profile = app.get("/s/auth/profile", Some(&bob_token)).await;
    assert_eq!(bob_profile.status, StatusCode::OK);
    assert_eq!(bob_profile.body["principal_id"], bob["principal_id"]);
    assert_eq!(bob_profile.body["tenant_id"], alice["tenant_id"]);
    assert_eq!(bob["tenant_id"], alice["tenant_id"]);
}

#[tokio::test]
async fn test_self_manage_cannot_author_iam() {
    let app = TestApp::spawn().await;
    let (_, bob_token, _, _) = acme(&app).await;

    let group = app.post("/s/iam/groups", Some(&bob_token), json!({ "name": "ops" })).await;
    assert_eq!(group.status, StatusCode::FORBIDDEN);
    assert_eq!(group.raw, r#"{"error":"access denied"}"#);

    let role = app.post("/s/iam/roles", Some(&bob_token), json!({ "name": "ops" })).await;
    assert_eq!(role.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_group_policy_grants_and_deny_overrides() {
    let app = TestApp::spawn().await;
    let (alice_token, bob_token, _, bob) = acme(&app).await;
    let bob_id = id(&bob["principal_id"]);

    // Allow group:create through a group bob joins.
    let creators = app
        .post(
            "/s/iam/policies",
            Some(&alice_token),
            json!({
                "name": "Group Creators",
                "statements": [{
                    "effect": "allow",
                    "actions": ["group:create"],
                    "resources": ["org:{org_id}:group"]
                }]
            }),
        )
        .await;
    assert_eq!(creators.status, StatusCode::CREATED, "{}", creators.raw);
    assert_eq!(creators.body["policy_slug"], "group-creators");
    let creators_id = id(&creators.body["policy_id"]);

    let team = app.post("/s/iam/groups", Some(&alice_token), json!({ "name": "team" })).await;
    assert_eq!(team.status, StatusCode::CREATED);
    let team_id = id(&team.body["group_id"]);

    let attach = app
        .post(
            &format!("/s/iam/policies/{}/attachments", creators_id),
            Some(&alice_token),
            json!({ "target_type": "group", "target_id": team_id }),
        )
        .await;
    assert_eq!(attach.status, StatusCode::OK, "{}", attach.raw);

    let join = app
        .post(
            &format!("/s/iam/groups/{}/members", team_id),
            Some(&alice_token),
            json!({ "principal_id": bob_id }),
        )
        .await;
    assert_eq!(join.status, StatusCode::NO_CONTENT);

    let allowed = app.post("/s/iam/groups", Some(&bob_token), json!({ "name": "bobs" })).await;
    assert_eq!(allowed.status, StatusCode::CREATED);

    // An explicit deny attached directly wins.
    let deny = app
        .post(
            "/s/iam/policies",
            Some(&alice_token),
            json!({
                "name": "No Groups For Bob",
                "statements": [{
                    "effect": "deny",
                    "actions": ["group:create"],
                    "resources": ["*"]
                }]
            }),
        )
        .await;
    assert_eq!(deny.status, StatusCode::CREATED);
    let attach_deny = app
        .post(
            &format!("/s/iam/policies/{}/attachments", id(&deny.body["policy_id"])),
            Some(&alice_token),
            json!({ "target_type": "principal", "target_id": bob_id }),
        )
        .await;
    assert_eq!(attach_deny.status, StatusCode::OK);

    let denied = app.post("/s/iam/groups", Some(&bob_token), json!({ "name": "more" })).await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_role_assignment_grants_access() {
    let app = TestApp::spawn().await;
    let (alice_token, bob_token, _, bob) = acme(&app).await;
    let bob_id = id(&bob["principal_id"]);

    let policy = app
        .post(
            "/s/iam/policies",
            Some(&alice_token),
            json!({
                "name": "Role Makers",
                "statements": [{
                    "effect": "allow",
                    "actions": ["role:create"],
                    "resources": ["org:{org_id}:role"]
                }]
            }),
        )
        .await;
    let role = app.post("/s/iam/roles", Some(&alice_token), json!({ "name": "architect" })).await;
    assert_eq!(role.status, StatusCode::CREATED);
    let role_id = id(&role.body["role_id"]);

    app.post(
        &format!("/s/iam/policies/{}/attachments", id(&policy.body["policy_id"])),
        Some(&alice_token),
        json!({ "target_type": "role", "target_id": role_id }),
    )
    .await;

    assert_eq!(
        app.post("/s/iam/roles", Some(&bob_token), json!({ "name": "x" })).await.status,
        StatusCode::FORBIDDEN
    );

    let assign = app
        .post(
            &format!("/s/iam/roles/{}/members", role_id),
            Some(&alice_token),
            json!({ "principal_id": bob_id }),
        )
        .await;
    assert_eq!(assign.status, StatusCode::NO_CONTENT);

    assert_eq!(
        app.post("/s/iam/roles", Some(&bob_token), json!({ "name": "x" })).await.status,
        StatusCode::CREATED
    );
}

#[tokio::test]
async fn test_full_access_does_not_cross_tenants() {
    let app = TestApp::spawn().await;
    let (alice_token, _, alice, _) = acme(&app).await;
    app.register("carol", Some("Globex")).await;
    let carol_token = app.session_token(Some("globex"), "carol").await;

    // carol administers Globex; Acme's principals are invisible to her.
    let group = app.post("/s/iam/groups", Some(&carol_token), json!({ "name": "ops" })).await;
    assert_eq!(group.status, StatusCode::CREATED);

    let add_alice = app
        .post(
            &format!("/s/iam/groups/{}/members", id(&group.body["group_id"])),
            Some(&carol_token),
            json!({ "principal_id": id(&alice["principal"]["principal_id"]) }),
        )
        .await;
    assert_eq!(add_alice.status, StatusCode::NOT_FOUND);

    // And alice cannot touch carol's group.
    let foreign = app
        .post(
            &format!("/s/iam/groups/{}/members", id(&group.body["group_id"])),
            Some(&alice_token),
            json!({ "principal_id": id(&alice["principal"]["principal_id"]) }),
        )
        .await;
    assert_eq!(foreign.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_policy_validation_errors() {
    let app = TestApp::spawn().await;
    let (alice_token, _, _, _) = acme(&app).await;

    let no_statements = app
        .post("/s/iam/policies", Some(&alice_token), json!({ "name": "Empty", "statements": [] }))
        .await;
    assert_eq!(no_statements.status, StatusCode::BAD_REQUEST);

    let no_actions = app
        .post(
            "/s/iam/policies",
            Some(&alice_token),
            json!({
                "name": "Broken",
                "statements": [{ "effect": "allow", "actions": [], "resources": ["*"] }]
            }),
        )
        .await;
    assert_eq!(no_actions.status, StatusCode::BAD_REQUEST);

    let bad_effect = app
        .post(
            "/s/iam/policies",
            Some(&alice_token),
            json!({
                "name": "Weird",
                "statements": [{ "effect": "maybe", "actions": ["*"], "resources": ["*"] }]
            }),
        )
        .await;
    assert_eq!(bad_effect.status, StatusCode::BAD_REQUEST);
}
