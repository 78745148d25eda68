#![cfg(feature = "totp")]

mod common;

use axum::http::StatusCode;
use common::{body_json, post_json, settle, test_config, TestApp};
use security_service::{
    clock::Clock,
    models::{Identity, Role},
    services::two_factor::TotpProvider,
};
use serde_json::{json, Value};

fn current_code(app: &TestApp, secret: &str) -> String {
    TotpProvider::new("test")
        .code_at(secret, app.clock.now())
        .unwrap()
}

async fn enrol(app: &TestApp, token: &str) -> Value {
    let response = app
        .send(post_json("/security/2fa/setup", Some(token), json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn verify(app: &TestApp, token: &str, code: &str) -> Value {
    let response = app
        .send(post_json(
            "/security/2fa/verify",
            Some(token),
            json!({ "token": code }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn setup_requires_a_session() {
    let app = TestApp::new();
    let response = app
        .send(post_json("/security/2fa/setup", None, json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn enrolment_is_confirmed_by_the_first_code() {
    let app = TestApp::new();
    let token = app.login(
        Identity::new("builder-1")
            .with_email("builder@example.com")
            .with_role(Role::Builder),
    );

    let setup = enrol(&app, &token).await;
    let secret = setup["secret"].as_str().unwrap().to_string();
    assert!(setup["qrCodeUrl"]
        .as_str()
        .unwrap()
        .starts_with("otpauth://totp/"));
    assert_eq!(setup["backupCodes"].as_array().unwrap().len(), 10);

    // not enabled yet, so plain verification fails
    assert!(!app.state.two_factor.verify("builder-1", "12345678").await.unwrap());

    let body = verify(&app, &token, &current_code(&app, &secret)).await;
    assert_eq!(body["verified"], true);
    assert_eq!(body["outcome"], "enabled");

    settle().await;
    assert!(app
        .audit_actions()
        .contains(&"two_factor_enabled".to_string()));

    let code = current_code(&app, &secret);
    let body = verify(&app, &token, &code).await;
    assert_eq!(body["outcome"], "verified");
}

#[tokio::test]
async fn backup_codes_are_single_use() {
    let app = TestApp::new();
    let token = app.login(Identity::new("buyer-1").with_role(Role::Buyer));
    let setup = enrol(&app, &token).await;
    let secret = setup["secret"].as_str().unwrap().to_string();
    let backup = setup["backupCodes"][0].as_str().unwrap().to_string();
    verify(&app, &token, &current_code(&app, &secret)).await;

    let body = verify(&app, &token, &backup).await;
    assert_eq!(body["outcome"], "verified");

    let body = verify(&app, &token, &backup).await;
    assert_eq!(body["verified"], false);
    assert_eq!(body["outcome"], "rejected");
}

#[tokio::test]
async fn regenerated_backup_codes_replace_the_old_set() {
    let app = TestApp::new();
    let token = app.login(Identity::new("buyer-2").with_role(Role::Buyer));
    let setup = enrol(&app, &token).await;
    let secret = setup["secret"].as_str().unwrap().to_string();
    let old_backup = setup["backupCodes"][3].as_str().unwrap().to_string();
    verify(&app, &token, &current_code(&app, &secret)).await;

    let response = app
        .send(post_json(
            "/security/2fa/backup-codes",
            Some(&token),
            json!({ "token": current_code(&app, &secret) }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let fresh = body["backupCodes"].as_array().unwrap();
    assert_eq!(fresh.len(), 10);

    let body = verify(&app, &token, &old_backup).await;
    assert_eq!(body["outcome"], "rejected");
    let body = verify(&app, &token, fresh[0].as_str().unwrap()).await;
    assert_eq!(body["outcome"], "verified");
}

#[tokio::test]
async fn disable_needs_a_valid_code_and_is_audited() {
    let app = TestApp::new();
    let token = app.login(Identity::new("builder-2").with_role(Role::Builder));
    let setup = enrol(&app, &token).await;
    let secret = setup["secret"].as_str().unwrap().to_string();
    verify(&app, &token, &current_code(&app, &secret)).await;

    let rejected = app
        .send(post_json(
            "/security/2fa/disable",
            Some(&token),
            json!({ "token": "00000000" }),
        ))
        .await;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(post_json(
            "/security/2fa/disable",
            Some(&token),
            json!({ "token": current_code(&app, &secret) }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    settle().await;
    let actions = app.audit_actions();
    assert_eq!(
        actions.iter().filter(|a| *a == "two_factor_disabled").count(),
        1
    );
    assert!(!app
        .state
        .two_factor
        .verify("builder-2", &current_code(&app, &secret))
        .await
        .unwrap());
}

#[tokio::test]
async fn verify_without_enrolment_is_a_bad_request() {
    let app = TestApp::new();
    let token = app.login(Identity::new("buyer-3"));
    let response = app
        .send(post_json(
            "/security/2fa/verify",
            Some(&token),
            json!({ "token": "123456" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn disabled_two_factor_refuses_enrolment() {
    let mut config = test_config();
    config.two_factor.enabled = false;
    let app = TestApp::with_config(config);
    let token = app.login(Identity::new("buyer-4"));

    let response = app
        .send(post_json("/security/2fa/setup", Some(&token), json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(app.store.audit_entries().is_empty());
}

#[tokio::test]
async fn setup_cannot_replace_an_enabled_second_factor() {
    let app = TestApp::new();
    let token = app.login(Identity::new("buyer-9").with_role(Role::Buyer));

    let setup = enrol(&app, &token).await;
    let secret = setup["secret"].as_str().unwrap().to_string();
    let backup = setup["backupCodes"][0].as_str().unwrap().to_string();
    verify(&app, &token, &current_code(&app, &secret)).await;

    let response = app
        .send(post_json("/security/2fa/setup", Some(&token), json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"], "conflict");

    let code = current_code(&app, &secret);
    assert!(app.state.two_factor.verify("buyer-9", &code).await.unwrap());
    assert!(app.state.two_factor.verify("buyer-9", &backup).await.unwrap());
}
