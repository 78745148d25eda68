mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{body_json, internal_post, post_json, settle, test_config, TestApp};
use security_service::services::{RateLimitPolicy, RateLimitTier};
use serde_json::json;

#[tokio::test]
async fn internal_key_is_required() {
    let app = TestApp::new();

    let response = app
        .send(post_json(
            "/security/login/check",
            None,
            json!({ "email": "a@example.com" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut request = internal_post("/security/login/check", json!({ "email": "a@example.com" }));
    request
        .headers_mut()
        .insert("x-internal-api-key", "not-the-key".parse().unwrap());
    assert_eq!(app.send(request).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn repeated_failures_lock_the_account_until_expiry() {
    let app = TestApp::new();
    let failure = || {
        internal_post(
            "/security/login/failure",
            json!({ "email": "Victim@Example.com", "ipAddress": "198.51.100.9" }),
        )
    };

    for expected_remaining in [4, 3, 2, 1] {
        let body = body_json(app.send(failure()).await).await;
        assert_eq!(body["isLocked"], false);
        assert_eq!(body["attemptsRemaining"], expected_remaining);
    }

    let body = body_json(app.send(failure()).await).await;
    assert_eq!(body["isLocked"], true);
    assert_eq!(body["attemptsRemaining"], 0);
    assert!(body["lockedUntil"].is_string());

    let check = || internal_post("/security/login/check", json!({ "email": "victim@example.com" }));
    let body = body_json(app.send(check()).await).await;
    assert_eq!(body["isLocked"], true);

    app.clock.advance(Duration::minutes(16));
    let body = body_json(app.send(check()).await).await;
    assert_eq!(body["isLocked"], false);
    assert_eq!(body["attemptsRemaining"], 5);

    let attempts = app.store.login_attempts();
    assert_eq!(attempts.len(), 5);
    assert!(attempts.iter().all(|a| !a.success));
    assert!(attempts
        .iter()
        .all(|a| a.ip_address.as_deref() == Some("198.51.100.9")));
}

#[tokio::test]
async fn success_resets_the_counter_and_is_logged() {
    let app = TestApp::new();
    for _ in 0..3 {
        app.send(internal_post(
            "/security/login/failure",
            json!({ "email": "user@example.com" }),
        ))
        .await;
    }

    let response = app
        .send(internal_post(
            "/security/login/success",
            json!({ "email": "user@example.com", "userId": "user-1" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(
        app.send(internal_post(
            "/security/login/check",
            json!({ "email": "user@example.com" }),
        ))
        .await,
    )
    .await;
    assert_eq!(body["attemptsRemaining"], 5);

    let attempts = app.store.login_attempts();
    assert_eq!(attempts.len(), 4);
    let success = attempts.iter().find(|a| a.success).unwrap();
    assert_eq!(success.user_id.as_deref(), Some("user-1"));
    // falls back to the caller's forwarded address
    assert_eq!(success.ip_address.as_deref(), Some(common::TEST_IP));

    settle().await;
    let actions = app.audit_actions();
    assert_eq!(actions.iter().filter(|a| *a == "login_failed").count(), 3);
    assert_eq!(actions.iter().filter(|a| *a == "login").count(), 1);
}

#[tokio::test]
async fn malformed_email_is_a_validation_error() {
    let app = TestApp::new();
    let response = app
        .send(internal_post(
            "/security/login/failure",
            json!({ "email": "not-an-email" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.store.login_attempts().is_empty());
}

#[tokio::test]
async fn auth_tier_limits_login_endpoints() {
    let mut config = test_config();
    config
        .rate_limit
        .tiers
        .set(RateLimitTier::Auth, RateLimitPolicy::new(5, Duration::minutes(15)));
    let app = TestApp::with_config(config);

    for _ in 0..5 {
        let response = app
            .send(internal_post(
                "/security/login/check",
                json!({ "email": "a@example.com" }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app
        .send(internal_post(
            "/security/login/check",
            json!({ "email": "a@example.com" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "900");
}

fn default_auth_tier_app() -> TestApp {
    let mut config = test_config();
    config
        .rate_limit
        .tiers
        .set(RateLimitTier::Auth, RateLimitTier::Auth.default_policy());
    TestApp::with_config(config)
}

#[tokio::test]
async fn failures_for_different_users_do_not_share_a_budget() {
    let app = default_auth_tier_app();

    for n in 0..7 {
        let response = app
            .send(internal_post(
                "/security/login/failure",
                json!({
                    "email": format!("user{}@example.com", n),
                    "ipAddress": format!("198.51.100.{}", n),
                }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK, "failure #{}", n);
    }
    assert_eq!(app.store.login_attempts().len(), 7);
}

#[tokio::test]
async fn one_user_is_locked_before_their_budget_runs_out() {
    let app = default_auth_tier_app();
    let failure = || {
        internal_post(
            "/security/login/failure",
            json!({ "email": "target@example.com" }),
        )
    };

    for _ in 0..5 {
        assert_eq!(app.send(failure()).await.status(), StatusCode::OK);
    }
    let locked = body_json(
        app.send(internal_post(
            "/security/login/check",
            json!({ "email": "TARGET@example.com" }),
        ))
        .await,
    )
    .await;
    assert_eq!(locked["isLocked"], true);

    let denied = app.send(failure()).await;
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

    // other users are unaffected
    let other = app
        .send(internal_post(
            "/security/login/failure",
            json!({ "email": "bystander@example.com" }),
        ))
        .await;
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn requests_without_the_key_do_not_spend_a_users_budget() {
    let app = default_auth_tier_app();

    for _ in 0..6 {
        let response = app
            .send(post_json(
                "/security/login/check",
                None,
                json!({ "email": "victim@example.com" }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app
        .send(internal_post(
            "/security/login/check",
            json!({ "email": "victim@example.com" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}
