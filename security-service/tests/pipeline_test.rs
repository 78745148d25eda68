mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use chrono::Duration;
use common::{body_json, get as get_req, post_json, settle, test_config, TestApp};
use security_service::{
    clock::Clock,
    middleware::{authorize, PipelineState, RoutePolicy},
    models::{Identity, Permission, PermissionMap, Role, SessionRecord},
    services::{RateLimitPolicy, RateLimitTier},
};
use serde_json::json;
use service_core::middleware::rate_limit::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING};
use tower::util::ServiceExt;

#[tokio::test]
async fn missing_credentials_are_rejected_and_audited() {
    let app = TestApp::new();

    let response = app
        .send(get_req("/security/permissions/check?permission=lead:view", None))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "unauthorized");

    settle().await;
    assert_eq!(app.audit_actions(), vec!["login_failed"]);
}

#[tokio::test]
async fn token_for_unknown_user_is_unauthenticated() {
    let app = TestApp::new();
    let token = app
        .state
        .sessions
        .issue_token(&Identity::new("ghost"), Duration::hours(1))
        .unwrap();

    let response = app
        .send(get_req("/security/permissions/check?permission=lead:view", Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_role_is_forbidden() {
    let app = TestApp::new();
    let buyer = app.login(Identity::new("buyer-1").with_role(Role::Buyer));

    let response = app
        .send(post_json(
            "/security/permissions/grant",
            Some(&buyer),
            json!({ "userId": "buyer-1", "permission": "user:manage" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    settle().await;
    let entries = app.store.audit_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "unauthorized_role_access");
    assert_eq!(entries[0].user_id.as_deref(), Some("buyer-1"));
}

#[tokio::test]
async fn admin_grant_is_applied_and_audited_with_the_target() {
    let app = TestApp::new();
    let admin = app.admin();
    app.store
        .insert_identity(Identity::new("builder-7").with_role(Role::Builder));

    let response = app
        .send(post_json(
            "/security/permissions/grant",
            Some(&admin),
            json!({ "userId": "builder-7", "permission": "user:manage" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(X_RATELIMIT_REMAINING));
    let body = body_json(response).await;
    assert_eq!(body["userId"], "builder-7");
    assert_eq!(body["permissions"]["user:manage"], true);

    assert!(
        app.state
            .permissions
            .has_permission("builder-7", "user:manage")
            .await
    );

    settle().await;
    let entries = app.store.audit_entries();
    let grant = entries
        .iter()
        .find(|e| e.action == "permission_grant")
        .unwrap();
    assert_eq!(grant.user_id.as_deref(), Some("admin-1"));
    assert_eq!(grant.resource_id.as_deref(), Some("builder-7"));
    assert_eq!(grant.ip_address.as_deref(), Some(common::TEST_IP));
}

#[tokio::test]
async fn unknown_permission_and_bad_bodies_are_rejected_without_audit() {
    let app = TestApp::new();
    let admin = app.admin();
    app.store.insert_identity(Identity::new("u-1"));

    let unknown = app
        .send(post_json(
            "/security/permissions/grant",
            Some(&admin),
            json!({ "userId": "u-1", "permission": "castle:storm" }),
        ))
        .await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let empty_user = app
        .send(post_json(
            "/security/permissions/grant",
            Some(&admin),
            json!({ "userId": "", "permission": "user:manage" }),
        ))
        .await;
    assert_eq!(empty_user.status(), StatusCode::BAD_REQUEST);
    let body = body_json(empty_user).await;
    assert_eq!(body["error"], "validation_failed");

    settle().await;
    assert!(app.store.audit_entries().is_empty());
}

#[tokio::test]
async fn session_cookie_authenticates_when_no_bearer_is_sent() {
    let app = TestApp::new();
    app.store
        .insert_identity(Identity::new("buyer-2").with_role(Role::Buyer));
    app.store.insert_session(SessionRecord {
        session_id: "sess-abc".into(),
        user_id: "buyer-2".into(),
        expires_at: app.clock.now() + Duration::hours(1),
        revoked: false,
    });

    let request = Request::builder()
        .uri("/security/permissions/check?permission=property:read")
        .header(header::COOKIE, "theme=dark; session_id=sess-abc")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["granted"], true);

    let request = Request::builder()
        .uri("/security/permissions/check?permission=analytics:view")
        .header(header::COOKIE, "session_id=sess-abc")
        .body(Body::empty())
        .unwrap();
    let body = body_json(app.send(request).await).await;
    assert_eq!(body["granted"], false);
}

#[tokio::test]
async fn rate_limit_denies_with_headers_and_audit() {
    let mut config = test_config();
    config
        .rate_limit
        .tiers
        .set(RateLimitTier::Api, RateLimitPolicy::new(2, Duration::seconds(60)));
    let app = TestApp::with_config(config);
    let buyer = app.login(Identity::new("buyer-3").with_role(Role::Buyer));
    let uri = "/security/permissions/check?permission=property:read";

    let first = app.send(get_req(uri, Some(&buyer))).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()[X_RATELIMIT_LIMIT], "2");
    assert_eq!(first.headers()[X_RATELIMIT_REMAINING], "1");

    let second = app.send(get_req(uri, Some(&buyer))).await;
    assert_eq!(second.headers()[X_RATELIMIT_REMAINING], "0");

    let denied = app.send(get_req(uri, Some(&buyer))).await;
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(denied.headers()[header::RETRY_AFTER], "60");
    assert_eq!(denied.headers()[X_RATELIMIT_REMAINING], "0");
    let body = body_json(denied).await;
    assert_eq!(body["error"], "rate_limited");

    settle().await;
    assert!(app
        .audit_actions()
        .contains(&"rate_limit_exceeded".to_string()));

    // the oldest request leaves the window after a full minute
    app.clock.advance(Duration::seconds(60));
    let again = app.send(get_req(uri, Some(&buyer))).await;
    assert_eq!(again.status(), StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_runs_before_authentication() {
    let mut config = test_config();
    config
        .rate_limit
        .tiers
        .set(RateLimitTier::Api, RateLimitPolicy::new(1, Duration::seconds(60)));
    let app = TestApp::with_config(config);
    let uri = "/security/permissions/check?permission=property:read";

    assert_eq!(
        app.send(get_req(uri, None)).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.send(get_req(uri, None)).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

fn probe_router(app: &TestApp, policy: RoutePolicy) -> Router {
    Router::new()
        .route("/probe", get(|| async { "ok" }))
        .route_layer(from_fn_with_state(
            PipelineState::new(&app.state, policy),
            authorize,
        ))
        .with_state(app.state.clone())
}

#[tokio::test]
async fn fine_grained_permissions_gate_the_handler() {
    let app = TestApp::new();
    let router = probe_router(
        &app,
        RoutePolicy::authenticated(RateLimitTier::Api).permissions(&[Permission::LeadExport]),
    );

    let buyer = app.login(Identity::new("buyer-4").with_role(Role::Buyer));
    let builder = app.login(Identity::new("builder-4").with_role(Role::Builder));
    let mut granted = PermissionMap::new();
    granted.insert("lead:export".to_string(), true);
    let special = app.login(
        Identity::new("buyer-5")
            .with_role(Role::Buyer)
            .with_permissions(granted),
    );

    let status = |token: String| {
        let router = router.clone();
        async move {
            router
                .oneshot(get_req("/probe", Some(&token)))
                .await
                .unwrap()
                .status()
        }
    };

    assert_eq!(status(buyer).await, StatusCode::FORBIDDEN);
    assert_eq!(status(builder).await, StatusCode::OK);
    assert_eq!(status(special).await, StatusCode::OK);

    settle().await;
    let denied: Vec<_> = app
        .store
        .audit_entries()
        .into_iter()
        .filter(|e| e.action == "unauthorized_permission_access")
        .collect();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].user_id.as_deref(), Some("buyer-4"));
}

#[tokio::test]
async fn public_policy_passes_anonymous_requests() {
    let app = TestApp::new();
    let router = probe_router(&app, RoutePolicy::public(RateLimitTier::Api));
    let response = router.oneshot(get_req("/probe", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
