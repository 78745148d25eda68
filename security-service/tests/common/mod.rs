//! Shared setup for security-service integration tests.
//!
//! Every test gets its own in-memory store, manual clock and mock mailer, all
//! injected through `AppState::build`, and drives the real router with
//! `oneshot`.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request},
    response::Response,
    Router,
};
use chrono::Duration;
use http_body_util::BodyExt;
use secrecy::SecretString;
use security_service::{
    build_router,
    clock::ManualClock,
    config::SecurityServiceConfig,
    models::{Identity, Role},
    services::{MockEmailService, RateLimitPolicy, RateLimitTier},
    store::MemoryStore,
    AppState,
};
use serde_json::Value;
use tower::util::ServiceExt;

pub const TEST_INTERNAL_KEY: &str = "test-internal-key-0123456789";
pub const TEST_MASTER_KEY: &str = "test-master-key-for-integration-tests";
pub const TEST_IP: &str = "203.0.113.7";

/// Config with every tier generous enough not to interfere; tests that
/// exercise limiting tighten one tier.
pub fn test_config() -> SecurityServiceConfig {
    let mut config = SecurityServiceConfig::default();
    config.log_level = "error".to_string();
    config.encryption.master_key = Some(SecretString::new(TEST_MASTER_KEY.to_string()));
    config.encryption.kdf_iterations = 1_000;
    config.encryption.rotation_batch_delay_ms = 0;
    config.session.jwt_secret = SecretString::new("integration-test-jwt-secret-0123456789".into());
    config.security.internal_api_key = Some(SecretString::new(TEST_INTERNAL_KEY.to_string()));
    config.alerts.admin_email = Some("security@example.com".to_string());
    for tier in RateLimitTier::ALL {
        config
            .rate_limit
            .tiers
            .set(tier, RateLimitPolicy::new(1_000, Duration::seconds(60)));
    }
    config
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub email: Arc<MockEmailService>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: SecurityServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let email = Arc::new(MockEmailService::new());
        let state = AppState::build(config, store.clone(), email.clone(), clock.clone(), None);
        let router = build_router(state.clone());
        Self {
            state,
            store,
            clock,
            email,
            router,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Store `identity` and return a bearer token for it.
    pub fn login(&self, identity: Identity) -> String {
        let token = self
            .state
            .sessions
            .issue_token(&identity, Duration::hours(1))
            .unwrap();
        self.store.insert_identity(identity);
        token
    }

    pub fn admin(&self) -> String {
        self.login(
            Identity::new("admin-1")
                .with_email("admin@example.com")
                .with_role(Role::Admin),
        )
    }

    pub fn audit_actions(&self) -> Vec<String> {
        self.store
            .audit_entries()
            .into_iter()
            .map(|e| e.action)
            .collect()
    }
}

/// Let fire-and-forget tasks (audit writes, alert mails) run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-forwarded-for", TEST_IP);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-forwarded-for", TEST_IP)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// POST carrying the internal API key, as the auth front end sends it.
pub fn internal_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-forwarded-for", TEST_IP)
        .header("x-internal-api-key", TEST_INTERNAL_KEY)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
