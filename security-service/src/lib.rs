//! Authorization and abuse-prevention middleware for the property platform.
//!
//! [`AppState::build`] wires every component onto a single store handle and
//! [`build_router`] exposes them over HTTP behind the request authorization
//! pipeline.

pub mod clock;
pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use chrono::Duration;
use metrics_exporter_prometheus::PrometheusHandle;
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::clock::Clock;
use crate::config::SecurityServiceConfig;
use crate::middleware::{
    authorize, internal_key::INTERNAL_KEY_HEADER, require_internal_key, PipelineState, RoutePolicy,
};
use crate::models::{AuditAction, ResourceType, Role};
use crate::services::{
    AlertNotificationConfig, AlertService, AuditLogger, EmailProvider, EncryptedFieldService,
    EncryptionService, KeyRotationManager, LockoutPolicy, LoginSecurityTracker, PermissionResolver,
    RateLimitTier, RateLimiter, RotationConfig, SecurityMonitor, SessionVerifier,
    TwoFactorProvider, TwoFactorService, UnavailableProvider,
};
use crate::store::SecurityStore;

/// Every component, constructed once and shared by handlers, the pipeline
/// and the scheduler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SecurityServiceConfig>,
    pub store: Arc<dyn SecurityStore>,
    pub clock: Arc<dyn Clock>,
    pub encryption: Arc<EncryptionService>,
    pub audit: AuditLogger,
    pub sessions: SessionVerifier,
    pub permissions: PermissionResolver,
    pub rate_limiter: RateLimiter,
    pub login_security: LoginSecurityTracker,
    pub two_factor: TwoFactorService,
    pub key_rotation: KeyRotationManager,
    pub encrypted_fields: EncryptedFieldService,
    pub alerts: AlertService,
    pub monitor: SecurityMonitor,
    pub metrics: Option<PrometheusHandle>,
}

#[cfg(feature = "totp")]
fn totp_provider(issuer: &str) -> Arc<dyn TwoFactorProvider> {
    Arc::new(services::two_factor::TotpProvider::new(issuer))
}

#[cfg(not(feature = "totp"))]
fn totp_provider(_issuer: &str) -> Arc<dyn TwoFactorProvider> {
    tracing::warn!("Built without TOTP support; two-factor authentication unavailable");
    Arc::new(UnavailableProvider)
}

fn two_factor_provider(config: &SecurityServiceConfig) -> Arc<dyn TwoFactorProvider> {
    if !config.two_factor.enabled {
        tracing::warn!("Two-factor authentication disabled by configuration");
        return Arc::new(UnavailableProvider);
    }
    totp_provider(&config.two_factor.issuer)
}

impl AppState {
    /// Wire every component onto `store`. The concrete store type is kept
    /// generic so the one handle can be handed out as each narrower trait.
    pub fn build<S: SecurityStore + 'static>(
        config: SecurityServiceConfig,
        store: Arc<S>,
        email: Arc<dyn EmailProvider>,
        clock: Arc<dyn Clock>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let encryption = Arc::new(EncryptionService::new(
            config.encryption.master_key.clone(),
            config.encryption.kdf_iterations,
        ));
        if !encryption.has_master_key() {
            tracing::warn!("ENCRYPTION_KEY not set; encryption operations will fail");
        }

        let audit = AuditLogger::new(store.clone(), clock.clone());
        let sessions = SessionVerifier::new(
            &config.session.jwt_secret,
            config.session.cookie_name.clone(),
            store.clone(),
            store.clone(),
            clock.clone(),
        );
        let permissions = PermissionResolver::new(store.clone());
        let rate_limiter = RateLimiter::new(
            store.clone(),
            clock.clone(),
            config.rate_limit.tiers.clone(),
        );
        let login_security = LoginSecurityTracker::new(
            store.clone(),
            audit.clone(),
            clock.clone(),
            LockoutPolicy {
                max_attempts: config.login.max_attempts,
                lockout: Duration::minutes(config.login.lockout_minutes),
            },
        );
        let two_factor = TwoFactorService::new(
            store.clone(),
            two_factor_provider(&config),
            encryption.clone(),
            clock.clone(),
        );
        let key_rotation = KeyRotationManager::new(
            store.clone(),
            store.clone(),
            encryption.clone(),
            clock.clone(),
            RotationConfig {
                interval_days: config.encryption.rotation_days,
                batch_size: config.encryption.rotation_batch_size,
                batch_delay: std::time::Duration::from_millis(
                    config.encryption.rotation_batch_delay_ms,
                ),
                min_success_ratio: config.encryption.rotation_min_success_ratio,
            },
        );
        let encrypted_fields =
            EncryptedFieldService::new(store.clone(), store.clone(), encryption.clone());
        let alerts = AlertService::new(
            store.clone(),
            email,
            clock.clone(),
            AlertNotificationConfig {
                admin_email: config.alerts.admin_email.clone(),
                app_base_url: config.alerts.app_base_url.clone(),
            },
        );
        let monitor = SecurityMonitor::new(store.clone(), store.clone(), alerts.clone(), clock.clone());

        Self {
            config: Arc::new(config),
            store,
            clock,
            encryption,
            audit,
            sessions,
            permissions,
            rate_limiter,
            login_security,
            two_factor,
            key_rotation,
            encrypted_fields,
            alerts,
            monitor,
            metrics,
        }
    }
}

/// Routes behind one pipeline policy.
fn guarded(state: &AppState, policy: RoutePolicy, routes: Router<AppState>) -> Router<AppState> {
    routes.route_layer(from_fn_with_state(
        PipelineState::new(state, policy),
        authorize,
    ))
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let allowed = &state.config.security.allowed_origins;
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(INTERNAL_KEY_HEADER),
        ]);

    // Wildcard is dev-only; credentials cannot be combined with it.
    if allowed.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(origins).allow_credentials(true)
}

pub fn build_router(state: AppState) -> Router {
    let admin = [Role::Admin];

    // Two-factor management for the signed-in user
    let two_factor_setup = guarded(
        &state,
        RoutePolicy::authenticated(RateLimitTier::Auth),
        Router::new().route("/security/2fa/setup", post(handlers::two_factor::setup)),
    );
    let two_factor_codes = guarded(
        &state,
        RoutePolicy::authenticated(RateLimitTier::Otp),
        Router::new()
            .route("/security/2fa/verify", post(handlers::two_factor::verify))
            .route(
                "/security/2fa/backup-codes",
                post(handlers::two_factor::regenerate_backup_codes),
            ),
    );
    let two_factor_disable = guarded(
        &state,
        RoutePolicy::authenticated(RateLimitTier::Otp)
            .audited(AuditAction::TwoFactorDisabled, ResourceType::TwoFactor),
        Router::new().route("/security/2fa/disable", post(handlers::two_factor::disable)),
    );

    // Permissions
    let permission_check = guarded(
        &state,
        RoutePolicy::authenticated(RateLimitTier::Api),
        Router::new().route(
            "/security/permissions/check",
            get(handlers::permissions::check),
        ),
    );
    let permission_grant = guarded(
        &state,
        RoutePolicy::authenticated(RateLimitTier::Strict)
            .roles(&admin)
            .audited(AuditAction::PermissionGrant, ResourceType::Permission),
        Router::new().route(
            "/security/permissions/grant",
            post(handlers::permissions::grant),
        ),
    );
    let permission_revoke = guarded(
        &state,
        RoutePolicy::authenticated(RateLimitTier::Strict)
            .roles(&admin)
            .audited(AuditAction::PermissionRevoke, ResourceType::Permission),
        Router::new().route(
            "/security/permissions/revoke",
            post(handlers::permissions::revoke),
        ),
    );

    // Security administration
    let security_read = guarded(
        &state,
        RoutePolicy::authenticated(RateLimitTier::Strict).roles(&admin),
        Router::new()
            .route("/security/alerts", get(handlers::alerts::list))
            .route("/security/keys", get(handlers::keys::list)),
    );
    let alert_acknowledge = guarded(
        &state,
        RoutePolicy::authenticated(RateLimitTier::Strict)
            .roles(&admin)
            .audited(AuditAction::AlertAcknowledged, ResourceType::SecurityAlert),
        Router::new().route(
            "/security/alerts/:id/acknowledge",
            post(handlers::alerts::acknowledge),
        ),
    );
    let monitoring_run = guarded(
        &state,
        RoutePolicy::authenticated(RateLimitTier::Strict)
            .roles(&admin)
            .audited(AuditAction::View, ResourceType::SecurityAlert),
        Router::new().route(
            "/security/monitoring/run",
            post(handlers::monitoring::run),
        ),
    );
    let key_rotate = guarded(
        &state,
        RoutePolicy::authenticated(RateLimitTier::Strict)
            .roles(&admin)
            .audited(AuditAction::KeyRotation, ResourceType::EncryptionKey),
        Router::new().route("/security/keys/rotate", post(handlers::keys::rotate)),
    );

    // Called by the authentication front end on behalf of users, so the limit
    // is counted per reported email. The internal key is checked first.
    let login_security = guarded(
        &state,
        RoutePolicy::public(RateLimitTier::Auth).keyed_by_reported_email(),
        Router::new()
            .route("/security/login/check", post(handlers::login_security::check))
            .route(
                "/security/login/failure",
                post(handlers::login_security::failure),
            )
            .route(
                "/security/login/success",
                post(handlers::login_security::success),
            ),
    )
    .route_layer(from_fn_with_state(state.clone(), require_internal_key));

    let cors = cors_layer(&state);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(two_factor_setup)
        .merge(two_factor_codes)
        .merge(two_factor_disable)
        .merge(permission_check)
        .merge(permission_grant)
        .merge(permission_revoke)
        .merge(security_read)
        .merge(alert_acknowledge)
        .merge(monitoring_run)
        .merge(key_rotate)
        .merge(login_security)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}
