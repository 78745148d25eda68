//! Request authorization pipeline.
//!
//! Every protected route runs these checks in order, stopping at the first
//! failure: rate limit, authentication, role, fine-grained permissions. Input
//! validation happens in the handler's extractors, then the handler runs and
//! a success audit entry is written.

use std::sync::Arc;

use axum::{
    async_trait,
    body::{to_bytes, Body},
    extract::{FromRequestParts, MatchedPath, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use service_core::error::AppError;

use crate::models::{AuditAction, Identity, Permission, ResourceType, Role};
use crate::services::audit::{AuditEvent, ClientInfo};
use crate::services::permissions;
use crate::services::rate_limiter::RateLimitTier;
use crate::services::session::bearer_token;
use crate::AppState;

/// Largest body read to find the reported email.
const MAX_KEYED_BODY_BYTES: usize = 64 * 1024;

/// Whom a route's rate limit is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKey {
    /// The caller's own address from the forwarding headers.
    ClientIp,
    /// The `email` field of the JSON body. For backend callers reporting on
    /// behalf of end users, whose own address is shared by every request.
    ReportedEmail,
}

/// What a route requires before its handler may run.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    pub tier: RateLimitTier,
    pub rate_key: RateLimitKey,
    pub auth_required: bool,
    /// Empty means any authenticated role, including none.
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
    pub audit: Option<(AuditAction, ResourceType)>,
}

impl RoutePolicy {
    pub fn public(tier: RateLimitTier) -> Self {
        Self {
            tier,
            rate_key: RateLimitKey::ClientIp,
            auth_required: false,
            roles: Vec::new(),
            permissions: Vec::new(),
            audit: None,
        }
    }

    pub fn authenticated(tier: RateLimitTier) -> Self {
        Self {
            auth_required: true,
            ..Self::public(tier)
        }
    }

    pub fn keyed_by_reported_email(mut self) -> Self {
        self.rate_key = RateLimitKey::ReportedEmail;
        self
    }

    pub fn roles(mut self, roles: &[Role]) -> Self {
        self.roles = roles.to_vec();
        self
    }

    pub fn permissions(mut self, permissions: &[Permission]) -> Self {
        self.permissions = permissions.to_vec();
        self
    }

    pub fn audited(mut self, action: AuditAction, resource_type: ResourceType) -> Self {
        self.audit = Some((action, resource_type));
        self
    }
}

/// State for one guarded route group.
#[derive(Clone)]
pub struct PipelineState {
    pub app: AppState,
    pub policy: Arc<RoutePolicy>,
}

impl PipelineState {
    pub fn new(app: &AppState, policy: RoutePolicy) -> Self {
        Self {
            app: app.clone(),
            policy: Arc::new(policy),
        }
    }
}

/// Per-request facts established by the pipeline, available to handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub identity: Option<Identity>,
    pub client: ClientInfo,
    pub endpoint: String,
}

/// Identifier of the resource a handler acted on, attached to the response
/// so the success audit entry can record it.
#[derive(Debug, Clone)]
pub struct AuditResource(pub String);

pub fn client_info(headers: &HeaderMap) -> ClientInfo {
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        });
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ClientInfo {
        ip_address,
        user_agent,
    }
}

fn reported_email(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let email = value.get("email")?.as_str()?.trim().to_lowercase();
    (!email.is_empty()).then_some(email)
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("security_pipeline_outcomes_total", "outcome" => outcome).increment(1);
}

pub async fn authorize(
    State(pipeline): State<PipelineState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let PipelineState { app, policy } = pipeline;
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let client = client_info(req.headers());

    // 1. Rate limit, before any credential work.
    let ip_identifier = format!(
        "ip:{}",
        client.ip_address.as_deref().unwrap_or("unknown")
    );
    let identifier = match policy.rate_key {
        RateLimitKey::ClientIp => ip_identifier,
        RateLimitKey::ReportedEmail => {
            let (parts, body) = req.into_parts();
            let bytes = to_bytes(body, MAX_KEYED_BODY_BYTES)
                .await
                .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Unreadable request body: {}", e)))?;
            let identifier = reported_email(&bytes)
                .map(|email| format!("email:{}", email))
                .unwrap_or(ip_identifier);
            req = Request::from_parts(parts, Body::from(bytes));
            identifier
        }
    };
    let decision = app
        .rate_limiter
        .check_tier(&identifier, &endpoint, policy.tier)
        .await;
    if !decision.allowed {
        record_outcome("rate_limited");
        app.audit.log_event(
            AuditEvent::new(AuditAction::RateLimitExceeded, ResourceType::Auth).metadata(json!({
                "endpoint": endpoint,
                "method": method,
                "identifier": identifier,
                "tier": policy.tier.as_str(),
                "retry_after": decision.retry_after,
            })),
            Some(&client),
        );
        return Err(AppError::TooManyRequests(
            "Too many requests. Please try again later.".to_string(),
            decision.headers(),
        ));
    }

    // 2. Authentication: bearer header first, then the session cookie.
    let bearer = bearer_token(req.headers()).map(str::to_string);
    let session_id = CookieJar::from_headers(req.headers())
        .get(app.sessions.cookie_name())
        .map(|c| c.value().to_string());
    let identity = app
        .sessions
        .authenticate(bearer.as_deref(), session_id.as_deref())
        .await
        .map(|auth| auth.identity);

    if policy.auth_required && identity.is_none() {
        record_outcome("unauthenticated");
        app.audit.log_event(
            AuditEvent::new(AuditAction::LoginFailed, ResourceType::Auth).metadata(json!({
                "reason": "missing_or_invalid_credentials",
                "endpoint": endpoint,
                "method": method,
            })),
            Some(&client),
        );
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Authentication required"
        )));
    }

    if let Some(identity) = &identity {
        // 3. Role gate.
        if !policy.roles.is_empty()
            && !identity.role.map_or(false, |role| policy.roles.contains(&role))
        {
            record_outcome("forbidden_role");
            let required: Vec<&str> = policy.roles.iter().map(Role::as_str).collect();
            app.audit.log_event(
                AuditEvent::new(AuditAction::UnauthorizedRoleAccess, ResourceType::Auth)
                    .actor(Some(identity.id.clone()))
                    .metadata(json!({
                        "endpoint": endpoint,
                        "method": method,
                        "role": identity.role.map(|r| r.as_str()),
                        "required_roles": required,
                    })),
                Some(&client),
            );
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Insufficient role for this operation"
            )));
        }

        // 4. Fine-grained permissions, all required.
        let missing: Vec<&str> = policy
            .permissions
            .iter()
            .map(Permission::as_str)
            .filter(|p| !permissions::evaluate(identity, p))
            .collect();
        if !missing.is_empty() {
            record_outcome("forbidden_permission");
            app.audit.log_event(
                AuditEvent::new(AuditAction::UnauthorizedPermissionAccess, ResourceType::Auth)
                    .actor(Some(identity.id.clone()))
                    .metadata(json!({
                        "endpoint": endpoint,
                        "method": method,
                        "missing_permissions": missing,
                    })),
                Some(&client),
            );
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Missing required permission"
            )));
        }
    }

    let actor = identity.as_ref().map(|i| i.id.clone());
    req.extensions_mut().insert(RequestContext {
        identity,
        client: client.clone(),
        endpoint: endpoint.clone(),
    });

    // 5 and 6. Validation happens in the handler's extractors.
    let mut response = next.run(req).await;
    let status = response.status();

    if status.is_success() {
        record_outcome("allowed");
        if let Some((action, resource_type)) = policy.audit {
            let mut event = AuditEvent::new(action, resource_type)
                .actor(actor)
                .metadata(json!({
                    "endpoint": endpoint,
                    "method": method,
                    "status": status.as_u16(),
                }));
            if let Some(AuditResource(id)) = response.extensions().get::<AuditResource>() {
                event = event.resource(id.clone());
            }
            app.audit.log_event(event, Some(&client));
        }
    } else if status.is_client_error() {
        record_outcome("rejected");
    } else {
        record_outcome("failed");
    }

    decision.headers().apply(response.headers_mut());
    Ok(response)
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "Request context missing from request extensions"
                ))
            })
    }
}

/// The authenticated identity of the request.
pub struct CurrentUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .and_then(|ctx| ctx.identity.clone())
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Authentication required")))
    }
}
