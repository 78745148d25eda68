//! Endpoints the authentication front end calls around each login attempt.

use axum::{extract::State, http::HeaderMap, Json};
use service_core::error::AppError;

use crate::dtos::login::{LoginCheckRequest, LoginFailureRequest, LoginSuccessRequest};
use crate::dtos::MessageResponse;
use crate::middleware::pipeline::client_info;
use crate::models::LockoutStatus;
use crate::services::audit::ClientInfo;
use crate::utils::ValidatedJson;
use crate::AppState;

/// Client details reported in the body win over the caller's own headers.
fn reported_client(headers: &HeaderMap, ip: Option<String>, user_agent: Option<String>) -> ClientInfo {
    let fallback = client_info(headers);
    ClientInfo {
        ip_address: ip.or(fallback.ip_address),
        user_agent: user_agent.or(fallback.user_agent),
    }
}

pub async fn check(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginCheckRequest>,
) -> Result<Json<LockoutStatus>, AppError> {
    Ok(Json(state.login_security.check_lockout(&req.email).await?))
}

pub async fn failure(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<LoginFailureRequest>,
) -> Result<Json<LockoutStatus>, AppError> {
    let client = reported_client(&headers, req.ip_address, req.user_agent);
    let status = state.login_security.record_failed_login(&req.email).await?;
    state
        .login_security
        .log_login_attempt(&req.email, None, false, &client, req.metadata)
        .await;
    Ok(Json(status))
}

pub async fn success(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<LoginSuccessRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let client = reported_client(&headers, req.ip_address, req.user_agent);
    state
        .login_security
        .reset_failed_login_attempts(&req.email)
        .await?;
    state
        .login_security
        .log_login_attempt(&req.email, Some(&req.user_id), true, &client, None)
        .await;
    Ok(Json(MessageResponse::new("Login recorded")))
}
