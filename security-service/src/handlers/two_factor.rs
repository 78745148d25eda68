use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::dtos::two_factor::{BackupCodesResponse, TwoFactorTokenRequest, VerifyTwoFactorResponse};
use crate::dtos::MessageResponse;
use crate::middleware::{CurrentUser, RequestContext};
use crate::models::{AuditAction, ResourceType};
use crate::services::audit::AuditEvent;
use crate::services::error::TwoFactorError;
use crate::services::two_factor::{TwoFactorSetup, VerifyOutcome};
use crate::utils::ValidatedJson;
use crate::AppState;

/// Start enrolment: issue a secret, provisioning URL and backup codes. The
/// second factor stays off until the first code is verified.
pub async fn setup(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<TwoFactorSetup>, AppError> {
    if !state.two_factor.is_available() {
        return Err(TwoFactorError::ProviderUnavailable.into());
    }
    let account = user.email.clone().unwrap_or_else(|| user.id.clone());
    let setup = state.two_factor.generate_secret(&user.id, &account).await?;
    Ok(Json(setup))
}

pub async fn verify(
    State(state): State<AppState>,
    ctx: RequestContext,
    CurrentUser(user): CurrentUser,
    ValidatedJson(req): ValidatedJson<TwoFactorTokenRequest>,
) -> Result<Json<VerifyTwoFactorResponse>, AppError> {
    let outcome = state.two_factor.confirm_or_verify(&user.id, &req.token).await?;

    if outcome == VerifyOutcome::Enabled {
        state.audit.log_event(
            AuditEvent::new(AuditAction::TwoFactorEnabled, ResourceType::TwoFactor)
                .actor(Some(user.id.clone()))
                .resource(user.id.clone()),
            Some(&ctx.client),
        );
    }

    Ok(Json(VerifyTwoFactorResponse {
        verified: outcome != VerifyOutcome::Rejected,
        outcome,
    }))
}

/// Turning 2FA off requires a current code.
pub async fn disable(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidatedJson(req): ValidatedJson<TwoFactorTokenRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    if !state.two_factor.verify(&user.id, &req.token).await? {
        return Err(AppError::BadRequest(anyhow::anyhow!("Invalid verification code")));
    }
    state.two_factor.disable(&user.id).await?;
    Ok(Json(MessageResponse::new("Two-factor authentication disabled")))
}

pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidatedJson(req): ValidatedJson<TwoFactorTokenRequest>,
) -> Result<Json<BackupCodesResponse>, AppError> {
    if !state.two_factor.verify(&user.id, &req.token).await? {
        return Err(AppError::BadRequest(anyhow::anyhow!("Invalid verification code")));
    }
    let backup_codes = state.two_factor.regenerate_backup_codes(&user.id).await?;
    Ok(Json(BackupCodesResponse { backup_codes }))
}
