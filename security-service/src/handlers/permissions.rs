use axum::{extract::State, Extension, Json};
use service_core::error::AppError;

use crate::dtos::permissions::{
    PermissionChangeRequest, PermissionChangeResponse, PermissionCheckQuery,
    PermissionCheckResponse,
};
use crate::middleware::{AuditResource, CurrentUser};
use crate::models::Permission;
use crate::services::error::ServiceError;
use crate::utils::{ValidatedJson, ValidatedQuery};
use crate::AppState;

pub async fn check(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidatedQuery(query): ValidatedQuery<PermissionCheckQuery>,
) -> Json<PermissionCheckResponse> {
    let granted = state
        .permissions
        .has_permission(&user.id, &query.permission)
        .await;
    Json(PermissionCheckResponse {
        permission: query.permission,
        granted,
    })
}

fn parse_permission(raw: &str) -> Result<Permission, ServiceError> {
    raw.parse()
        .map_err(|_| ServiceError::UnknownPermission(raw.to_string()))
}

pub async fn grant(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PermissionChangeRequest>,
) -> Result<(Extension<AuditResource>, Json<PermissionChangeResponse>), AppError> {
    let permission = parse_permission(&req.permission)?;
    let permissions = state
        .permissions
        .grant_permission(&req.user_id, permission)
        .await?;
    tracing::info!(user_id = %req.user_id, permission = %permission.as_str(), "Permission granted");
    Ok((
        Extension(AuditResource(req.user_id.clone())),
        Json(PermissionChangeResponse {
            user_id: req.user_id,
            permissions,
        }),
    ))
}

pub async fn revoke(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PermissionChangeRequest>,
) -> Result<(Extension<AuditResource>, Json<PermissionChangeResponse>), AppError> {
    let permission = parse_permission(&req.permission)?;
    let permissions = state
        .permissions
        .revoke_permission(&req.user_id, permission)
        .await?;
    tracing::info!(user_id = %req.user_id, permission = %permission.as_str(), "Permission revoked");
    Ok((
        Extension(AuditResource(req.user_id.clone())),
        Json(PermissionChangeResponse {
            user_id: req.user_id,
            permissions,
        }),
    ))
}
