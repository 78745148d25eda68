use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use service_core::error::AppError;

use crate::middleware::AuditResource;
use crate::services::key_rotation::RotationResult;
use crate::AppState;

/// Key version metadata. Material is never returned.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySummary {
    pub version: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<KeySummary>>, AppError> {
    let keys = state.store.list_keys().await?;
    Ok(Json(
        keys.into_iter()
            .map(|k| KeySummary {
                version: k.version,
                is_active: k.is_active,
                created_at: k.created_at,
                deactivated_at: k.deactivated_at,
            })
            .collect(),
    ))
}

pub async fn rotate(
    State(state): State<AppState>,
) -> Result<(Extension<AuditResource>, Json<RotationResult>), AppError> {
    let result = state.key_rotation.rotate_key(None).await?;
    Ok((
        Extension(AuditResource(format!("v{}", result.new_version))),
        Json(result),
    ))
}
