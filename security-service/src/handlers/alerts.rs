use axum::{
    extract::{Path, State},
    Extension, Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::alerts::{AlertListQuery, AlertListResponse};
use crate::dtos::MessageResponse;
use crate::middleware::AuditResource;
use crate::utils::ValidatedQuery;
use crate::AppState;

const DEFAULT_ALERT_LIMIT: u32 = 50;

pub async fn list(
    State(state): State<AppState>,
    ValidatedQuery(query): ValidatedQuery<AlertListQuery>,
) -> Result<Json<AlertListResponse>, AppError> {
    let alerts = state
        .alerts
        .list_alerts(
            query.unacknowledged_only,
            query.limit.unwrap_or(DEFAULT_ALERT_LIMIT),
        )
        .await?;
    Ok(Json(AlertListResponse {
        count: alerts.len(),
        alerts,
    }))
}

pub async fn acknowledge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(Extension<AuditResource>, Json<MessageResponse>), AppError> {
    state.alerts.acknowledge(id).await?;
    Ok((
        Extension(AuditResource(id.to_string())),
        Json(MessageResponse::new("Alert acknowledged")),
    ))
}
