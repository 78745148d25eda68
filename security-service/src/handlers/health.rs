use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = match state.store.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Store health check failed");
            "down"
        }
    };
    let status = if database == "up" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "healthy" } else { "unhealthy" },
            "service": state.config.service_name,
            "version": state.config.service_version,
            "checks": {
                "database": database,
                "two_factor": if state.two_factor.is_available() { "available" } else { "unavailable" },
                "encryption_key": if state.encryption.has_master_key() { "configured" } else { "missing" },
            }
        })),
    )
}
