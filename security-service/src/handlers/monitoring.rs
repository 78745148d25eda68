use axum::{extract::State, Json};

use crate::services::monitor::MonitoringReport;
use crate::AppState;

/// Run both monitoring scans now instead of waiting for the scheduler.
pub async fn run(State(state): State<AppState>) -> Json<MonitoringReport> {
    Json(state.monitor.run_monitoring().await)
}
