//! Background jobs started by the binary: security monitoring, key rotation
//! checks and the rate-limit record sweep.
//!
//! Every loop logs a failed tick and carries on. The first tick of each job
//! fires immediately.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::AppState;

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub fn spawn_all(state: &AppState) -> Vec<JoinHandle<()>> {
    let scheduler = &state.config.scheduler;
    vec![
        spawn_monitoring(
            state.clone(),
            Duration::from_secs(scheduler.monitor_interval_seconds),
        ),
        spawn_key_rotation(
            state.clone(),
            Duration::from_secs(scheduler.key_rotation_check_interval_seconds),
        ),
        spawn_rate_limit_sweep(
            state.clone(),
            Duration::from_secs(scheduler.rate_limit_sweep_interval_seconds),
        ),
    ]
}

pub fn spawn_monitoring(state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            let report = state.monitor.run_monitoring().await;
            if !report.errors.is_empty() {
                tracing::warn!(errors = ?report.errors, "Scheduled monitoring run incomplete");
            }
        }
    })
}

pub fn spawn_key_rotation(state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            key_rotation_tick(&state).await;
        }
    })
}

/// Rotates when the active key is due. When nothing is due, records left on
/// an older key by an interrupted or partly failed rotation are retried.
pub async fn key_rotation_tick(state: &AppState) {
    match state.key_rotation.schedule_rotation().await {
        Ok(Some(result)) if result.success => {
            tracing::info!(
                old_version = result.old_version,
                new_version = result.new_version,
                records = result.records_re_encrypted,
                "Scheduled key rotation completed"
            );
        }
        Ok(Some(result)) => {
            tracing::error!(
                new_version = result.new_version,
                failed = result.records_failed,
                errors = ?result.errors,
                "Scheduled key rotation finished with failures"
            );
        }
        Ok(None) => match state.key_rotation.resume_pending().await {
            Ok(result) if result.records_re_encrypted + result.records_failed > 0 => {
                tracing::info!(
                    version = result.new_version,
                    records = result.records_re_encrypted,
                    failed = result.records_failed,
                    "Re-encrypted records left on older keys"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Resuming re-encryption failed"),
        },
        Err(e) => tracing::error!(error = %e, "Scheduled key rotation failed"),
    }
}

pub fn spawn_rate_limit_sweep(state: AppState, period: Duration) -> JoinHandle<()> {
    let retention = chrono::Duration::hours(state.config.rate_limit.retention_hours);
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            match state.rate_limiter.sweep(retention).await {
                Ok(removed) => tracing::debug!(removed, "Rate limit sweep completed"),
                Err(e) => tracing::warn!(error = %e, "Rate limit sweep failed"),
            }
        }
    })
}
