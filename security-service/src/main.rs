use std::net::SocketAddr;
use std::sync::Arc;

use security_service::{
    build_router,
    clock::SystemClock,
    config::SecurityServiceConfig,
    scheduler,
    services::{EmailProvider, LogOnlyEmailService, SmtpEmailService},
    store::Database,
    AppState,
};
use service_core::error::AppError;
use service_core::middleware::metrics::install_recorder;
use service_core::observability::init_tracing;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = SecurityServiceConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    let metrics = match install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "Metrics disabled");
            None
        }
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting security service"
    );

    let db = Database::connect(&config.database.url, config.database.max_connections).await?;
    db.run_migrations()
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;

    let email: Arc<dyn EmailProvider> = match &config.alerts.smtp {
        Some(smtp) => {
            let service = SmtpEmailService::new(smtp)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
            tracing::info!(host = %smtp.host, "SMTP alert delivery configured");
            Arc::new(service)
        }
        None => {
            tracing::warn!("SMTP not configured; alert emails will only be logged");
            Arc::new(LogOnlyEmailService)
        }
    };

    let port = config.common.port;
    let state = AppState::build(config, Arc::new(db), email, Arc::new(SystemClock), metrics);

    let jobs = scheduler::spawn_all(&state);
    tracing::info!(jobs = jobs.len(), "Background jobs started");

    let app = build_router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let service_span = tracing::info_span!(
        "service",
        service = %state.config.service_name,
        version = %state.config.service_version,
        environment = ?state.config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    for job in jobs {
        job.abort();
    }
    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
