use iam_service::{
    build_router,
    config::IamConfig,
    db::{create_pool, run_migrations},
    services::{AuditSink, IamStore, PgStore},
    AppState,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

const AUDIT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IamConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting IAM service"
    );

    let pool = create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

    let store: Arc<dyn IamStore> = Arc::new(PgStore::new(pool));
    let (audit, audit_writer) = AuditSink::spawn(store.clone(), AUDIT_CHANNEL_CAPACITY);

    let state = AppState::new(config.clone(), store, audit)?;
    let tenant = state.registration.bootstrap_default_tenant().await?;
    tracing::info!(tenant_id = %tenant.tenant_id, slug = %tenant.tenant_slug, "Default tenant ready");

    let app = build_router(state).await?;

    let addr: SocketAddr = config
        .common
        .bind_address()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid bind address: {}", e)))?;

    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Every sender is gone once the router is dropped; let the writer drain.
    if let Err(e) = audit_writer.await {
        tracing::warn!(error = %e, "Audit writer ended abnormally");
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
            Ok(mut stream) => {
                stream.recv().await;
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
