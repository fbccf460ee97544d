use std::sync::Arc;

use palaver::{bus::FanoutBus, config::Config, db, identity::SessionIdentity, AppState};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env()?;

    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(config.session_inactivity));

    let db_pool = db::connect(&config.database_url, config.request_timeout).await?;
    let bus = FanoutBus::new();

    let app_state = AppState {
        db_pool,
        bus: bus.clone(),
        video: config.video.clone(),
        identity: Arc::new(SessionIdentity),
        request_timeout: config.request_timeout,
    };
    let missing = app_state.video.missing();
    if !missing.is_empty() {
        tracing::warn!(?missing, "LiveKit credentials incomplete; video grants will fail until restart");
    }

    let app = palaver::router(app_state).layer(session_layer);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // ends every open socket feed so connections can drain
            bus.shutdown();
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
