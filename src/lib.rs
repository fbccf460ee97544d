pub mod appresult;
pub mod bus;
pub mod config;
pub mod conversations;
pub mod db;
pub mod identity;
pub mod livekit;
pub mod messages;

use std::{sync::Arc, time::Duration};

use axum::{extract::FromRef, routing::get, Router};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use appresult::{AppError, AppResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub bus: bus::FanoutBus,
    pub video: config::VideoConfig,
    pub identity: Arc<dyn identity::IdentityResolver>,
    pub request_timeout: Duration,
}

/// Every route of the service. The caller adds whatever layer the identity
/// resolver depends on (the session layer for [`identity::SessionIdentity`]).
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .merge(messages::router())
        .merge(conversations::router())
        .route("/api/livekit", get(livekit::token))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
