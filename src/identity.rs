use anyhow::anyhow;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{appresult::{ApiError, AppResult, Tag}, db::{self, Profile}, AppState};

/// Session key holding the signed-in profile id. Written by the sign-in flow,
/// which lives outside this service.
pub const PROFILE_ID: &str = "profile_id";

/// Maps an inbound request to the profile making it.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, parts: &mut Parts, db_pool: &SqlitePool) -> AppResult<Option<Profile>>;
}

/// Reads the profile id out of the `tower-sessions` session.
pub struct SessionIdentity;

#[async_trait]
impl IdentityResolver for SessionIdentity {
    async fn resolve(&self, parts: &mut Parts, db_pool: &SqlitePool) -> AppResult<Option<Profile>> {
        let session = Session::from_request_parts(parts, &())
            .await
            .map_err(|(_, msg)| anyhow!("session unavailable: {msg}"))?;

        let Some(profile_id) = session.get::<String>(PROFILE_ID).await? else {
            return Ok(None);
        };

        Ok(db::profile_by_id(db_pool, &profile_id).await?)
    }
}

/// The requesting profile, or `None` for anonymous requests. Handlers decide
/// whether anonymity is an error so their own checks keep their order.
pub struct CurrentProfile(pub Option<Profile>);

impl FromRequestParts<AppState> for CurrentProfile {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let resolving = state.identity.resolve(parts, &state.db_pool);
        match tokio::time::timeout(state.request_timeout, resolving).await {
            Ok(profile) => profile.map(CurrentProfile).tag("IDENTITY"),
            Err(_) => Err(anyhow!("identity resolution timed out")).tag("IDENTITY"),
        }
    }
}
