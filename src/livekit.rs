//! LiveKit access tokens for the video mode of a conversation.

use axum::{debug_handler, extract::{Query, State}, Json};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::{
    appresult::{ApiResult, AppError, AppResult, Tag},
    config::VideoConfig,
};

/// Room permissions carried in the `video` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room: String,
    pub room_join: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GrantClaims {
    /// API key the token is signed for.
    pub iss: String,
    /// Participant identity.
    pub sub: String,
    pub jti: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: VideoGrant,
}

/// Signs a token letting `identity` join, publish and subscribe in `room`,
/// and nowhere else. Expiry is the only limit; there is no revocation.
pub fn issue_grant(config: &VideoConfig, room: &str, identity: &str) -> AppResult<String> {
    if room.is_empty() {
        return Err(AppError::BadRequest(r#"Missing "room" query parameter"#));
    }
    if identity.is_empty() {
        return Err(AppError::BadRequest(r#"Missing "username" query parameter"#));
    }
    tracing::debug!(
        api_key = config.api_key.is_some(),
        api_secret = config.api_secret.is_some(),
        url = config.url.is_some(),
        "video credentials check"
    );
    let credentials = config
        .credentials()
        .ok_or(AppError::Misconfigured("LIVEKIT_API_KEY, LIVEKIT_API_SECRET and LIVEKIT_URL are required"))?;

    let now = OffsetDateTime::now_utc();
    let claims = GrantClaims {
        iss: credentials.api_key.to_owned(),
        sub: identity.to_owned(),
        jti: identity.to_owned(),
        nbf: now.unix_timestamp(),
        exp: (now + config.token_ttl).unix_timestamp(),
        video: VideoGrant {
            room: room.to_owned(),
            room_join: true,
            can_publish: true,
            can_subscribe: true,
        },
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(credentials.api_secret.as_bytes()),
    )?;
    tracing::info!(room, identity, livekit = credentials.url, "video grant issued");
    Ok(token)
}

#[derive(Deserialize)]
pub(crate) struct GrantQuery {
    room: Option<String>,
    username: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn token(
    State(video): State<VideoConfig>,
    Query(GrantQuery { room, username }): Query<GrantQuery>,
) -> ApiResult<Json<Value>> {
    issue_grant(
        &video,
        room.as_deref().unwrap_or_default(),
        username.as_deref().unwrap_or_default(),
    )
    .map(|token| Json(json!({ "token": token })))
    .tag("LIVEKIT_GET")
}
