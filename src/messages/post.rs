use axum::{
    debug_handler,
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    appresult::{ApiResult, Tag},
    bus::FanoutBus,
    identity::CurrentProfile,
};

use super::{ingest, Message, MessageDraft, ParentKind};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConversationQuery {
    conversation_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChannelQuery {
    channel_id: Option<String>,
}

/// An unreadable body is treated as an empty draft, so it is reported as
/// missing content after the identity and id checks.
fn draft(body: Result<Json<MessageDraft>, JsonRejection>) -> MessageDraft {
    match body {
        Ok(Json(draft)) => draft,
        Err(rejection) => {
            tracing::debug!(%rejection, "unreadable message body");
            MessageDraft::default()
        }
    }
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn direct_message(
    State(db_pool): State<SqlitePool>,
    State(bus): State<FanoutBus>,
    CurrentProfile(profile): CurrentProfile,
    Query(ConversationQuery { conversation_id }): Query<ConversationQuery>,
    body: Result<Json<MessageDraft>, JsonRejection>,
) -> ApiResult<Json<Message>> {
    ingest(&db_pool, &bus, profile.as_ref(), ParentKind::Conversation, conversation_id, draft(body))
        .await
        .map(Json)
        .tag("DIRECT_MESSAGES_POST")
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn channel_message(
    State(db_pool): State<SqlitePool>,
    State(bus): State<FanoutBus>,
    CurrentProfile(profile): CurrentProfile,
    Query(ChannelQuery { channel_id }): Query<ChannelQuery>,
    body: Result<Json<MessageDraft>, JsonRejection>,
) -> ApiResult<Json<Message>> {
    ingest(&db_pool, &bus, profile.as_ref(), ParentKind::Channel, channel_id, draft(body))
        .await
        .map(Json)
        .tag("MESSAGES_POST")
}

pub(crate) async fn method_not_allowed() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, Json(json!({ "error": "Method not allowed" })))
}
