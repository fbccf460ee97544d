use axum::{debug_handler, extract::{Query, State}, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    appresult::{ApiResult, AppError, AppResult, Tag},
    db::Profile,
    identity::CurrentProfile,
};

use super::{authorize, message_columns, Message, MessageRow, ParentKind};

pub const BATCH_SIZE: i64 = 10;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DirectHistoryQuery {
    conversation_id: Option<String>,
    cursor: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChannelHistoryQuery {
    channel_id: Option<String>,
    cursor: Option<String>,
}

/// One batch of history, newest first. Pass `next_cursor` back as `cursor`
/// for the batch before it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub items: Vec<Message>,
    pub next_cursor: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn direct_messages(
    State(db_pool): State<SqlitePool>,
    CurrentProfile(profile): CurrentProfile,
    Query(DirectHistoryQuery { conversation_id, cursor }): Query<DirectHistoryQuery>,
) -> ApiResult<Json<Page>> {
    history(&db_pool, profile.as_ref(), ParentKind::Conversation, conversation_id, cursor)
        .await
        .map(Json)
        .tag("DIRECT_MESSAGES_GET")
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn channel_messages(
    State(db_pool): State<SqlitePool>,
    CurrentProfile(profile): CurrentProfile,
    Query(ChannelHistoryQuery { channel_id, cursor }): Query<ChannelHistoryQuery>,
) -> ApiResult<Json<Page>> {
    history(&db_pool, profile.as_ref(), ParentKind::Channel, channel_id, cursor)
        .await
        .map(Json)
        .tag("MESSAGES_GET")
}

/// Stored messages of one conversation or channel, for catching up on what
/// the live feed cannot replay. Same access rules as posting.
pub async fn history(
    db_pool: &SqlitePool,
    profile: Option<&Profile>,
    kind: ParentKind,
    parent_id: Option<String>,
    cursor: Option<String>,
) -> AppResult<Page> {
    let profile = profile.ok_or(AppError::Unauthorized)?;
    let parent_id = parent_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| kind.missing_id())?;
    let parent = kind.parent(parent_id);
    authorize(db_pool, profile, &parent).await?;

    let table = kind.table();
    let column = kind.column();
    let columns = message_columns(kind);
    let before_cursor = if cursor.is_some() {
        format!("AND (x.created_at, x.id) < (SELECT created_at, id FROM {table} WHERE id=?)")
    } else {
        String::new()
    };
    let sql = format!(
        "SELECT {columns} FROM {table} x \
         JOIN members m ON m.id = x.member_id \
         JOIN profiles p ON p.id = m.profile_id \
         WHERE x.{column}=? {before_cursor} \
         ORDER BY x.created_at DESC, x.id DESC LIMIT ?"
    );

    let mut query = sqlx::query_as::<_, MessageRow>(&sql).bind(parent.id());
    if let Some(cursor) = &cursor {
        query = query.bind(cursor);
    }
    let rows = query.bind(BATCH_SIZE).fetch_all(db_pool).await?;

    let items: Vec<Message> = rows.into_iter().map(|row| row.into_message(kind)).collect();
    let next_cursor = if items.len() as i64 == BATCH_SIZE {
        items.last().map(|m| m.id.clone())
    } else {
        None
    };

    Ok(Page { items, next_cursor })
}
