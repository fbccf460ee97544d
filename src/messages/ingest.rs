use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    appresult::{AppError, AppResult},
    bus::{ChannelKey, FanoutBus},
    db::{Profile, Timestamp},
};

use super::{authorize, Message, MessageDraft, ParentKind};

/// Validates, authorizes and stores one message, then publishes it on the
/// parent's `chat:<id>:messages` key. Returns the stored message with its
/// sender expanded.
///
/// Checks run in a fixed order: identity, parent id, content, then access.
/// Nothing is written unless all of them pass.
pub async fn ingest(
    db_pool: &SqlitePool,
    bus: &FanoutBus,
    profile: Option<&Profile>,
    kind: ParentKind,
    parent_id: Option<String>,
    draft: MessageDraft,
) -> AppResult<Message> {
    let profile = profile.ok_or(AppError::Unauthorized)?;
    let parent_id = parent_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| kind.missing_id())?;
    let MessageDraft { content, file_url } = draft.normalized();
    if content.is_none() && file_url.is_none() {
        return Err(AppError::BadRequest("Content missing"));
    }

    let parent = kind.parent(parent_id);
    let sender = authorize(db_pool, profile, &parent).await?;

    let id = Uuid::now_v7().to_string();
    // created_at never goes below the newest message of the same parent
    let sql = format!(
        "INSERT INTO {table} (id,content,file_url,member_id,{column},created_at) \
         SELECT ?,?,?,?,?, MAX(?, COALESCE((SELECT MAX(created_at) FROM {table} WHERE {column}=?), 0)) \
         RETURNING created_at",
        table = kind.table(),
        column = kind.column(),
    );
    let (created_at,): (Timestamp,) = sqlx::query_as(&sql)
        .bind(&id)
        .bind(&content)
        .bind(&file_url)
        .bind(&sender.id)
        .bind(parent.id())
        .bind(Timestamp::now())
        .bind(parent.id())
        .fetch_one(db_pool)
        .await?;

    let message = Message {
        id,
        content,
        file_url,
        member_id: sender.id.clone(),
        parent,
        created_at,
        member: sender,
    };

    let key = ChannelKey::messages(message.parent.id());
    match serde_json::to_string(&message) {
        Ok(payload) => {
            let delivered = bus.publish(&key, payload);
            tracing::debug!(%key, message = %message.id, delivered, "message published");
        }
        Err(e) => tracing::warn!(%key, message = %message.id, error = %e, "message stored but not published"),
    }

    Ok(message)
}
