mod history;
mod ingest;
mod post;
mod ws;

use axum::{routing::{get, post}, Router};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::{
    appresult::{AppError, AppResult},
    conversations,
    db::{self, Member, MemberRow, Profile, Timestamp},
    AppState,
};

pub use history::{history, Page, BATCH_SIZE};
pub use ingest::ingest;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/socket/direct-messages",
            post(post::direct_message).fallback(post::method_not_allowed),
        )
        .route(
            "/api/socket/messages",
            post(post::channel_message).fallback(post::method_not_allowed),
        )
        .route("/api/direct-messages", get(history::direct_messages))
        .route("/api/messages", get(history::channel_messages))
        .route("/api/socket/ws", get(ws::socket))
}

/// What a message hangs off: a direct conversation or a server channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentKind {
    Conversation,
    Channel,
}

impl ParentKind {
    pub fn parent(self, id: String) -> Parent {
        match self {
            ParentKind::Conversation => Parent::ConversationId(id),
            ParentKind::Channel => Parent::ChannelId(id),
        }
    }

    fn table(self) -> &'static str {
        match self {
            ParentKind::Conversation => "direct_messages",
            ParentKind::Channel => "messages",
        }
    }

    fn column(self) -> &'static str {
        match self {
            ParentKind::Conversation => "conversation_id",
            ParentKind::Channel => "channel_id",
        }
    }

    fn missing_id(self) -> AppError {
        match self {
            ParentKind::Conversation => AppError::BadRequest("Conversation ID missing"),
            ParentKind::Channel => AppError::BadRequest("Channel ID missing"),
        }
    }

    fn not_found(self) -> AppError {
        match self {
            ParentKind::Conversation => AppError::NotFound("Conversation not found"),
            ParentKind::Channel => AppError::NotFound("Channel not found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Parent {
    ConversationId(String),
    ChannelId(String),
}

impl Parent {
    pub fn kind(&self) -> ParentKind {
        match self {
            Parent::ConversationId(_) => ParentKind::Conversation,
            Parent::ChannelId(_) => ParentKind::Channel,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Parent::ConversationId(id) | Parent::ChannelId(id) => id,
        }
    }
}

/// A persisted, immutable message with its sender expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: Option<String>,
    pub file_url: Option<String>,
    pub member_id: String,
    #[serde(flatten)]
    pub parent: Parent,
    pub created_at: Timestamp,
    pub member: Member,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    pub content: Option<String>,
    pub file_url: Option<String>,
}

impl MessageDraft {
    /// Blank fields count as absent.
    fn normalized(self) -> MessageDraft {
        fn present(v: Option<String>) -> Option<String> {
            v.filter(|s| !s.trim().is_empty())
        }
        MessageDraft {
            content: present(self.content),
            file_url: present(self.file_url),
        }
    }
}

/// Message columns as `x` plus the sender as `m`/`p`.
fn message_columns(kind: ParentKind) -> String {
    format!(
        "x.id, x.content, x.file_url, x.{} AS parent_id, x.created_at, {}",
        kind.column(),
        db::MEMBER_COLUMNS
    )
}

#[derive(FromRow)]
struct MessageRow {
    id: String,
    content: Option<String>,
    file_url: Option<String>,
    parent_id: String,
    created_at: Timestamp,
    #[sqlx(flatten)]
    member: MemberRow,
}

impl MessageRow {
    fn into_message(self, kind: ParentKind) -> Message {
        let member = Member::from(self.member);
        Message {
            id: self.id,
            content: self.content,
            file_url: self.file_url,
            member_id: member.id.clone(),
            parent: kind.parent(self.parent_id),
            created_at: self.created_at,
            member,
        }
    }
}

/// The member `profile` writes as under `parent`. A parent that does not
/// exist and one the profile has no part in look the same to the caller.
pub(crate) async fn authorize(db_pool: &SqlitePool, profile: &Profile, parent: &Parent) -> AppResult<Member> {
    match parent {
        Parent::ConversationId(id) => {
            let conversation = conversations::find_by_id(db_pool, id).await?;
            conversation
                .and_then(|c| c.side_of_profile(&profile.id).map(|side| c.member(side).clone()))
                .ok_or_else(|| parent.kind().not_found())
        }
        Parent::ChannelId(id) => {
            let server: Option<(String,)> = sqlx::query_as("SELECT server_id FROM channels WHERE id=?")
                .bind(id)
                .fetch_optional(db_pool)
                .await?;
            let Some((server_id,)) = server else {
                return Err(parent.kind().not_found());
            };
            db::member_for_profile(db_pool, &profile.id, &server_id)
                .await?
                .ok_or_else(|| parent.kind().not_found())
        }
    }
}
