use axum::{
    debug_handler,
    extract::{ws::{Message as Frame, WebSocket}, Query, State, WebSocketUpgrade},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    appresult::{ApiResult, AppError, AppResult, Tag},
    bus::{ChannelKey, FanoutBus},
    db::Profile,
    identity::CurrentProfile,
};

use super::{authorize, ingest, MessageDraft, Parent, ParentKind};

const OP: &str = "SOCKET_CONNECT";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SocketQuery {
    conversation_id: Option<String>,
    channel_id: Option<String>,
}

impl SocketQuery {
    fn parent(self) -> AppResult<Parent> {
        match (self.conversation_id, self.channel_id) {
            (Some(id), _) if !id.is_empty() => Ok(ParentKind::Conversation.parent(id)),
            (_, Some(id)) if !id.is_empty() => Ok(ParentKind::Channel.parent(id)),
            _ => Err(AppError::BadRequest("Conversation ID or Channel ID missing")),
        }
    }
}

/// Live feed of one conversation or channel. Published messages go out as
/// text frames; inbound `{content, fileUrl}` frames are posted as the
/// connected member.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn socket(
    State(db_pool): State<SqlitePool>,
    State(bus): State<FanoutBus>,
    CurrentProfile(profile): CurrentProfile,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let profile = profile.ok_or(AppError::Unauthorized).tag(OP)?;
    let parent = query.parent().tag(OP)?;
    authorize(&db_pool, &profile, &parent).await.tag(OP)?;

    Ok(ws.on_upgrade(move |stream| serve(stream, db_pool, bus, profile, parent)))
}

async fn serve(stream: WebSocket, db_pool: SqlitePool, bus: FanoutBus, profile: Profile, parent: Parent) {
    let mut subscription = bus.subscribe(ChannelKey::messages(parent.id()));
    let (mut sender, mut receiver) = stream.split();

    let mut broadcast_task = tokio::spawn(async move {
        while let Some(payload) = subscription.next().await {
            if sender.send(Frame::Text(payload.as_ref().into())).await.is_err() {
                break;
            }
        }
    });

    let mut receive_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            if let Frame::Close(_) = frame {
                break;
            }
            let Ok(draft) = serde_json::from_slice::<MessageDraft>(&frame.into_data()) else {
                continue;
            };

            let posted = ingest(&db_pool, &bus, Some(&profile), parent.kind(), Some(parent.id().to_owned()), draft).await;
            if let Err(error) = posted {
                tracing::warn!(op = "SOCKET_MESSAGE", %error, "inbound frame rejected");
            }
        }
    });

    // whichever side finishes first takes the other down with it; the
    // subscription is dropped along with the broadcast task
    tokio::select! {
        _ = &mut broadcast_task => receive_task.abort(),
        _ = &mut receive_task => broadcast_task.abort(),
    }
}
