use axum::{debug_handler, extract::{Path, Query, State}, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    appresult::{ApiResult, AppError, AppResult, Tag},
    bus::ChannelKey,
    db::{self, Member, Profile},
    identity::CurrentProfile,
};

use super::{resolve, Conversation};

const OP: &str = "CONVERSATION_GET";

#[derive(Deserialize)]
pub(crate) struct ViewQuery {
    #[serde(default)]
    video: bool,
}

/// Everything a client needs to open a direct conversation with another
/// member of the same server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub conversation: Conversation,
    pub current_member: Member,
    pub other_member: Member,
    pub video: bool,
    pub channel_key: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn conversation(
    Path((server_id, member_id)): Path<(String, String)>,
    Query(ViewQuery { video }): Query<ViewQuery>,
    State(db_pool): State<SqlitePool>,
    CurrentProfile(profile): CurrentProfile,
) -> ApiResult<Json<ConversationView>> {
    open(&db_pool, profile.as_ref(), &server_id, &member_id, video)
        .await
        .map(Json)
        .tag(OP)
}

pub(crate) async fn open(
    db_pool: &SqlitePool,
    profile: Option<&Profile>,
    server_id: &str,
    member_id: &str,
    video: bool,
) -> AppResult<ConversationView> {
    let profile = profile.ok_or(AppError::Unauthorized)?;
    let current_member = db::member_for_profile(db_pool, &profile.id, server_id)
        .await?
        .ok_or(AppError::NotFound("Member not found"))?;

    let conversation = resolve(db_pool, &current_member.id, member_id).await?;
    let side = conversation
        .side_of_member(&current_member.id)
        .ok_or_else(|| anyhow::anyhow!("resolved conversation {} lacks its requester", conversation.id))?;
    let other_member = conversation.member(side.other()).clone();

    Ok(ConversationView {
        channel_key: ChannelKey::messages(&conversation.id).to_string(),
        conversation,
        current_member,
        other_member,
        video,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect_in_memory, fixtures};

    #[tokio::test]
    async fn other_member_is_whoever_the_requester_is_not() {
        let db_pool = connect_in_memory().await.unwrap();
        fixtures::seed(&db_pool).await;
        let p2 = db::profile_by_id(&db_pool, "p2").await.unwrap().unwrap();
        let p1 = db::profile_by_id(&db_pool, "p1").await.unwrap().unwrap();

        let opened = open(&db_pool, Some(&p2), "s1", "m1", true).await.unwrap();
        assert_eq!(opened.current_member.id, "m2");
        assert_eq!(opened.other_member.id, "m1");
        assert!(opened.video);
        assert_eq!(opened.channel_key, format!("chat:{}:messages", opened.conversation.id));

        let back = open(&db_pool, Some(&p1), "s1", "m2", false).await.unwrap();
        assert_eq!(back.conversation.id, opened.conversation.id);
        assert_eq!(back.other_member.id, "m2");
    }

    #[tokio::test]
    async fn requester_needs_a_membership_in_the_server() {
        let db_pool = connect_in_memory().await.unwrap();
        fixtures::seed(&db_pool).await;
        let p9 = db::profile_by_id(&db_pool, "p9").await.unwrap().unwrap();

        assert!(matches!(open(&db_pool, None, "s1", "m1", false).await, Err(AppError::Unauthorized)));
        assert!(matches!(
            open(&db_pool, Some(&p9), "s1", "m1", false).await,
            Err(AppError::NotFound(_))
        ));
    }
}
