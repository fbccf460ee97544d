use anyhow::anyhow;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{appresult::{AppError, AppResult}, db::{self, Member}};

use super::Conversation;

#[derive(FromRow)]
struct ConversationRow {
    id: String,
    member_one_id: String,
    member_two_id: String,
}

impl ConversationRow {
    /// Attaches the two members, in whichever order the row stores them.
    fn expand(self, a: Member, b: Member) -> Conversation {
        let (member_one, member_two) = if self.member_one_id == a.id { (a, b) } else { (b, a) };
        Conversation {
            id: self.id,
            member_one_id: self.member_one_id,
            member_two_id: self.member_two_id,
            member_one,
            member_two,
        }
    }

    fn joins(&self, a: &str, b: &str) -> bool {
        (self.member_one_id == a && self.member_two_id == b)
            || (self.member_one_id == b && self.member_two_id == a)
    }
}

/// Order-independent identity of a member pair, unique in the store.
/// The lower id is length-prefixed so ids containing `:` cannot collide.
pub fn pair_key(a: &str, b: &str) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{low}:{high}", low.len())
}

/// Returns the single conversation between two members, creating it on first
/// contact with `a` as member one. Unknown members and `a == b` are not found.
pub async fn resolve(db_pool: &SqlitePool, a: &str, b: &str) -> AppResult<Conversation> {
    const NOT_FOUND: AppError = AppError::NotFound("Member not found");

    if a == b {
        return Err(NOT_FOUND);
    }
    let Some(member_a) = db::member_by_id(db_pool, a).await? else {
        return Err(NOT_FOUND);
    };
    let Some(member_b) = db::member_by_id(db_pool, b).await? else {
        return Err(NOT_FOUND);
    };

    if let Some(row) = find_pair(db_pool, a, b).await? {
        return Ok(row.expand(member_a, member_b));
    }

    match create(db_pool, a, b).await {
        Ok(row) => {
            tracing::info!(conversation = %row.id, member_one = a, member_two = b, "conversation created");
            Ok(row.expand(member_a, member_b))
        }
        Err(AppError::Conflict) => {
            // a concurrent resolve won the insert; its row is the canonical one
            tracing::debug!(member_one = a, member_two = b, "lost conversation creation race");
            let row = find_pair(db_pool, a, b)
                .await?
                .ok_or_else(|| anyhow!("conversation for {a}/{b} vanished after conflict"))?;
            Ok(row.expand(member_a, member_b))
        }
        Err(e) => Err(e),
    }
}

async fn find_pair(db_pool: &SqlitePool, a: &str, b: &str) -> AppResult<Option<ConversationRow>> {
    let row: Option<ConversationRow> =
        sqlx::query_as("SELECT id,member_one_id,member_two_id FROM conversations WHERE pair_key=?")
            .bind(pair_key(a, b))
            .fetch_optional(db_pool)
            .await?;

    match row {
        Some(row) if !row.joins(a, b) => Err(anyhow!(
            "pair key of {a}/{b} maps to conversation {} of {}/{}",
            row.id,
            row.member_one_id,
            row.member_two_id
        )
        .into()),
        row => Ok(row),
    }
}

async fn create(db_pool: &SqlitePool, a: &str, b: &str) -> AppResult<ConversationRow> {
    let row = ConversationRow {
        id: Uuid::now_v7().to_string(),
        member_one_id: a.to_owned(),
        member_two_id: b.to_owned(),
    };

    let inserted = sqlx::query("INSERT INTO conversations (id,member_one_id,member_two_id,pair_key) VALUES (?,?,?,?)")
        .bind(&row.id)
        .bind(&row.member_one_id)
        .bind(&row.member_two_id)
        .bind(pair_key(a, b))
        .execute(db_pool)
        .await;

    match inserted {
        Ok(_) => Ok(row),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(AppError::Conflict),
        Err(e) => Err(e.into()),
    }
}

/// Loads a conversation with both members expanded.
pub async fn find_by_id(db_pool: &SqlitePool, conversation_id: &str) -> AppResult<Option<Conversation>> {
    let row: Option<ConversationRow> =
        sqlx::query_as("SELECT id,member_one_id,member_two_id FROM conversations WHERE id=?")
            .bind(conversation_id)
            .fetch_optional(db_pool)
            .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let member_one = db::member_by_id(db_pool, &row.member_one_id).await?;
    let member_two = db::member_by_id(db_pool, &row.member_two_id).await?;
    let (Some(member_one), Some(member_two)) = (member_one, member_two) else {
        return Err(anyhow!("conversation {} references a missing member", row.id).into());
    };
    Ok(Some(row.expand(member_one, member_two)))
}
