use std::{str::FromStr, time::Duration};

use serde::{ser::Error as _, Serialize, Serializer};
use sqlx::{sqlite::{SqliteConnectOptions, SqlitePoolOptions}, FromRow, SqlitePool};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub async fn connect(database_url: &str, acquire_timeout: Duration) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .acquire_timeout(acquire_timeout)
        .connect_with(options)
        .await?;

    sqlx::migrate!().run(&db_pool).await?;
    Ok(db_pool)
}

/// Private in-memory database. Pinned to one connection, since every
/// connection to `:memory:` opens a separate database.
pub async fn connect_in_memory() -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    sqlx::migrate!().run(&db_pool).await?;
    Ok(db_pool)
}

/// Unix milliseconds, rendered as RFC 3339 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, sqlx::Type)]
#[sqlx(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Timestamp {
        Timestamp((OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let at = OffsetDateTime::from_unix_timestamp_nanos(self.0 as i128 * 1_000_000)
            .map_err(S::Error::custom)?;
        serializer.serialize_str(&at.format(&Rfc3339).map_err(S::Error::custom)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub image_url: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum MemberRole {
    Admin,
    Moderator,
    Guest,
}

/// A member with its profile expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub role: MemberRole,
    pub profile_id: String,
    pub server_id: String,
    pub profile: Profile,
}

/// Columns selected by every query that expands a member as `m` joined
/// with its profile as `p`. Read back through [`MemberRow`].
pub(crate) const MEMBER_COLUMNS: &str = "m.id AS member_id, m.role, m.profile_id, m.server_id, \
    p.user_id AS profile_user_id, p.name AS profile_name, \
    p.image_url AS profile_image_url, p.email AS profile_email";

#[derive(FromRow)]
pub(crate) struct MemberRow {
    member_id: String,
    role: MemberRole,
    profile_id: String,
    server_id: String,
    profile_user_id: String,
    profile_name: String,
    profile_image_url: String,
    profile_email: String,
}

impl From<MemberRow> for Member {
    fn from(row: MemberRow) -> Member {
        Member {
            id: row.member_id,
            role: row.role,
            profile: Profile {
                id: row.profile_id.clone(),
                user_id: row.profile_user_id,
                name: row.profile_name,
                image_url: row.profile_image_url,
                email: row.profile_email,
            },
            profile_id: row.profile_id,
            server_id: row.server_id,
        }
    }
}

pub async fn profile_by_id(db_pool: &SqlitePool, profile_id: &str) -> sqlx::Result<Option<Profile>> {
    sqlx::query_as("SELECT id,user_id,name,image_url,email FROM profiles WHERE id=?")
        .bind(profile_id)
        .fetch_optional(db_pool)
        .await
}

pub async fn member_by_id(db_pool: &SqlitePool, member_id: &str) -> sqlx::Result<Option<Member>> {
    let sql = format!(
        "SELECT {MEMBER_COLUMNS} FROM members m JOIN profiles p ON p.id = m.profile_id WHERE m.id=?"
    );
    let row: Option<MemberRow> = sqlx::query_as(&sql)
        .bind(member_id)
        .fetch_optional(db_pool)
        .await?;
    Ok(row.map(Member::from))
}

/// The profile's membership in one server, if any.
pub async fn member_for_profile(
    db_pool: &SqlitePool,
    profile_id: &str,
    server_id: &str,
) -> sqlx::Result<Option<Member>> {
    let sql = format!(
        "SELECT {MEMBER_COLUMNS} FROM members m JOIN profiles p ON p.id = m.profile_id \
         WHERE m.profile_id=? AND m.server_id=?"
    );
    let row: Option<MemberRow> = sqlx::query_as(&sql)
        .bind(profile_id)
        .bind(server_id)
        .fetch_optional(db_pool)
        .await?;
    Ok(row.map(Member::from))
}
