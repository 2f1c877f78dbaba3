use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn column_uuid(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn column_datetime(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub nick: String,
    pub bio: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub role: String,
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub const COLUMNS: &'static str =
        "id, username, nick, bio, email, password_hash, role, image, created_at, updated_at";

    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: column_uuid(row, 0)?,
            username: row.get(1)?,
            nick: row.get(2)?,
            bio: row.get(3)?,
            email: row.get(4)?,
            password_hash: row.get(5)?,
            role: row.get(6)?,
            image: row.get(7)?,
            created_at: column_datetime(row, 8)?,
            updated_at: column_datetime(row, 9)?,
        })
    }
}

/// Relationship-facing projection of a user: what other users get to see
/// when a record is embedded in a listing. No email, no role, no hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub nick: String,
    pub image: String,
}

impl UserSummary {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(UserSummary {
            id: column_uuid(row, 0)?,
            username: row.get(1)?,
            nick: row.get(2)?,
            image: row.get(3)?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub user_id: Uuid,
    pub text: String,
    pub file: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub const COLUMNS: &'static str = "id, user_id, text, file, created_at";

    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Post {
            id: column_uuid(row, 0)?,
            user_id: column_uuid(row, 1)?,
            text: row.get(2)?,
            file: row.get(3)?,
            created_at: column_datetime(row, 4)?,
        })
    }
}

/// A post joined with its author's public fields, the shape every post
/// listing returns.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostWithAuthor {
    pub id: Uuid,
    pub text: String,
    pub file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user: UserSummary,
}

impl PostWithAuthor {
    pub const COLUMNS: &'static str = "p.id, p.text, p.file, p.created_at, \
         u.id, u.username, u.nick, u.image";

    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PostWithAuthor {
            id: column_uuid(row, 0)?,
            text: row.get(1)?,
            file: row.get(2)?,
            created_at: column_datetime(row, 3)?,
            user: UserSummary {
                id: column_uuid(row, 4)?,
                username: row.get(5)?,
                nick: row.get(6)?,
                image: row.get(7)?,
            },
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Follow {
    pub id: Uuid,
    pub follower_id: Uuid,
    pub followed_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One entry in a followers/following listing: the edge plus the counterpart
/// user's public fields.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub user: UserSummary,
}

impl FollowEntry {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(FollowEntry {
            id: column_uuid(row, 0)?,
            created_at: column_datetime(row, 1)?,
            user: UserSummary {
                id: column_uuid(row, 2)?,
                username: row.get(3)?,
                nick: row.get(4)?,
                image: row.get(5)?,
            },
        })
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub user_id: Uuid,
    pub posts: u64,
    pub followers: u64,
    pub following: u64,
}

/// Relationship state between a profile and the acting user, both
/// directions resolved independently.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FollowInfo {
    pub following: bool,
    pub follower: bool,
}
