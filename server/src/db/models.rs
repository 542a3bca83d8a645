//! Database row types and the row-mapping helpers used by the query code.
//! Columns correspond 1:1 to the SQLite schema defined in migrations.rs.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::Row;

pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";

/// Current time as stored in every `*_at` column.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Render a stored timestamp the way the API returns it (`YYYY-MM-DD HH:MM:SS`).
/// Unparseable values are passed through untouched.
pub fn display_timestamp(stored: &str) -> String {
    DateTime::parse_from_rfc3339(stored)
        .map(|t| t.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| stored.to_string())
}

/// Parse a timestamp in any of the forms the API accepts or older backups
/// carry. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Avatar URL with the letter-avatar fallback.
pub fn avatar_or_default(username: &str, avatar_url: Option<&str>) -> String {
    match avatar_url {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => {
            let letter = username
                .chars()
                .next()
                .map(|c| c.to_uppercase().to_string())
                .unwrap_or_else(|| "U".to_string());
            format!("/api/avatar/default/{}", letter)
        }
    }
}

/// User record in the users table (password hash excluded).
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub last_login: Option<String>,
    pub login_count: i64,
}

impl User {
    pub const COLUMNS: &'static str = "id, username, email, role, bio, avatar_url, is_active, \
         created_at, updated_at, last_login, login_count";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            role: row.get(3)?,
            bio: row.get(4)?,
            avatar_url: row.get(5)?,
            is_active: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            last_login: row.get(9)?,
            login_count: row.get(10)?,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    pub fn avatar(&self) -> String {
        avatar_or_default(&self.username, self.avatar_url.as_deref())
    }
}

/// Time capsule row.
#[derive(Debug, Clone)]
pub struct Capsule {
    pub id: i64,
    pub title: String,
    pub content: Option<String>,
    pub created_at: String,
    pub unlock_date: DateTime<Utc>,
    pub question: String,
    pub answer_hash: String,
    pub media_type: Option<String>,
    pub media_path: Option<String>,
    pub is_unlocked: bool,
    pub unlock_attempts: i64,
}

impl Capsule {
    pub const COLUMNS: &'static str = "id, title, content, created_at, unlock_date, question, \
         answer_hash, media_type, media_path, is_unlocked, unlock_attempts";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let unlock_raw: String = row.get(4)?;
        let unlock_date = DateTime::parse_from_rfc3339(&unlock_raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?;
        Ok(Capsule {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            created_at: row.get(3)?,
            unlock_date,
            question: row.get(5)?,
            answer_hash: row.get(6)?,
            media_type: row.get(7)?,
            media_path: row.get(8)?,
            is_unlocked: row.get(9)?,
            unlock_attempts: row.get(10)?,
        })
    }
}

/// Admin-managed moderation keyword.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub id: i64,
    pub keyword: String,
    pub is_active: bool,
    pub created_at: String,
}

impl KeywordRule {
    pub const COLUMNS: &'static str = "id, keyword, is_active, created_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(KeywordRule {
            id: row.get(0)?,
            keyword: row.get(1)?,
            is_active: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

/// Timeline journal entry.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub id: i64,
    pub title: String,
    pub content: Option<String>,
    pub created_at: String,
    pub media_type: Option<String>,
    pub media_path: Option<String>,
    pub likes: i64,
}

impl TimelineEntry {
    pub const COLUMNS: &'static str = "id, title, content, created_at, media_type, media_path, likes";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(TimelineEntry {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            created_at: row.get(3)?,
            media_type: row.get(4)?,
            media_path: row.get(5)?,
            likes: row.get(6)?,
        })
    }
}
