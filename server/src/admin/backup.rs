//! JSON backups of the journal data: timeline entries and comments, capsules,
//! non-admin accounts and keyword rules.
//!
//! A backup is a single `backup_YYYYmmdd_HHMMSS.json` document in the backup
//! directory. Restore replaces the journal data inside one transaction.

use std::collections::BTreeSet;
use std::path::{Path as FsPath, PathBuf};

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Session;
use crate::db::{self, models};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::uploads::{form::FormData, routes::file_response, store};

pub const BACKUP_VERSION: &str = "1.0";

fn default_version() -> String {
    BACKUP_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub media_path: Option<String>,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapsuleRecord {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    pub unlock_date: String,
    pub question: String,
    pub answer_hash: String,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub media_path: Option<String>,
    #[serde(default)]
    pub is_unlocked: bool,
    #[serde(default)]
    pub unlock_attempts: i64,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password_hash: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

fn default_role() -> String {
    models::ROLE_USER.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: i64,
    pub content: String,
    pub timeline_entry_id: i64,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRecord {
    pub keyword: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// On-disk backup document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    pub timeline_entries: Vec<EntryRecord>,
    pub time_capsules: Vec<CapsuleRecord>,
    pub users: Vec<UserRecord>,
    pub comments: Vec<CommentRecord>,
    #[serde(default)]
    pub keyword_rules: Vec<KeywordRecord>,
}

#[derive(Debug, Serialize)]
pub struct BackupFileInfo {
    pub id: String,
    pub filename: String,
    pub size: u64,
    pub created_at: String,
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct RestoreSummary {
    pub timeline_entries: usize,
    pub time_capsules: usize,
    pub comments: usize,
    pub users: usize,
    pub keyword_rules: usize,
}

/// Whether `name` is a backup file this server would have written.
fn is_backup_name(name: &str) -> bool {
    store::is_safe_name(name) && name.starts_with("backup_") && name.ends_with(".json")
}

/// Normalize a timestamp from a backup, falling back to now.
fn restored_timestamp(raw: Option<&str>) -> String {
    raw.and_then(models::parse_timestamp)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Snapshot the journal data.
pub fn export(conn: &Connection) -> rusqlite::Result<BackupDocument> {
    let timeline_entries = conn
        .prepare(
            "SELECT id, title, content, media_type, media_path, likes, created_at
             FROM timeline_entries ORDER BY id",
        )?
        .query_map([], |row| {
            Ok(EntryRecord {
                id: row.get(0)?,
                title: row.get(1)?,
                content: row.get(2)?,
                media_type: row.get(3)?,
                media_path: row.get(4)?,
                likes: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let time_capsules = conn
        .prepare(
            "SELECT id, title, content, unlock_date, question, answer_hash, media_type,
                    media_path, is_unlocked, unlock_attempts, created_at
             FROM capsules ORDER BY id",
        )?
        .query_map([], |row| {
            Ok(CapsuleRecord {
                id: row.get(0)?,
                title: row.get(1)?,
                content: row.get(2)?,
                unlock_date: row.get(3)?,
                question: row.get(4)?,
                answer_hash: row.get(5)?,
                media_type: row.get(6)?,
                media_path: row.get(7)?,
                is_unlocked: row.get(8)?,
                unlock_attempts: row.get(9)?,
                created_at: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let users = conn
        .prepare(
            "SELECT id, username, email, password_hash, role, bio, is_active, created_at
             FROM users ORDER BY id",
        )?
        .query_map([], |row| {
            Ok(UserRecord {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password_hash: row.get(3)?,
                role: row.get(4)?,
                bio: row.get(5)?,
                is_active: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let comments = conn
        .prepare("SELECT id, content, entry_id, created_at FROM timeline_comments ORDER BY id")?
        .query_map([], |row| {
            Ok(CommentRecord {
                id: row.get(0)?,
                content: row.get(1)?,
                timeline_entry_id: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let keyword_rules = conn
        .prepare("SELECT keyword, is_active, created_at FROM keyword_rules ORDER BY id")?
        .query_map([], |row| {
            Ok(KeywordRecord {
                keyword: row.get(0)?,
                is_active: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BackupDocument {
        created_at: Some(models::now_timestamp()),
        version: BACKUP_VERSION.to_string(),
        timeline_entries,
        time_capsules,
        users,
        comments,
        keyword_rules,
    })
}

/// Upload files referenced by rows, split by the directory they live in.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReferencedFiles {
    pub public: BTreeSet<String>,
    pub capsule: BTreeSet<String>,
}

impl ReferencedFiles {
    /// Files in `self` that `after` no longer references.
    fn orphaned_by(&self, after: &ReferencedFiles) -> ReferencedFiles {
        ReferencedFiles {
            public: self.public.difference(&after.public).cloned().collect(),
            capsule: self.capsule.difference(&after.capsule).cloned().collect(),
        }
    }
}

fn collect_names(conn: &Connection, sql: &str, into: &mut BTreeSet<String>) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(sql)?;
    for name in stmt.query_map([], |row| row.get::<_, String>(0))? {
        into.insert(name?);
    }
    Ok(())
}

pub fn referenced_files(conn: &Connection) -> rusqlite::Result<ReferencedFiles> {
    let mut files = ReferencedFiles::default();
    collect_names(
        conn,
        "SELECT media_path FROM timeline_entries WHERE media_path IS NOT NULL",
        &mut files.public,
    )?;
    collect_names(conn, "SELECT file_name FROM message_images", &mut files.public)?;
    collect_names(
        conn,
        "SELECT substr(avatar_url, 10) FROM users WHERE avatar_url LIKE '/uploads/%'",
        &mut files.public,
    )?;
    collect_names(
        conn,
        "SELECT media_path FROM capsules WHERE media_path IS NOT NULL",
        &mut files.capsule,
    )?;
    Ok(files)
}

/// Replace the journal data with `doc`. Administrators and their content are
/// kept; backed-up admins and usernames or keywords already present are skipped.
/// The caller commits.
pub fn import(tx: &Transaction<'_>, doc: &BackupDocument) -> ApiResult<RestoreSummary> {
    tx.execute_batch(
        "DELETE FROM timeline_comments;
         DELETE FROM capsules;
         DELETE FROM timeline_entries;
         DELETE FROM users WHERE role != 'admin';",
    )?;

    let mut summary = RestoreSummary::default();

    for entry in &doc.timeline_entries {
        tx.execute(
            "INSERT INTO timeline_entries (id, title, content, created_at, media_type, media_path, likes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id,
                entry.title,
                entry.content,
                restored_timestamp(entry.created_at.as_deref()),
                entry.media_type,
                entry.media_path,
                entry.likes,
            ],
        )?;
        summary.timeline_entries += 1;
    }

    for capsule in &doc.time_capsules {
        let unlock_date = models::parse_timestamp(&capsule.unlock_date).ok_or_else(|| {
            ApiError::validation(format!("Capsule {} has an invalid unlock date", capsule.id))
        })?;
        tx.execute(
            "INSERT INTO capsules (id, title, content, created_at, unlock_date, question, answer_hash,
                                   media_type, media_path, is_unlocked, unlock_attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                capsule.id,
                capsule.title,
                capsule.content,
                restored_timestamp(capsule.created_at.as_deref()),
                unlock_date.to_rfc3339_opts(SecondsFormat::Secs, true),
                capsule.question,
                capsule.answer_hash,
                capsule.media_type,
                capsule.media_path,
                capsule.is_unlocked,
                capsule.unlock_attempts,
            ],
        )?;
        summary.time_capsules += 1;
    }

    for comment in &doc.comments {
        let entry_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM timeline_entries WHERE id = ?1)",
            [comment.timeline_entry_id],
            |row| row.get(0),
        )?;
        if !entry_exists {
            tracing::warn!(comment_id = comment.id, "Skipping comment on missing timeline entry");
            continue;
        }
        tx.execute(
            "INSERT INTO timeline_comments (id, entry_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                comment.id,
                comment.timeline_entry_id,
                comment.content,
                restored_timestamp(comment.created_at.as_deref()),
            ],
        )?;
        summary.comments += 1;
    }

    for user in &doc.users {
        if user.role == models::ROLE_ADMIN {
            continue;
        }
        let taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1 OR (email IS NOT NULL AND email = ?2))",
            params![user.username, user.email],
            |row| row.get(0),
        )?;
        if taken {
            continue;
        }
        let created_at = restored_timestamp(user.created_at.as_deref());
        tx.execute(
            "INSERT INTO users (username, email, password_hash, role, bio, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                user.username,
                user.email,
                user.password_hash,
                models::ROLE_USER,
                user.bio,
                user.is_active,
                created_at,
            ],
        )?;
        summary.users += 1;
    }

    for rule in &doc.keyword_rules {
        let keyword = rule.keyword.trim();
        if keyword.is_empty() {
            continue;
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO keyword_rules (keyword, is_active, created_at) VALUES (?1, ?2, ?3)",
            params![keyword, rule.is_active, restored_timestamp(rule.created_at.as_deref())],
        )?;
        summary.keyword_rules += inserted;
    }

    Ok(summary)
}

/// Pick `backup_<stamp>.json`, adding a counter if that name is taken.
fn next_backup_path(dir: &FsPath) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let first = dir.join(format!("backup_{}.json", stamp));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| dir.join(format!("backup_{}_{}.json", stamp, n)))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

/// POST /api/admin/backup
pub async fn create_backup(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    let backup_dir = state.backup_dir.clone();
    let (filename, doc) = db::blocking(&state.db, move |conn| {
        let doc = export(conn)?;
        std::fs::create_dir_all(&backup_dir)?;
        let path = next_backup_path(&backup_dir);
        let body = serde_json::to_vec_pretty(&doc)
            .map_err(|e| ApiError::internal(format!("Backup encode: {}", e)))?;
        std::fs::write(&path, body)?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Ok((filename, doc))
    })
    .await?;

    tracing::info!(
        filename = %filename,
        entries = doc.timeline_entries.len(),
        capsules = doc.time_capsules.len(),
        users = doc.users.len(),
        admin_id = session.user_id,
        "Backup created"
    );

    Ok(Json(serde_json::json!({
        "message": "Backup created",
        "filename": filename,
        "counts": {
            "timeline_entries": doc.timeline_entries.len(),
            "time_capsules": doc.time_capsules.len(),
            "users": doc.users.len(),
            "comments": doc.comments.len(),
            "keyword_rules": doc.keyword_rules.len(),
        },
    })))
}

/// GET /api/admin/backups: newest first.
pub async fn list_backups(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    let backup_dir = state.backup_dir.clone();
    let backups = tokio::task::spawn_blocking(move || -> ApiResult<Vec<BackupFileInfo>> {
        let mut backups = Vec::new();
        let entries = match std::fs::read_dir(&backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(backups),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_backup_name(&filename) {
                continue;
            }
            let meta = entry.metadata()?;
            let modified: chrono::DateTime<Utc> = meta.modified()?.into();
            backups.push(BackupFileInfo {
                id: filename.trim_end_matches(".json").to_string(),
                filename,
                size: meta.len(),
                created_at: modified.format("%Y-%m-%d %H:%M:%S").to_string(),
            });
        }
        backups.sort_by(|a, b| b.filename.cmp(&a.filename));
        Ok(backups)
    })
    .await??;

    Ok(Json(serde_json::json!({ "backups": backups })))
}

/// GET /api/admin/backups/{filename}/download
pub async fn download_backup(
    State(state): State<AppState>,
    session: Session,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    session.require_admin()?;
    if !is_backup_name(&filename) {
        return Err(ApiError::not_found("Backup not found"));
    }
    file_response(state.backup_dir.join(&filename), Some(&filename)).await
}

/// DELETE /api/admin/backups/{id}: `id` is the file name without `.json`.
pub async fn delete_backup(
    State(state): State<AppState>,
    session: Session,
    Path(backup_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    let filename = format!("{}.json", backup_id.trim_end_matches(".json"));
    if !is_backup_name(&filename) {
        return Err(ApiError::not_found("Backup not found"));
    }
    match tokio::fs::remove_file(state.backup_dir.join(&filename)).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("Backup not found"))
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(filename = %filename, admin_id = session.user_id, "Backup deleted");
    Ok(Json(serde_json::json!({ "message": "Backup deleted" })))
}

/// POST /api/admin/restore: multipart `backup_file` holding a backup document.
pub async fn restore_backup(
    State(state): State<AppState>,
    session: Session,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    session.require_admin()?;

    let mut form = FormData::read(multipart).await?;
    let file = form
        .take_file("backup_file")
        .ok_or_else(|| ApiError::validation("No backup file provided"))?;
    if file.extension().as_deref() != Some("json") {
        return Err(ApiError::validation("Backup file must be a .json file"));
    }
    let doc: BackupDocument = serde_json::from_slice(&file.data)
        .map_err(|e| ApiError::validation(format!("Invalid backup file: {}", e)))?;

    let (summary, orphaned) = db::blocking(&state.db, move |conn| {
        let tx = conn.transaction()?;
        let before = referenced_files(&tx)?;
        let summary = import(&tx, &doc)?;
        let orphaned = before.orphaned_by(&referenced_files(&tx)?);
        tx.commit()?;
        Ok((summary, orphaned))
    })
    .await?;

    // Media of rows the restore dropped; files the backup still points at stay.
    for name in &orphaned.public {
        store::remove(&state.upload_dir, name);
    }
    let capsule_dir = store::capsule_dir(&state.upload_dir);
    for name in &orphaned.capsule {
        store::remove(&capsule_dir, name);
    }

    tracing::info!(?summary, admin_id = session.user_id, "Backup restored");
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "message": "Backup restored",
            "restored": summary,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_names_are_restricted() {
        assert!(is_backup_name("backup_20240101_120000.json"));
        assert!(!is_backup_name("backup_../../etc.json"));
        assert!(!is_backup_name("notes.json"));
        assert!(!is_backup_name("backup_20240101_120000.txt"));
    }

    #[test]
    fn document_requires_core_sections() {
        let missing = r#"{"created_at": "2024-01-01T00:00:00", "timeline_entries": []}"#;
        assert!(serde_json::from_str::<BackupDocument>(missing).is_err());

        let minimal = r#"{"timeline_entries": [], "time_capsules": [], "users": [], "comments": []}"#;
        let doc: BackupDocument = serde_json::from_str(minimal).unwrap();
        assert_eq!(doc.version, "1.0");
        assert!(doc.keyword_rules.is_empty());
    }

    #[test]
    fn export_then_import_preserves_capsule_state() {
        let tmp = tempfile::tempdir().unwrap();
        let db = crate::db::init_db(tmp.path().to_str().unwrap()).unwrap();
        let mut conn = db.lock().unwrap();
        conn.execute_batch(
            "INSERT INTO capsules (id, title, created_at, unlock_date, question, answer_hash, is_unlocked, unlock_attempts)
             VALUES (7, 'Letter', '2024-01-01T00:00:00Z', '2024-02-01T00:00:00Z', 'Q?', 'abc', 1, 3);
             INSERT INTO timeline_entries (id, title, created_at, likes) VALUES (4, 'Day one', '2024-01-01T00:00:00Z', 2);
             INSERT INTO timeline_comments (id, entry_id, content, created_at) VALUES (9, 4, 'nice', '2024-01-01T00:00:00Z');
             INSERT INTO keyword_rules (keyword, is_active, created_at) VALUES ('spam', 1, '2024-01-01T00:00:00Z');",
        )
        .unwrap();

        let doc = export(&conn).unwrap();
        conn.execute_batch("UPDATE capsules SET is_unlocked = 0, unlock_attempts = 0;")
            .unwrap();

        let tx = conn.transaction().unwrap();
        let summary = import(&tx, &doc).unwrap();
        tx.commit().unwrap();

        assert_eq!(summary.time_capsules, 1);
        assert_eq!(summary.comments, 1);
        assert_eq!(summary.keyword_rules, 0);
        let (unlocked, attempts): (bool, i64) = conn
            .query_row(
                "SELECT is_unlocked, unlock_attempts FROM capsules WHERE id = 7",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(unlocked);
        assert_eq!(attempts, 3);
    }

    #[test]
    fn orphaned_files_exclude_those_still_referenced() {
        let tmp = tempfile::tempdir().unwrap();
        let db = crate::db::init_db(tmp.path().to_str().unwrap()).unwrap();
        let conn = db.lock().unwrap();
        conn.execute_batch(
            "INSERT INTO timeline_entries (id, title, created_at, media_path) VALUES (1, 'a', '2024-01-01T00:00:00Z', 'timeline_a.png');
             INSERT INTO timeline_entries (id, title, created_at, media_path) VALUES (2, 'b', '2024-01-01T00:00:00Z', 'timeline_b.png');
             INSERT INTO capsules (id, title, created_at, unlock_date, question, answer_hash, media_path)
             VALUES (3, 'c', '2024-01-01T00:00:00Z', '2024-02-01T00:00:00Z', 'Q?', 'abc', 'capsule_c.gif');",
        )
        .unwrap();
        let before = referenced_files(&conn).unwrap();
        assert_eq!(before.public.len(), 2);
        assert!(before.capsule.contains("capsule_c.gif"));

        conn.execute_batch("DELETE FROM timeline_entries WHERE id = 2; DELETE FROM capsules;")
            .unwrap();
        let orphaned = before.orphaned_by(&referenced_files(&conn).unwrap());
        assert_eq!(orphaned.public.into_iter().collect::<Vec<_>>(), vec!["timeline_b.png"]);
        assert_eq!(orphaned.capsule.into_iter().collect::<Vec<_>>(), vec!["capsule_c.gif"]);
    }
}

