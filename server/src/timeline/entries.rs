use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Session;
use crate::db::{self, models::{self, TimelineEntry}};
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::state::AppState;
use crate::uploads::{form::FormData, store};

#[derive(Debug, Serialize)]
pub struct EntryView {
    pub id: i64,
    pub title: String,
    pub content: Option<String>,
    pub created_at: String,
    pub media_type: Option<String>,
    pub media_url: Option<String>,
    pub likes: i64,
}

impl From<&TimelineEntry> for EntryView {
    fn from(entry: &TimelineEntry) -> Self {
        EntryView {
            id: entry.id,
            title: entry.title.clone(),
            content: entry.content.clone(),
            created_at: models::display_timestamp(&entry.created_at),
            media_type: entry.media_type.clone(),
            media_url: entry.media_path.as_deref().map(store::public_url),
            likes: entry.likes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEntryCommentRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct EntryCommentView {
    pub id: i64,
    pub content: String,
    pub created_at: String,
}

fn load_entry(conn: &Connection, entry_id: i64) -> ApiResult<TimelineEntry> {
    conn.query_row(
        &format!("SELECT {} FROM timeline_entries WHERE id = ?1", TimelineEntry::COLUMNS),
        [entry_id],
        TimelineEntry::from_row,
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("Entry not found"))
}

/// GET /api/timeline: newest first.
pub async fn list_entries(State(state): State<AppState>) -> ApiResult<Json<Vec<EntryView>>> {
    let entries = db::blocking(&state.db, |conn| {
        let entries = conn
            .prepare(&format!(
                "SELECT {} FROM timeline_entries ORDER BY created_at DESC, id DESC",
                TimelineEntry::COLUMNS
            ))?
            .query_map([], TimelineEntry::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    })
    .await?;

    Ok(Json(entries.iter().map(EntryView::from).collect()))
}

/// POST /api/timeline: multipart `title`, `content` and optional `media`.
/// Open to anonymous callers.
pub async fn create_entry(
    State(state): State<AppState>,
    session: Option<Session>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let mut form = FormData::read(multipart).await?;
    let title = form
        .trimmed("title")
        .ok_or_else(|| ApiError::validation("Title is required"))?;
    let content = form.text("content").map(str::to_string);

    let upload_dir = state.upload_dir.clone();
    let stored = match form.take_file("media") {
        Some(file) => Some(store::save_one(upload_dir.clone(), "timeline", file).await?),
        None => None,
    };

    let entry = db::blocking(&state.db, move |conn| {
        let inserted = conn
            .execute(
                "INSERT INTO timeline_entries (title, content, created_at, media_type, media_path)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    title,
                    content,
                    models::now_timestamp(),
                    stored.as_ref().map(|s| s.media_type),
                    stored.as_ref().map(|s| s.file_name.as_str()),
                ],
            )
            .map_err(ApiError::from)
            .and_then(|_| load_entry(conn, conn.last_insert_rowid()));

        if inserted.is_err() {
            if let Some(stored) = &stored {
                store::remove(&upload_dir, &stored.file_name);
            }
        }
        inserted
    })
    .await?;

    tracing::info!(
        entry_id = entry.id,
        user_id = ?session.as_ref().map(|s| s.user_id),
        "Timeline entry created"
    );

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Entry created",
            "entry": EntryView::from(&entry),
        })),
    ))
}

/// DELETE /api/timeline/{id}: admin only; comments cascade, media is removed.
pub async fn delete_entry(
    State(state): State<AppState>,
    session: Session,
    Path(entry_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    let entry = db::blocking(&state.db, move |conn| {
        let entry = load_entry(conn, entry_id)?;
        conn.execute("DELETE FROM timeline_entries WHERE id = ?1", [entry_id])?;
        Ok(entry)
    })
    .await?;

    if let Some(file_name) = &entry.media_path {
        store::remove(&state.upload_dir, file_name);
    }

    tracing::info!(entry_id, admin_id = session.user_id, "Timeline entry deleted");
    Ok(Json(serde_json::json!({ "message": "Entry deleted" })))
}

/// POST /api/timeline/{id}/like
pub async fn like_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let likes: i64 = db::blocking(&state.db, move |conn| {
        let updated = conn.execute(
            "UPDATE timeline_entries SET likes = likes + 1 WHERE id = ?1",
            [entry_id],
        )?;
        if updated == 0 {
            return Err(ApiError::not_found("Entry not found"));
        }
        Ok(conn.query_row(
            "SELECT likes FROM timeline_entries WHERE id = ?1",
            [entry_id],
            |row| row.get(0),
        )?)
    })
    .await?;

    Ok(Json(serde_json::json!({ "message": "Liked", "likes": likes })))
}

/// GET /api/timeline/{id}/comments: newest first.
pub async fn list_entry_comments(
    State(state): State<AppState>,
    Path(entry_id): Path<i64>,
) -> ApiResult<Json<Vec<EntryCommentView>>> {
    let comments = db::blocking(&state.db, move |conn| {
        load_entry(conn, entry_id)?;
        let comments = conn
            .prepare(
                "SELECT id, content, created_at FROM timeline_comments
                 WHERE entry_id = ?1 ORDER BY created_at DESC, id DESC",
            )?
            .query_map([entry_id], |row| {
                let created_at: String = row.get(2)?;
                Ok(EntryCommentView {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    created_at: models::display_timestamp(&created_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    })
    .await?;

    Ok(Json(comments))
}

/// POST /api/timeline/{id}/comments
pub async fn add_entry_comment(
    State(state): State<AppState>,
    Path(entry_id): Path<i64>,
    ApiJson(req): ApiJson<CreateEntryCommentRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::validation("Comment content cannot be empty"));
    }

    let comment = db::blocking(&state.db, move |conn| {
        load_entry(conn, entry_id)?;
        let now = models::now_timestamp();
        conn.execute(
            "INSERT INTO timeline_comments (entry_id, content, created_at) VALUES (?1, ?2, ?3)",
            params![entry_id, content, now],
        )?;
        Ok(EntryCommentView {
            id: conn.last_insert_rowid(),
            content,
            created_at: models::display_timestamp(&now),
        })
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Comment added",
            "comment": comment,
        })),
    ))
}
