use std::path::PathBuf;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;

use crate::auth::middleware::Session;
use crate::board::AuthorSummary;
use crate::db::{self, models};
use crate::error::{ApiError, ApiResult};
use crate::moderation::filter;
use crate::pagination::{PageQuery, PageRequest, Pagination};
use crate::state::AppState;
use crate::uploads::{form::FormData, store::{self, StoredFile}};

const STATUS_PUBLISHED: &str = "published";

const MESSAGE_SELECT: &str = "SELECT m.id, m.content, m.is_pinned, m.status, m.created_at, m.updated_at,
        u.id, u.username, u.avatar_url,
        (SELECT COUNT(*) FROM message_likes l WHERE l.message_id = m.id),
        (SELECT COUNT(*) FROM message_comments c WHERE c.message_id = m.id)
     FROM messages m JOIN users u ON u.id = m.user_id";

#[derive(Debug, Serialize)]
pub struct ImageView {
    pub id: i64,
    pub url: String,
    pub original_name: String,
    pub file_size: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub content: String,
    pub is_pinned: bool,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub user: AuthorSummary,
    pub images: Vec<ImageView>,
    pub like_count: i64,
    pub comment_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_liked: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    pub pagination: Pagination,
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageView> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(MessageView {
        id: row.get(0)?,
        content: row.get(1)?,
        is_pinned: row.get(2)?,
        status: row.get(3)?,
        created_at: models::display_timestamp(&created_at),
        updated_at: models::display_timestamp(&updated_at),
        user: AuthorSummary::new(row.get(6)?, row.get(7)?, row.get(8)?),
        images: Vec::new(),
        like_count: row.get(9)?,
        comment_count: row.get(10)?,
        user_liked: None,
    })
}

fn attach_images(conn: &Connection, messages: &mut [MessageView]) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, file_name, original_name, file_size FROM message_images
         WHERE message_id = ?1 ORDER BY id ASC",
    )?;
    for message in messages.iter_mut() {
        message.images = stmt
            .query_map([message.id], |row| {
                let file_name: String = row.get(1)?;
                Ok(ImageView {
                    id: row.get(0)?,
                    url: store::public_url(&file_name),
                    original_name: row.get(2)?,
                    file_size: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
    }
    Ok(())
}

/// Which messages a page draws from.
#[derive(Debug, Clone, Copy)]
pub enum MessageScope {
    /// Public board: published only.
    Published,
    /// Admin view: every status.
    All,
    /// One author's published posts.
    Author(i64),
}

/// One page of messages, pinned first then newest.
pub fn message_page(
    conn: &Connection,
    scope: MessageScope,
    page: PageRequest,
) -> ApiResult<MessagePage> {
    let (filter, param) = match scope {
        MessageScope::Published => ("WHERE m.status = ?1", None),
        MessageScope::All => ("", None),
        MessageScope::Author(user_id) => ("WHERE m.status = ?1 AND m.user_id = ?2", Some(user_id)),
    };

    let count_sql = format!(
        "SELECT COUNT(*) FROM messages m {}",
        filter
    );
    let list_sql = format!(
        "{} {} ORDER BY m.is_pinned DESC, m.created_at DESC, m.id DESC LIMIT {} OFFSET {}",
        MESSAGE_SELECT,
        filter,
        page.limit(),
        page.offset()
    );

    let (total, mut messages): (i64, Vec<MessageView>) = match (scope, param) {
        (MessageScope::All, _) => (
            conn.query_row(&count_sql, [], |row| row.get(0))?,
            conn.prepare(&list_sql)?
                .query_map([], message_from_row)?
                .collect::<Result<_, _>>()?,
        ),
        (_, Some(user_id)) => (
            conn.query_row(&count_sql, params![STATUS_PUBLISHED, user_id], |row| row.get(0))?,
            conn.prepare(&list_sql)?
                .query_map(params![STATUS_PUBLISHED, user_id], message_from_row)?
                .collect::<Result<_, _>>()?,
        ),
        (_, None) => (
            conn.query_row(&count_sql, [STATUS_PUBLISHED], |row| row.get(0))?,
            conn.prepare(&list_sql)?
                .query_map([STATUS_PUBLISHED], message_from_row)?
                .collect::<Result<_, _>>()?,
        ),
    };

    attach_images(conn, &mut messages)?;
    Ok(MessagePage {
        messages,
        pagination: Pagination::new(page, total),
    })
}

fn load_message(conn: &Connection, message_id: i64) -> ApiResult<MessageView> {
    let mut message = conn
        .query_row(
            &format!("{} WHERE m.id = ?1", MESSAGE_SELECT),
            [message_id],
            message_from_row,
        )
        .optional()?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;
    attach_images(conn, std::slice::from_mut(&mut message))?;
    Ok(message)
}

/// Author id and status of a message, or 404.
pub(crate) fn message_owner(conn: &Connection, message_id: i64) -> ApiResult<(i64, String)> {
    conn.query_row(
        "SELECT user_id, status FROM messages WHERE id = ?1",
        [message_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("Message not found"))
}

/// Insert a post and its already written images. The filter runs again
/// inside the transaction so a rule added since the first screening still
/// blocks the post.
fn persist_message(
    tx: Transaction<'_>,
    user_id: i64,
    content: &str,
    stored: &[StoredFile],
) -> ApiResult<i64> {
    filter::screen(&tx, content)?;

    let now = models::now_timestamp();
    tx.execute(
        "INSERT INTO messages (user_id, content, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![user_id, content, STATUS_PUBLISHED, now],
    )?;
    let message_id = tx.last_insert_rowid();

    for file in stored {
        tx.execute(
            "INSERT INTO message_images (message_id, file_name, original_name, file_size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![message_id, file.file_name, file.original_name, file.size, now],
        )?;
    }

    tx.commit()?;
    Ok(message_id)
}

/// GET /api/messages: published posts, pinned first then newest.
pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<MessagePage>> {
    let page = query.resolve(10);
    let result = db::blocking(&state.db, move |conn| {
        message_page(conn, MessageScope::Published, page)
    })
    .await?;
    Ok(Json(result))
}

/// GET /api/admin/messages: every post regardless of status.
pub async fn admin_list_messages(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<MessagePage>> {
    session.require_admin()?;
    let page = query.resolve(20);
    let result = db::blocking(&state.db, move |conn| message_page(conn, MessageScope::All, page)).await?;
    Ok(Json(result))
}

/// POST /api/messages: multipart `content` plus repeated `images`.
pub async fn create_message(
    State(state): State<AppState>,
    session: Session,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let mut form = FormData::read(multipart).await?;
    let content = form
        .trimmed("content")
        .ok_or_else(|| ApiError::validation("Message content cannot be empty"))?;
    let images = form.take_files("images");
    if let Some(bad) = images.iter().find(|f| !f.is_allowed()) {
        return Err(ApiError::validation(format!(
            "File type not allowed: {}",
            bad.original_name
        )));
    }

    let upload_dir: PathBuf = state.upload_dir.clone();
    let user_id = session.user_id;

    // Nothing reaches the disk unless the filter passes.
    let screened = content.clone();
    db::blocking(&state.db, move |conn| filter::screen(conn, &screened)).await?;

    let stored = store::save_all(upload_dir.clone(), "message", images).await?;

    let message = db::blocking(&state.db, move |conn| {
        let tx = conn.transaction()?;
        match persist_message(tx, user_id, &content, &stored) {
            Ok(message_id) => load_message(conn, message_id),
            Err(e) => {
                store::remove_all(&upload_dir, &stored);
                Err(e)
            }
        }
    })
    .await?;

    tracing::info!(
        message_id = message.id,
        user_id,
        images = message.images.len(),
        "Board message posted"
    );

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Message posted",
            "data": message,
        })),
    ))
}

/// GET /api/messages/{id}: detail with `user_liked` for the caller.
pub async fn get_message(
    State(state): State<AppState>,
    session: Option<Session>,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<MessageView>> {
    let viewer = session.as_ref().map(|s| (s.user_id, s.is_admin()));

    let message = db::blocking(&state.db, move |conn| {
        let mut message = load_message(conn, message_id)?;
        let is_admin = viewer.is_some_and(|(_, admin)| admin);
        if message.status != STATUS_PUBLISHED && !is_admin {
            return Err(ApiError::not_found("Message not found"));
        }
        message.user_liked = Some(match viewer {
            Some((user_id, _)) => conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM message_likes WHERE user_id = ?1 AND message_id = ?2)",
                params![user_id, message_id],
                |row| row.get(0),
            )?,
            None => false,
        });
        Ok(message)
    })
    .await?;

    Ok(Json(message))
}

/// DELETE /api/messages/{id}: author or admin; removes image files.
pub async fn delete_message(
    State(state): State<AppState>,
    session: Session,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let caller = session.clone();

    let files = db::blocking(&state.db, move |conn| {
        let (author_id, _) = message_owner(conn, message_id)?;
        if author_id != caller.user_id && !caller.is_admin() {
            return Err(ApiError::forbidden("You can only delete your own messages"));
        }

        let tx = conn.transaction()?;
        let files = tx
            .prepare("SELECT file_name FROM message_images WHERE message_id = ?1")?
            .query_map([message_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        tx.execute("DELETE FROM messages WHERE id = ?1", [message_id])?;
        tx.commit()?;
        Ok(files)
    })
    .await?;

    for file in &files {
        store::remove(&state.upload_dir, file);
    }

    tracing::info!(message_id, user_id = session.user_id, "Board message deleted");
    Ok(Json(serde_json::json!({ "message": "Message deleted" })))
}

/// POST /api/messages/{id}/pin: admin toggle.
pub async fn toggle_pin(
    State(state): State<AppState>,
    session: Session,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    let is_pinned: bool = db::blocking(&state.db, move |conn| {
        message_owner(conn, message_id)?;
        conn.execute(
            "UPDATE messages SET is_pinned = NOT is_pinned, updated_at = ?1 WHERE id = ?2",
            params![models::now_timestamp(), message_id],
        )?;
        Ok(conn.query_row(
            "SELECT is_pinned FROM messages WHERE id = ?1",
            [message_id],
            |row| row.get(0),
        )?)
    })
    .await?;

    tracing::info!(message_id, is_pinned, "Board message pin toggled");
    Ok(Json(serde_json::json!({
        "message": if is_pinned { "Message pinned" } else { "Message unpinned" },
        "is_pinned": is_pinned,
    })))
}

/// POST /api/messages/{id}/like: add or remove the caller's like.
pub async fn toggle_like(
    State(state): State<AppState>,
    session: Session,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = session.user_id;

    let (is_liked, like_count): (bool, i64) = db::blocking(&state.db, move |conn| {
        let (_, status) = message_owner(conn, message_id)?;
        if status != STATUS_PUBLISHED {
            return Err(ApiError::not_found("Message not found"));
        }

        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM message_likes WHERE user_id = ?1 AND message_id = ?2",
            params![user_id, message_id],
        )?;
        if removed == 0 {
            tx.execute(
                "INSERT INTO message_likes (user_id, message_id, created_at) VALUES (?1, ?2, ?3)",
                params![user_id, message_id, models::now_timestamp()],
            )?;
        }
        let like_count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM message_likes WHERE message_id = ?1",
            [message_id],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok((removed == 0, like_count))
    })
    .await?;

    Ok(Json(serde_json::json!({
        "message": if is_liked { "Liked" } else { "Like removed" },
        "is_liked": is_liked,
        "like_count": like_count,
    })))
}
