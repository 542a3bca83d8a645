use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Session;
use crate::board::{messages::message_owner, AuthorSummary};
use crate::db::{self, models};
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::moderation::filter;
use crate::pagination::{PageQuery, PageRequest, Pagination};
use crate::state::AppState;

const PARENT_EXCERPT_CHARS: usize = 50;

const COMMENT_SELECT: &str = "SELECT c.id, c.message_id, c.content, c.created_at, c.parent_id,
        u.id, u.username, u.avatar_url,
        p.id, p.content, pu.username
     FROM message_comments c
     JOIN users u ON u.id = c.user_id
     LEFT JOIN message_comments p ON p.id = c.parent_id
     LEFT JOIN users pu ON pu.id = p.user_id";

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

/// The comment being replied to, shortened.
#[derive(Debug, Serialize)]
pub struct ParentSummary {
    pub id: i64,
    pub content: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct CommentView {
    pub id: i64,
    pub message_id: i64,
    pub content: String,
    pub created_at: String,
    pub parent_id: Option<i64>,
    pub user: AuthorSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentSummary>,
}

#[derive(Debug, Serialize)]
pub struct CommentPage {
    pub comments: Vec<CommentView>,
    pub pagination: Pagination,
}

/// First `max` characters of `text`, with an ellipsis when cut.
fn excerpt(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max).collect();
        cut.push_str("...");
        cut
    }
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<CommentView> {
    let created_at: String = row.get(3)?;
    let parent_id: Option<i64> = row.get(8)?;
    let parent = match parent_id {
        Some(id) => {
            let content: String = row.get(9)?;
            Some(ParentSummary {
                id,
                content: excerpt(&content, PARENT_EXCERPT_CHARS),
                username: row.get(10)?,
            })
        }
        None => None,
    };

    Ok(CommentView {
        id: row.get(0)?,
        message_id: row.get(1)?,
        content: row.get(2)?,
        created_at: models::display_timestamp(&created_at),
        parent_id: row.get(4)?,
        user: AuthorSummary::new(row.get(5)?, row.get(6)?, row.get(7)?),
        parent,
    })
}

/// Which comments a page draws from.
#[derive(Debug, Clone, Copy)]
pub enum CommentScope {
    /// A thread, oldest first.
    Message(i64),
    /// Everything one user wrote, newest first.
    Author(i64),
}

pub fn comment_page(
    conn: &Connection,
    scope: CommentScope,
    page: PageRequest,
) -> ApiResult<CommentPage> {
    let (column, id, order) = match scope {
        CommentScope::Message(id) => ("message_id", id, "ASC"),
        CommentScope::Author(id) => ("user_id", id, "DESC"),
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM message_comments WHERE {} = ?1", column),
        [id],
        |row| row.get(0),
    )?;
    let comments = conn
        .prepare(&format!(
            "{} WHERE c.{} = ?1 ORDER BY c.created_at {}, c.id {} LIMIT ?2 OFFSET ?3",
            COMMENT_SELECT, column, order, order
        ))?
        .query_map(params![id, page.limit(), page.offset()], comment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CommentPage {
        comments,
        pagination: Pagination::new(page, total),
    })
}

fn load_comment(conn: &Connection, comment_id: i64) -> ApiResult<CommentView> {
    conn.query_row(
        &format!("{} WHERE c.id = ?1", COMMENT_SELECT),
        [comment_id],
        comment_from_row,
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("Comment not found"))
}

fn require_published(conn: &Connection, message_id: i64) -> ApiResult<()> {
    let (_, status) = message_owner(conn, message_id)?;
    if status != "published" {
        return Err(ApiError::not_found("Message not found"));
    }
    Ok(())
}

/// GET /api/messages/{id}/comments: a thread, oldest first.
pub async fn list_comments(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<CommentPage>> {
    let page = query.resolve(20);
    let result = db::blocking(&state.db, move |conn| {
        require_published(conn, message_id)?;
        comment_page(conn, CommentScope::Message(message_id), page)
    })
    .await?;
    Ok(Json(result))
}

/// POST /api/messages/{id}/comments: screened by the keyword filter.
/// A `parent_id` must name a comment on the same message.
pub async fn create_comment(
    State(state): State<AppState>,
    session: Session,
    Path(message_id): Path<i64>,
    ApiJson(req): ApiJson<CreateCommentRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::validation("Comment content cannot be empty"));
    }
    let parent_id = req.parent_id;
    let user_id = session.user_id;

    let comment = db::blocking(&state.db, move |conn| {
        let tx = conn.transaction()?;
        require_published(&tx, message_id)?;
        filter::screen(&tx, &content)?;

        if let Some(parent_id) = parent_id {
            let parent_message: Option<i64> = tx
                .query_row(
                    "SELECT message_id FROM message_comments WHERE id = ?1",
                    [parent_id],
                    |row| row.get(0),
                )
                .optional()?;
            if parent_message != Some(message_id) {
                return Err(ApiError::validation("Parent comment not found"));
            }
        }

        let now = models::now_timestamp();
        tx.execute(
            "INSERT INTO message_comments (message_id, user_id, parent_id, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![message_id, user_id, parent_id, content, now],
        )?;
        let comment = load_comment(&tx, tx.last_insert_rowid())?;
        tx.commit()?;
        Ok(comment)
    })
    .await?;

    tracing::info!(comment_id = comment.id, message_id, user_id, "Board comment posted");

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Comment posted",
            "comment": comment,
        })),
    ))
}

/// DELETE /api/messages/{id}/comments/{comment_id}: author or admin.
/// Replies keep their text and lose the parent link.
pub async fn delete_comment(
    State(state): State<AppState>,
    session: Session,
    Path((message_id, comment_id)): Path<(i64, i64)>,
) -> ApiResult<Json<serde_json::Value>> {
    let caller = session.clone();

    db::blocking(&state.db, move |conn| {
        let owner: Option<(i64, i64)> = conn
            .query_row(
                "SELECT message_id, user_id FROM message_comments WHERE id = ?1",
                [comment_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let author_id = match owner {
            Some((msg, author)) if msg == message_id => author,
            _ => return Err(ApiError::not_found("Comment not found")),
        };
        if author_id != caller.user_id && !caller.is_admin() {
            return Err(ApiError::forbidden("You can only delete your own comments"));
        }
        conn.execute("DELETE FROM message_comments WHERE id = ?1", [comment_id])?;
        Ok(())
    })
    .await?;

    tracing::info!(comment_id, message_id, user_id = session.user_id, "Board comment deleted");
    Ok(Json(serde_json::json!({ "message": "Comment deleted" })))
}
