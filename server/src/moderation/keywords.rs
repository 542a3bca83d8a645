use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Session;
use crate::db::{self, models::{self, KeywordRule}};
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateKeywordRequest {
    #[serde(default)]
    pub keyword: String,
}

#[derive(Debug, Serialize)]
pub struct KeywordView {
    pub id: i64,
    pub keyword: String,
    pub is_active: bool,
    pub created_at: String,
}

impl From<&KeywordRule> for KeywordView {
    fn from(rule: &KeywordRule) -> Self {
        KeywordView {
            id: rule.id,
            keyword: rule.keyword.clone(),
            is_active: rule.is_active,
            created_at: models::display_timestamp(&rule.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct KeywordListResponse {
    pub filters: Vec<KeywordView>,
}

fn load_rule(conn: &rusqlite::Connection, rule_id: i64) -> ApiResult<KeywordRule> {
    conn.query_row(
        &format!("SELECT {} FROM keyword_rules WHERE id = ?1", KeywordRule::COLUMNS),
        [rule_id],
        KeywordRule::from_row,
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("Keyword filter not found"))
}

/// GET /api/admin/keyword-filters: all rules, newest first.
pub async fn list_keywords(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<KeywordListResponse>> {
    session.require_admin()?;

    let rules = db::blocking(&state.db, |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM keyword_rules ORDER BY created_at DESC, id DESC",
            KeywordRule::COLUMNS
        ))?;
        let rules = stmt
            .query_map([], KeywordRule::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    })
    .await?;

    Ok(Json(KeywordListResponse {
        filters: rules.iter().map(KeywordView::from).collect(),
    }))
}

/// POST /api/admin/keyword-filters: add an active rule.
pub async fn create_keyword(
    State(state): State<AppState>,
    session: Session,
    ApiJson(req): ApiJson<CreateKeywordRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    session.require_admin()?;

    let keyword = req.keyword.trim().to_string();
    if keyword.is_empty() {
        return Err(ApiError::validation("Keyword cannot be empty"));
    }

    let rule = db::blocking(&state.db, move |conn| {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM keyword_rules WHERE keyword = ?1)",
            [&keyword],
            |row| row.get(0),
        )?;
        if exists {
            return Err(ApiError::validation("Keyword already exists"));
        }

        conn.execute(
            "INSERT INTO keyword_rules (keyword, is_active, created_at) VALUES (?1, 1, ?2)",
            params![keyword, models::now_timestamp()],
        )?;
        load_rule(conn, conn.last_insert_rowid())
    })
    .await?;

    tracing::info!(rule_id = rule.id, keyword = %rule.keyword, admin_id = session.user_id, "Keyword filter added");

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Keyword filter added",
            "filter": KeywordView::from(&rule),
        })),
    ))
}

/// DELETE /api/admin/keyword-filters/{id}
pub async fn delete_keyword(
    State(state): State<AppState>,
    session: Session,
    Path(rule_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    let rule = db::blocking(&state.db, move |conn| {
        let rule = load_rule(conn, rule_id)?;
        conn.execute("DELETE FROM keyword_rules WHERE id = ?1", [rule_id])?;
        Ok(rule)
    })
    .await?;

    tracing::info!(rule_id, keyword = %rule.keyword, admin_id = session.user_id, "Keyword filter deleted");
    Ok(Json(serde_json::json!({ "message": "Keyword filter deleted" })))
}

/// POST /api/admin/keyword-filters/{id}/toggle: flip a rule on or off.
pub async fn toggle_keyword(
    State(state): State<AppState>,
    session: Session,
    Path(rule_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    let rule = db::blocking(&state.db, move |conn| {
        load_rule(conn, rule_id)?;
        conn.execute(
            "UPDATE keyword_rules SET is_active = NOT is_active WHERE id = ?1",
            [rule_id],
        )?;
        load_rule(conn, rule_id)
    })
    .await?;

    let status = if rule.is_active { "enabled" } else { "disabled" };
    tracing::info!(rule_id, keyword = %rule.keyword, status, "Keyword filter toggled");

    Ok(Json(serde_json::json!({
        "message": format!("Keyword filter {}", status),
        "is_active": rule.is_active,
    })))
}
