use std::net::SocketAddr;
use std::path::Path as FsPath;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    Json,
};
use rusqlite::{params, params_from_iter, types::Value, Connection};
use serde::{Deserialize, Serialize};

use crate::auth::{accounts::load_user, middleware::Session};
use crate::db::{self, models::{self, User}};
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::pagination::{PageQuery, Pagination};
use crate::state::AppState;
use crate::uploads::store;

const ACTIVITY_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub search: Option<String>,
    pub role: Option<String>,
    /// `active` or `inactive`
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdminUpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub user_ids: Vec<i64>,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct UserContentStats {
    pub message_count: i64,
    pub comment_count: i64,
    pub likes_received: i64,
}

#[derive(Debug, Serialize)]
pub struct AdminUserView {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub bio: Option<String>,
    pub avatar_url: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub last_login: Option<String>,
    pub login_count: i64,
    pub stats: UserContentStats,
}

#[derive(Debug, Serialize)]
pub struct ActivityView {
    pub id: i64,
    pub action_type: String,
    pub description: String,
    pub ip_address: Option<String>,
    pub created_at: String,
}

fn content_stats(conn: &Connection, user_id: i64) -> rusqlite::Result<UserContentStats> {
    conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM messages WHERE user_id = ?1),
            (SELECT COUNT(*) FROM message_comments WHERE user_id = ?1),
            (SELECT COUNT(*) FROM message_likes l JOIN messages m ON m.id = l.message_id
                WHERE m.user_id = ?1)",
        [user_id],
        |row| {
            Ok(UserContentStats {
                message_count: row.get(0)?,
                comment_count: row.get(1)?,
                likes_received: row.get(2)?,
            })
        },
    )
}

fn admin_view(conn: &Connection, user: &User) -> rusqlite::Result<AdminUserView> {
    Ok(AdminUserView {
        id: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
        role: user.role.clone(),
        bio: user.bio.clone(),
        avatar_url: user.avatar(),
        is_active: user.is_active,
        created_at: models::display_timestamp(&user.created_at),
        updated_at: models::display_timestamp(&user.updated_at),
        last_login: user.last_login.as_deref().map(models::display_timestamp),
        login_count: user.login_count,
        stats: content_stats(conn, user.id)?,
    })
}

/// Append an entry to a user's activity log.
pub fn log_activity(
    conn: &Connection,
    user_id: i64,
    action_type: &str,
    description: &str,
    ip_address: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO user_activities (user_id, action_type, description, ip_address, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, action_type, description, ip_address, models::now_timestamp()],
    )?;
    Ok(())
}

/// Stored files owned by a user: board images and an uploaded avatar.
fn owned_files(conn: &Connection, user: &User) -> rusqlite::Result<Vec<String>> {
    let mut files = conn
        .prepare(
            "SELECT i.file_name FROM message_images i
             JOIN messages m ON m.id = i.message_id WHERE m.user_id = ?1",
        )?
        .query_map([user.id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(avatar) = user
        .avatar_url
        .as_deref()
        .and_then(|url| url.strip_prefix("/uploads/"))
    {
        files.push(avatar.to_string());
    }
    Ok(files)
}

fn remove_files(upload_dir: &FsPath, files: &[String]) {
    for file in files {
        store::remove(upload_dir, file);
    }
}

/// GET /api/admin/users/count
pub async fn count_users(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    let (total, active, admins): (i64, i64, i64) = db::blocking(&state.db, |conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN is_active = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN role = 'admin' THEN 1 ELSE 0 END), 0)
             FROM users",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?)
    })
    .await?;

    Ok(Json(serde_json::json!({
        "total": total,
        "active": active,
        "inactive": total - active,
        "admins": admins,
    })))
}

/// GET /api/admin/users: filtered, paginated user list with content stats.
pub async fn list_users(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<UserListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    let page = PageQuery {
        page: query.page,
        per_page: query.per_page,
    }
    .resolve(20);

    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push("(username LIKE ? OR email LIKE ?)");
        let pattern = format!("%{}%", search);
        values.push(Value::Text(pattern.clone()));
        values.push(Value::Text(pattern));
    }
    if let Some(role) = query.role.as_deref().filter(|r| !r.is_empty()) {
        clauses.push("role = ?");
        values.push(Value::Text(role.to_string()));
    }
    match query.status.as_deref() {
        Some("active") => clauses.push("is_active = 1"),
        Some("inactive") => clauses.push("is_active = 0"),
        _ => {}
    }
    let filter = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let (users, total) = db::blocking(&state.db, move |conn| {
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM users {}", filter),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        let users = conn
            .prepare(&format!(
                "SELECT {} FROM users {} ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
                User::COLUMNS,
                filter,
                page.limit(),
                page.offset()
            ))?
            .query_map(params_from_iter(values.iter()), User::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let views = users
            .iter()
            .map(|u| admin_view(conn, u))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((views, total))
    })
    .await?;

    Ok(Json(serde_json::json!({
        "users": users,
        "pagination": Pagination::new(page, total),
    })))
}

/// GET /api/admin/users/{id}: profile, stats and the latest activity.
pub async fn get_user(
    State(state): State<AppState>,
    session: Session,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    let (user, activities) = db::blocking(&state.db, move |conn| {
        let user = load_user(conn, user_id)?;
        let view = admin_view(conn, &user)?;
        let activities = conn
            .prepare(
                "SELECT id, action_type, description, ip_address, created_at FROM user_activities
                 WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?
            .query_map(params![user_id, ACTIVITY_LIMIT], |row| {
                let created_at: String = row.get(4)?;
                Ok(ActivityView {
                    id: row.get(0)?,
                    action_type: row.get(1)?,
                    description: row.get(2)?,
                    ip_address: row.get(3)?,
                    created_at: models::display_timestamp(&created_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((view, activities))
    })
    .await?;

    Ok(Json(serde_json::json!({
        "user": user,
        "activities": activities,
    })))
}

/// PUT /api/admin/users/{id}
pub async fn update_user(
    State(state): State<AppState>,
    session: Session,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(user_id): Path<i64>,
    ApiJson(req): ApiJson<AdminUpdateUserRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    if let Some(role) = req.role.as_deref() {
        if role != models::ROLE_USER && role != models::ROLE_ADMIN {
            return Err(ApiError::validation("Role must be 'user' or 'admin'"));
        }
    }
    let admin_name = session.username.clone();
    let ip = addr.ip().to_string();

    let user = db::blocking(&state.db, move |conn| {
        let tx = conn.transaction()?;
        let current = load_user(&tx, user_id)?;
        let mut changes: Vec<String> = Vec::new();

        let username = match req.username.as_deref().map(str::trim) {
            Some("") => return Err(ApiError::validation("Username cannot be empty")),
            Some(name) if name != current.username => {
                let taken: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1 AND id != ?2)",
                    params![name, user_id],
                    |row| row.get(0),
                )?;
                if taken {
                    return Err(ApiError::validation("Username already exists"));
                }
                changes.push(format!("username {} -> {}", current.username, name));
                name.to_string()
            }
            _ => current.username.clone(),
        };

        let email = match req.email.as_deref().map(str::trim) {
            Some("") => None,
            Some(email) if Some(email) != current.email.as_deref() => {
                let taken: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 AND id != ?2)",
                    params![email, user_id],
                    |row| row.get(0),
                )?;
                if taken {
                    return Err(ApiError::validation("Email already exists"));
                }
                changes.push("email".to_string());
                Some(email.to_string())
            }
            _ => current.email.clone(),
        };

        let role = match req.role {
            Some(role) if role != current.role => {
                changes.push(format!("role {} -> {}", current.role, role));
                role
            }
            _ => current.role.clone(),
        };
        let is_active = match req.is_active {
            Some(active) if active != current.is_active => {
                changes.push(if active { "activated" } else { "deactivated" }.to_string());
                active
            }
            _ => current.is_active,
        };
        let bio = req.bio.or_else(|| current.bio.clone());
        let avatar_url = req.avatar_url.or_else(|| current.avatar_url.clone());

        tx.execute(
            "UPDATE users SET username = ?1, email = ?2, role = ?3, is_active = ?4, bio = ?5,
                avatar_url = ?6, updated_at = ?7
             WHERE id = ?8",
            params![username, email, role, is_active, bio, avatar_url, models::now_timestamp(), user_id],
        )?;

        let description = if changes.is_empty() {
            format!("Profile edited by administrator {}", admin_name)
        } else {
            format!("Administrator {} changed: {}", admin_name, changes.join(", "))
        };
        log_activity(&tx, user_id, "admin_update", &description, Some(&ip))?;

        let user = load_user(&tx, user_id)?;
        let view = admin_view(&tx, &user)?;
        tx.commit()?;
        Ok(view)
    })
    .await?;

    tracing::info!(user_id, admin_id = session.user_id, "User updated by admin");
    Ok(Json(serde_json::json!({
        "message": "User updated",
        "user": user,
    })))
}

/// POST /api/admin/users/{id}/toggle-status: administrators cannot be deactivated.
pub async fn toggle_user_status(
    State(state): State<AppState>,
    session: Session,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;
    let admin_name = session.username.clone();
    let ip = addr.ip().to_string();

    let is_active = db::blocking(&state.db, move |conn| {
        let tx = conn.transaction()?;
        let user = load_user(&tx, user_id)?;
        if user.is_admin() {
            return Err(ApiError::validation("Administrator accounts cannot be deactivated"));
        }
        let is_active = !user.is_active;
        tx.execute(
            "UPDATE users SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![is_active, models::now_timestamp(), user_id],
        )?;
        let verb = if is_active { "activated" } else { "deactivated" };
        log_activity(
            &tx,
            user_id,
            "status_change",
            &format!("Account {} by administrator {}", verb, admin_name),
            Some(&ip),
        )?;
        tx.commit()?;
        Ok(is_active)
    })
    .await?;

    tracing::info!(user_id, is_active, admin_id = session.user_id, "User status toggled");
    Ok(Json(serde_json::json!({
        "message": if is_active { "User activated" } else { "User deactivated" },
        "is_active": is_active,
    })))
}

/// DELETE /api/admin/users/{id}: removes the account and everything it posted.
pub async fn delete_user(
    State(state): State<AppState>,
    session: Session,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    let (username, files) = db::blocking(&state.db, move |conn| {
        let user = load_user(conn, user_id)?;
        if user.is_admin() {
            return Err(ApiError::validation("Administrator accounts cannot be deleted"));
        }
        let files = owned_files(conn, &user)?;
        conn.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
        Ok((user.username, files))
    })
    .await?;

    remove_files(&state.upload_dir, &files);

    tracing::info!(user_id, username = %username, admin_id = session.user_id, "User deleted");
    Ok(Json(serde_json::json!({
        "message": format!("User {} deleted", username),
    })))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchAction {
    Activate,
    Deactivate,
    Delete,
}

impl BatchAction {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "activate" => Some(BatchAction::Activate),
            "deactivate" => Some(BatchAction::Deactivate),
            "delete" => Some(BatchAction::Delete),
            _ => None,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            BatchAction::Activate => "activate",
            BatchAction::Deactivate => "deactivate",
            BatchAction::Delete => "delete",
        }
    }
}

/// POST /api/admin/users/batch: apply one action to many users.
/// Administrators are skipped and reported in `errors`.
pub async fn batch_users(
    State(state): State<AppState>,
    session: Session,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ApiJson(req): ApiJson<BatchRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    let action = BatchAction::parse(&req.action)
        .ok_or_else(|| ApiError::validation("Action must be activate, deactivate or delete"))?;
    if req.user_ids.is_empty() {
        return Err(ApiError::validation("No users selected"));
    }
    let admin_name = session.username.clone();
    let ip = addr.ip().to_string();
    let user_ids = req.user_ids;

    let (processed, errors, files) = db::blocking(&state.db, move |conn| {
        let tx = conn.transaction()?;
        let mut users = Vec::new();
        for id in &user_ids {
            match load_user(&tx, *id) {
                Ok(user) => users.push(user),
                Err(ApiError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if users.is_empty() {
            return Err(ApiError::not_found("No matching users found"));
        }

        let mut processed = 0usize;
        let mut errors = Vec::new();
        let mut files = Vec::new();
        for user in &users {
            if user.is_admin() {
                errors.push(format!(
                    "Cannot {} administrator {}",
                    action.verb(),
                    user.username
                ));
                continue;
            }
            match action {
                BatchAction::Activate | BatchAction::Deactivate => {
                    let active = action == BatchAction::Activate;
                    tx.execute(
                        "UPDATE users SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
                        params![active, models::now_timestamp(), user.id],
                    )?;
                    log_activity(
                        &tx,
                        user.id,
                        "status_change",
                        &format!("Account {}d in bulk by administrator {}", action.verb(), admin_name),
                        Some(&ip),
                    )?;
                }
                BatchAction::Delete => {
                    files.extend(owned_files(&tx, user)?);
                    tx.execute("DELETE FROM users WHERE id = ?1", [user.id])?;
                }
            }
            processed += 1;
        }
        tx.commit()?;
        Ok((processed, errors, files))
    })
    .await?;

    remove_files(&state.upload_dir, &files);

    tracing::info!(
        action = action.verb(),
        processed,
        skipped = errors.len(),
        admin_id = session.user_id,
        "Batch user operation"
    );

    Ok(Json(serde_json::json!({
        "message": format!("{} user(s) processed", processed),
        "success_count": processed,
        "errors": errors,
    })))
}
