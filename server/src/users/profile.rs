use axum::{
    extract::{Multipart, Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::auth::{accounts::load_user, middleware::Session, password};
use crate::board::{comments::{self, CommentPage, CommentScope}, messages::{self, MessagePage, MessageScope}};
use crate::db::{self, models};
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::pagination::PageQuery;
use crate::state::AppState;
use crate::uploads::{form::FormData, store};

const AVATAR_COLOURS: &[&str] = &[
    "#1abc9c", "#3498db", "#9b59b6", "#e67e22", "#e74c3c", "#2ecc71", "#34495e", "#f39c12",
];

#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub bio: Option<String>,
    pub avatar_url: String,
    pub is_active: bool,
    pub created_at: String,
    pub last_login: Option<String>,
    pub login_count: i64,
}

impl From<&models::User> for ProfileView {
    fn from(user: &models::User) -> Self {
        ProfileView {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            bio: user.bio.clone(),
            avatar_url: user.avatar(),
            is_active: user.is_active,
            created_at: models::display_timestamp(&user.created_at),
            last_login: user.last_login.as_deref().map(models::display_timestamp),
            login_count: user.login_count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct UserStats {
    pub message_count: i64,
    pub likes_received: i64,
    pub comment_count: i64,
}

/// GET /api/user/profile
pub async fn get_profile(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<serde_json::Value>> {
    let user = db::blocking(&state.db, move |conn| load_user(conn, session.user_id)).await?;
    Ok(Json(serde_json::json!({ "user": ProfileView::from(&user) })))
}

/// PUT /api/user/profile: username and email stay unique.
pub async fn update_profile(
    State(state): State<AppState>,
    session: Session,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = session.user_id;

    let user = db::blocking(&state.db, move |conn| {
        let tx = conn.transaction()?;
        let current = load_user(&tx, user_id)?;

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
                name.to_string()
            }
            _ => current.username.clone(),
        };

        let email = match req.email.as_deref().map(str::trim) {
            Some("") => None,
            Some(email) => {
                let taken: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 AND id != ?2)",
                    params![email, user_id],
                    |row| row.get(0),
                )?;
                if taken {
                    return Err(ApiError::validation("Email already exists"));
                }
                Some(email.to_string())
            }
            None => current.email.clone(),
        };

        let bio = req.bio.or(current.bio);

        tx.execute(
            "UPDATE users SET username = ?1, email = ?2, bio = ?3, updated_at = ?4 WHERE id = ?5",
            params![username, email, bio, models::now_timestamp(), user_id],
        )?;
        let user = load_user(&tx, user_id)?;
        tx.commit()?;
        Ok(user)
    })
    .await?;

    tracing::info!(user_id, "Profile updated");
    Ok(Json(serde_json::json!({
        "message": "Profile updated",
        "user": ProfileView::from(&user),
    })))
}

/// PUT /api/user/password: the current password must verify first.
pub async fn change_password(
    State(state): State<AppState>,
    session: Session,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if req.current_password.is_empty() || req.new_password.is_empty() {
        return Err(ApiError::validation(
            "Current and new password are required",
        ));
    }
    let user_id = session.user_id;

    db::blocking(&state.db, move |conn| {
        let stored: String = conn.query_row(
            "SELECT password_hash FROM users WHERE id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        if !password::verify_password(&req.current_password, &stored) {
            return Err(ApiError::validation("Current password is incorrect"));
        }
        let new_hash = password::hash_password(&req.new_password)?;
        conn.execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_hash, models::now_timestamp(), user_id],
        )?;
        Ok(())
    })
    .await?;

    tracing::info!(user_id, "Password changed");
    Ok(Json(serde_json::json!({ "message": "Password updated" })))
}

/// POST /api/user/avatar: multipart `avatar`, images only. The previous
/// uploaded avatar is deleted.
pub async fn upload_avatar(
    State(state): State<AppState>,
    session: Session,
    multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let mut form = FormData::read(multipart).await?;
    let avatar = form
        .take_file("avatar")
        .ok_or_else(|| ApiError::validation("No avatar file provided"))?;
    let is_image = avatar
        .extension()
        .is_some_and(|ext| store::media_type_for(&ext) == "image");
    if !is_image || !avatar.is_allowed() {
        return Err(ApiError::validation("Avatar must be a png, jpg, jpeg or gif image"));
    }

    let user_id = session.user_id;
    let upload_dir = state.upload_dir.clone();

    let stored = store::save_one(upload_dir.clone(), format!("avatar_{}", user_id), avatar).await?;
    let avatar_url = store::public_url(&stored.file_name);

    let new_url = avatar_url.clone();
    let previous = db::blocking(&state.db, move |conn| {
        let updated = (|| -> ApiResult<Option<String>> {
            let previous: Option<String> = conn.query_row(
                "SELECT avatar_url FROM users WHERE id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            conn.execute(
                "UPDATE users SET avatar_url = ?1, updated_at = ?2 WHERE id = ?3",
                params![new_url, models::now_timestamp(), user_id],
            )?;
            Ok(previous)
        })();
        if updated.is_err() {
            store::remove(&upload_dir, &stored.file_name);
        }
        updated
    })
    .await?;

    if let Some(old) = previous.as_deref().and_then(|url| url.strip_prefix("/uploads/")) {
        store::remove(&state.upload_dir, old);
    }

    tracing::info!(user_id, "Avatar updated");
    Ok(Json(serde_json::json!({
        "message": "Avatar updated",
        "avatar_url": avatar_url,
    })))
}

/// Letter shown on a generated avatar: the first character upper-cased, or
/// `U` when it is not a letter.
fn avatar_letter(raw: &str) -> char {
    match raw.chars().next() {
        Some(c) if c.is_alphabetic() => c.to_uppercase().next().unwrap_or(c),
        _ => 'U',
    }
}

fn default_avatar_svg(letter: char) -> String {
    let colour = AVATAR_COLOURS[letter as usize % AVATAR_COLOURS.len()];
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100" viewBox="0 0 100 100"><rect width="100" height="100" fill="{}"/><text x="50" y="50" font-family="Arial, sans-serif" font-size="48" fill="#ffffff" text-anchor="middle" dominant-baseline="central">{}</text></svg>"##,
        colour, letter
    )
}

/// GET /api/avatar/default/{letter}
pub async fn default_avatar(Path(letter): Path<String>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "image/svg+xml"),
            (header::CACHE_CONTROL, "public, max-age=86400"),
        ],
        default_avatar_svg(avatar_letter(&letter)),
    )
}

/// GET /api/user/stats
pub async fn user_stats(
    State(state): State<AppState>,
    session: Session,
) -> ApiResult<Json<UserStats>> {
    let user_id = session.user_id;
    let stats = db::blocking(&state.db, move |conn| {
        Ok(conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM messages WHERE user_id = ?1),
                (SELECT COUNT(*) FROM message_likes l JOIN messages m ON m.id = l.message_id
                    WHERE m.user_id = ?1),
                (SELECT COUNT(*) FROM message_comments WHERE user_id = ?1)",
            [user_id],
            |row| {
                Ok(UserStats {
                    message_count: row.get(0)?,
                    likes_received: row.get(1)?,
                    comment_count: row.get(2)?,
                })
            },
        )?)
    })
    .await?;
    Ok(Json(stats))
}

/// GET /api/user/messages: the caller's posts.
pub async fn my_messages(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<MessagePage>> {
    let page = query.resolve(10);
    let scope = MessageScope::Author(session.user_id);
    let result = db::blocking(&state.db, move |conn| messages::message_page(conn, scope, page)).await?;
    Ok(Json(result))
}

/// GET /api/user/comments: the caller's comments, newest first.
pub async fn my_comments(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<CommentPage>> {
    let page = query.resolve(10);
    let scope = CommentScope::Author(session.user_id);
    let result = db::blocking(&state.db, move |conn| comments::comment_page(conn, scope, page)).await?;
    Ok(Json(result))
}
