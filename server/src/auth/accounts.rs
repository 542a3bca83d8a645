use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::admin::setup;
use crate::auth::middleware::Session;
use crate::auth::{password, session};
use crate::db::{self, models};
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    /// Setup token printed at first boot; its holder becomes admin
    #[serde(default)]
    pub setup_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub avatar_url: String,
}

impl From<&models::User> for AccountSummary {
    fn from(user: &models::User) -> Self {
        AccountSummary {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            avatar_url: user.avatar(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub message: String,
    pub user: AccountSummary,
}

#[derive(Debug, Serialize)]
pub struct LoginStatus {
    pub is_logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AccountSummary>,
}

fn issue_cookie(state: &AppState, user: &models::User) -> ApiResult<String> {
    let token = session::issue_session_token(
        &state.session_secret,
        user.id,
        &user.username,
        &user.role,
        state.session_ttl_hours,
    )
    .map_err(|e| ApiError::internal(format!("Session token: {}", e)))?;
    Ok(session::session_cookie(&token, state.session_ttl_hours, state.secure_cookies))
}

pub(crate) fn load_user(conn: &rusqlite::Connection, user_id: i64) -> ApiResult<models::User> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", models::User::COLUMNS),
        [user_id],
        models::User::from_row,
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("User not found"))
}

/// POST /api/register: create an account and sign it in.
/// Every account starts as `user` unless it presents the setup token.
pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_string();
    if username.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation(
            "Username, email and password are required",
        ));
    }

    let password = req.password;
    let setup_token = req.setup_token;

    let user = db::blocking(&state.db, move |conn| {
        let password_hash = password::hash_password(&password)?;
        let tx = conn.transaction()?;

        let name_taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
            [&username],
            |row| row.get(0),
        )?;
        if name_taken {
            return Err(ApiError::validation("Username already exists"));
        }

        let email_taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
            [&email],
            |row| row.get(0),
        )?;
        if email_taken {
            return Err(ApiError::validation("Email already exists"));
        }

        let is_admin = match setup_token.as_deref() {
            Some(token) if setup::setup_token_matches(&tx, token)? => {
                setup::consume_setup_token(&tx)?;
                true
            }
            _ => false,
        };
        let role = if is_admin {
            models::ROLE_ADMIN
        } else {
            models::ROLE_USER
        };

        let now = models::now_timestamp();
        tx.execute(
            "INSERT INTO users (username, email, password_hash, role, created_at, updated_at, last_login, login_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5, 1)",
            params![username, email, password_hash, role, now],
        )?;
        let user = load_user(&tx, tx.last_insert_rowid())?;
        tx.commit()?;
        Ok(user)
    })
    .await?;

    if user.is_admin() {
        tracing::info!(user_id = user.id, "Administrator account claimed with setup token");
    } else {
        tracing::info!(user_id = user.id, username = %user.username, "User registered");
    }

    let cookie = issue_cookie(&state, &user)?;
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AccountResponse {
            message: "Registration successful".to_string(),
            user: AccountSummary::from(&user),
        }),
    ))
}

/// POST /api/login: verify credentials and establish a session.
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let username = req.username.trim().to_string();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("Username and password are required"));
    }
    let password = req.password;

    let user = db::blocking(&state.db, move |conn| {
        let found: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, password_hash FROM users WHERE username = ?1",
                [&username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let user_id = match found {
            Some((id, hash)) if password::verify_password(&password, &hash) => id,
            _ => {
                return Err(ApiError::Unauthorized(
                    "Invalid username or password".to_string(),
                ))
            }
        };

        let user = load_user(conn, user_id)?;
        if !user.is_active {
            return Err(ApiError::forbidden("Account has been disabled"));
        }

        conn.execute(
            "UPDATE users SET last_login = ?1, login_count = login_count + 1 WHERE id = ?2",
            params![models::now_timestamp(), user_id],
        )?;
        load_user(conn, user_id)
    })
    .await?;

    tracing::info!(user_id = user.id, "User signed in");

    let cookie = issue_cookie(&state, &user)?;
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(AccountResponse {
            message: "Login successful".to_string(),
            user: AccountSummary::from(&user),
        }),
    ))
}

/// POST /api/logout: expire the session cookie.
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::SET_COOKIE, session::clear_session_cookie(state.secure_cookies))],
        Json(serde_json::json!({ "message": "Logged out" })),
    )
}

/// GET /api/login-status
pub async fn login_status(
    State(state): State<AppState>,
    session: Option<Session>,
) -> ApiResult<Json<LoginStatus>> {
    let Some(session) = session else {
        return Ok(Json(LoginStatus {
            is_logged_in: false,
            user: None,
        }));
    };

    let user = db::blocking(&state.db, move |conn| load_user(conn, session.user_id)).await?;
    Ok(Json(LoginStatus {
        is_logged_in: true,
        user: Some(AccountSummary::from(&user)),
    }))
}
