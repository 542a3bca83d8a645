use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use rusqlite::OptionalExtension;

use crate::auth::session;
use crate::db::{self, models::User};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Request-scoped authentication context, resolved once at the boundary.
///
/// The token proves who the caller is; the role is re-read from the users
/// table so demotions and deactivations apply to live sessions.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: i64,
    pub username: String,
    pub role: String,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == db::models::ROLE_ADMIN
    }

    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Admin privileges required"))
        }
    }
}

fn invalid_session() -> ApiError {
    ApiError::Unauthorized("Session expired or invalid, please sign in again".to_string())
}

async fn resolve_session(state: &AppState, token: &str) -> ApiResult<Session> {
    let claims = session::validate_session_token(&state.session_secret, token)
        .map_err(|_| invalid_session())?;
    let user_id: i64 = claims.sub.parse().map_err(|_| invalid_session())?;

    let user = db::blocking(&state.db, move |conn| {
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", User::COLUMNS),
                [user_id],
                User::from_row,
            )
            .optional()?;
        Ok(user)
    })
    .await?;

    match user {
        Some(user) if user.is_active => Ok(Session {
            user_id: user.id,
            username: user.username,
            role: user.role,
        }),
        _ => Err(invalid_session()),
    }
}

impl FromRequestParts<AppState> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session::token_from_headers(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("Please sign in first".to_string()))?;
        resolve_session(state, &token).await
    }
}

/// `Option<Session>` for routes that behave differently for signed-in callers
/// but stay public. Invalid or stale tokens read as anonymous.
impl OptionalFromRequestParts<AppState> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Option<Self>, Self::Rejection> {
        let Some(token) = session::token_from_headers(&parts.headers) else {
            return Ok(None);
        };
        match resolve_session(state, &token).await {
            Ok(session) => Ok(Some(session)),
            Err(ApiError::Unauthorized(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
