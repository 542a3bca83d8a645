use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::admin::{backup, users as admin_users};
use crate::auth::accounts;
use crate::board::{comments, messages};
use crate::capsules::routes as capsules;
use crate::db;
use crate::moderation::keywords;
use crate::state::AppState;
use crate::timeline::entries;
use crate::uploads::routes as uploads;
use crate::users::profile;

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on login/register: one token every 6 seconds per IP,
    // burst from config. PeerIpKeyExtractor reads ConnectInfo<SocketAddr>.
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(6)
            .burst_size(state.auth_burst.max(1))
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let auth_routes = Router::new()
        .route("/api/register", post(accounts::register))
        .route("/api/login", post(accounts::login))
        .layer(GovernorLayer::new(governor_config));

    let session_routes = Router::new()
        .route("/api/logout", post(accounts::logout))
        .route("/api/login-status", get(accounts::login_status));

    let capsule_routes = Router::new()
        .route(
            "/api/time-capsules",
            get(capsules::list_capsules).post(capsules::create_capsule),
        )
        .route(
            "/api/time-capsules/{id}",
            get(capsules::get_capsule).delete(capsules::delete_capsule),
        )
        .route("/api/time-capsules/{id}/unlock", post(capsules::unlock_capsule))
        .route("/api/time-capsules/{id}/media", get(capsules::capsule_media))
        .route("/api/time-capsules/{id}/password", put(capsules::reset_answer))
        .route("/api/time-capsules/{id}/answer", put(capsules::reset_answer));

    let profile_routes = Router::new()
        .route(
            "/api/user/profile",
            get(profile::get_profile).put(profile::update_profile),
        )
        .route("/api/user/password", put(profile::change_password))
        .route("/api/user/avatar", post(profile::upload_avatar))
        .route("/api/user/stats", get(profile::user_stats))
        .route("/api/user/messages", get(profile::my_messages))
        .route("/api/user/comments", get(profile::my_comments))
        .route("/api/avatar/default/{letter}", get(profile::default_avatar));

    let timeline_routes = Router::new()
        .route(
            "/api/timeline",
            get(entries::list_entries).post(entries::create_entry),
        )
        .route("/api/timeline/{id}", delete(entries::delete_entry))
        .route("/api/timeline/{id}/like", post(entries::like_entry))
        .route(
            "/api/timeline/{id}/comments",
            get(entries::list_entry_comments).post(entries::add_entry_comment),
        );

    let board_routes = Router::new()
        .route(
            "/api/messages",
            get(messages::list_messages).post(messages::create_message),
        )
        .route(
            "/api/messages/{id}",
            get(messages::get_message).delete(messages::delete_message),
        )
        .route("/api/messages/{id}/pin", post(messages::toggle_pin))
        .route("/api/messages/{id}/like", post(messages::toggle_like))
        .route(
            "/api/messages/{id}/comments",
            get(comments::list_comments).post(comments::create_comment),
        )
        .route(
            "/api/messages/{id}/comments/{comment_id}",
            delete(comments::delete_comment),
        );

    // Admin routes (Session extractor + require_admin in each handler).
    // Note: /api/admin/users/count and /batch are static segments and win over /{id}.
    let admin_routes = Router::new()
        .route("/api/admin/messages", get(messages::admin_list_messages))
        .route(
            "/api/admin/keyword-filters",
            get(keywords::list_keywords).post(keywords::create_keyword),
        )
        .route("/api/admin/keyword-filters/{id}", delete(keywords::delete_keyword))
        .route(
            "/api/admin/keyword-filters/{id}/toggle",
            post(keywords::toggle_keyword),
        )
        .route("/api/admin/users/count", get(admin_users::count_users))
        .route("/api/admin/users/batch", post(admin_users::batch_users))
        .route("/api/admin/users", get(admin_users::list_users))
        .route(
            "/api/admin/users/{id}",
            get(admin_users::get_user)
                .put(admin_users::update_user)
                .delete(admin_users::delete_user),
        )
        .route(
            "/api/admin/users/{id}/toggle-status",
            post(admin_users::toggle_user_status),
        )
        .route("/api/admin/backup", post(backup::create_backup))
        .route("/api/admin/backups", get(backup::list_backups))
        .route(
            "/api/admin/backups/{filename}/download",
            get(backup::download_backup),
        )
        .route("/api/admin/backups/{id}", delete(backup::delete_backup))
        .route("/api/admin/restore", post(backup::restore_backup));

    let public_routes = Router::new()
        .route("/uploads/{name}", get(uploads::serve_upload))
        .route("/health", get(health_check))
        .route("/api/health", get(health_check));

    Router::new()
        .merge(auth_routes)
        .merge(session_routes)
        .merge(capsule_routes)
        .merge(profile_routes)
        .merge(timeline_routes)
        .merge(board_routes)
        .merge(admin_routes)
        .merge(public_routes)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .with_state(state)
}

/// GET /health: reports whether the database answers.
async fn health_check(State(state): State<AppState>) -> Response {
    let db_check = db::blocking(&state.db, |conn| {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    })
    .await;

    match db_check {
        Ok(()) => Json(serde_json::json!({
            "status": "healthy",
            "message": "Timeline server is running",
            "version": env!("CARGO_PKG_VERSION"),
        }))
        .into_response(),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "status": "unhealthy",
                    "message": "Database unavailable",
                    "version": env!("CARGO_PKG_VERSION"),
                })),
            )
                .into_response()
        }
    }
}
