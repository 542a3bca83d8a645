use axum::{
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Session;
use crate::capsules::protocol::{self, AttemptOutcome, CapsuleState};
use crate::db::{self, models::{self, Capsule}};
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::state::AppState;
use crate::uploads::{form::{FormData, UploadedFile}, routes::file_response, store};

#[derive(Debug, Default, Deserialize)]
pub struct CapsuleDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub unlock_date: String,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    #[serde(default)]
    pub answer: String,
}

/// Public view of a capsule. Content and media fields stay absent until the
/// capsule is unlocked.
#[derive(Debug, Serialize)]
pub struct CapsuleView {
    pub id: i64,
    pub title: String,
    pub question: String,
    pub created_at: String,
    pub unlock_date: String,
    pub can_unlock: bool,
    pub remaining_time: i64,
    pub is_unlocked: bool,
    pub unlock_attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl CapsuleView {
    fn new(capsule: &Capsule, now: DateTime<Utc>) -> Self {
        let state = CapsuleState::of(capsule, now);
        let remaining_time = match state {
            CapsuleState::Pending { remaining_secs } => remaining_secs,
            _ => 0,
        };

        let mut view = CapsuleView {
            id: capsule.id,
            title: capsule.title.clone(),
            question: capsule.question.clone(),
            created_at: models::display_timestamp(&capsule.created_at),
            unlock_date: capsule.unlock_date.format("%Y-%m-%d %H:%M:%S").to_string(),
            can_unlock: state.accepts_attempts(),
            remaining_time,
            is_unlocked: capsule.is_unlocked,
            unlock_attempts: capsule.unlock_attempts,
            content: None,
            media_type: None,
            media_url: None,
        };

        if state == CapsuleState::Unlocked {
            view.content = Some(capsule.content.clone().unwrap_or_default());
            if capsule.media_path.is_some() {
                view.media_type = capsule.media_type.clone();
                view.media_url = Some(format!("/api/time-capsules/{}/media", capsule.id));
            }
        }
        view
    }
}

fn load_capsule(conn: &Connection, capsule_id: i64) -> ApiResult<Capsule> {
    conn.query_row(
        &format!("SELECT {} FROM capsules WHERE id = ?1", Capsule::COLUMNS),
        [capsule_id],
        Capsule::from_row,
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found("Capsule not found"))
}

/// Read the creation body as either JSON or a multipart form with an
/// optional `media` file.
async fn read_draft(
    state: &AppState,
    headers: &HeaderMap,
    request: Request,
) -> ApiResult<(CapsuleDraft, Option<UploadedFile>)> {
    let is_multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if !is_multipart {
        let ApiJson(draft) = ApiJson::<CapsuleDraft>::from_request(request, state).await?;
        return Ok((draft, None));
    }

    let multipart = Multipart::from_request(request, state)
        .await
        .map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    let mut form = FormData::read(multipart).await?;
    let media = form.take_file("media");
    let draft = CapsuleDraft {
        title: form.text("title").unwrap_or_default().to_string(),
        content: form.text("content").map(str::to_string),
        question: form.text("question").unwrap_or_default().to_string(),
        answer: form.text("answer").unwrap_or_default().to_string(),
        unlock_date: form.text("unlock_date").unwrap_or_default().to_string(),
    };
    Ok((draft, media))
}

/// GET /api/time-capsules: every capsule with its gating status, newest first.
pub async fn list_capsules(State(state): State<AppState>) -> ApiResult<Json<Vec<CapsuleView>>> {
    let capsules = db::blocking(&state.db, |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM capsules ORDER BY created_at DESC, id DESC",
            Capsule::COLUMNS
        ))?;
        let rows = stmt
            .query_map([], Capsule::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await?;

    let now = Utc::now();
    Ok(Json(capsules.iter().map(|c| CapsuleView::new(c, now)).collect()))
}

/// POST /api/time-capsules: seal a new capsule (JSON or multipart with
/// `media`). Open to anonymous callers.
pub async fn create_capsule(
    State(state): State<AppState>,
    session: Option<Session>,
    headers: HeaderMap,
    request: Request,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let (draft, media) = read_draft(&state, &headers, request).await?;

    let title = draft.title.trim().to_string();
    let question = draft.question.trim().to_string();
    if title.is_empty()
        || question.is_empty()
        || draft.answer.trim().is_empty()
        || draft.unlock_date.trim().is_empty()
    {
        return Err(ApiError::validation(
            "Title, question, answer and unlock date are required",
        ));
    }

    let now = Utc::now();
    let unlock_date = protocol::parse_unlock_date(&draft.unlock_date, now)?;
    let answer_hash = protocol::commit_answer(&draft.answer)?;
    if media.as_ref().is_some_and(|m| !m.is_allowed()) {
        return Err(ApiError::validation("File type not allowed"));
    }

    let content = draft.content;
    let capsule_dir = store::capsule_dir(&state.upload_dir);
    let stored = match media {
        Some(file) => Some(store::save_one(capsule_dir.clone(), "capsule", file).await?),
        None => None,
    };

    let capsule = db::blocking(&state.db, move |conn| {
        let inserted = (|| -> ApiResult<Capsule> {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO capsules (title, content, created_at, unlock_date, question, answer_hash, media_type, media_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    title,
                    content,
                    models::now_timestamp(),
                    unlock_date.to_rfc3339_opts(SecondsFormat::Secs, true),
                    question,
                    answer_hash,
                    stored.as_ref().map(|s| s.media_type),
                    stored.as_ref().map(|s| s.file_name.as_str()),
                ],
            )?;
            let capsule = load_capsule(&tx, tx.last_insert_rowid())?;
            tx.commit()?;
            Ok(capsule)
        })();

        if inserted.is_err() {
            if let Some(stored) = &stored {
                store::remove(&capsule_dir, &stored.file_name);
            }
        }
        inserted
    })
    .await?;

    tracing::info!(
        capsule_id = capsule.id,
        user_id = ?session.as_ref().map(|s| s.user_id),
        unlock_date = %capsule.unlock_date,
        "Capsule sealed"
    );

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Capsule created",
            "id": capsule.id,
            "capsule": CapsuleView::new(&capsule, now),
        })),
    ))
}

/// GET /api/time-capsules/{id}: full content, only once unlocked.
pub async fn get_capsule(
    State(state): State<AppState>,
    Path(capsule_id): Path<i64>,
) -> ApiResult<Json<CapsuleView>> {
    let capsule = db::blocking(&state.db, move |conn| load_capsule(conn, capsule_id)).await?;
    protocol::ensure_readable(&capsule)?;
    Ok(Json(CapsuleView::new(&capsule, Utc::now())))
}

/// POST /api/time-capsules/{id}/unlock: answer the capsule's question.
///
/// Every attempt made after the unlock time counts, right or wrong; the
/// counter and the unlock flag change in one transaction.
pub async fn unlock_capsule(
    State(state): State<AppState>,
    Path(capsule_id): Path<i64>,
    ApiJson(req): ApiJson<AnswerRequest>,
) -> ApiResult<Response> {
    let now = Utc::now();
    let answer = req.answer;

    let (outcome, was_unlocked, capsule) = db::blocking(&state.db, move |conn| {
        let tx = conn.transaction()?;
        let capsule = load_capsule(&tx, capsule_id)?;
        let outcome = protocol::judge_attempt(&capsule, &answer, now)?;

        tx.execute(
            "UPDATE capsules
             SET unlock_attempts = unlock_attempts + 1,
                 is_unlocked = CASE WHEN ?2 THEN 1 ELSE is_unlocked END
             WHERE id = ?1",
            params![capsule_id, outcome == AttemptOutcome::Opened],
        )?;
        let updated = load_capsule(&tx, capsule_id)?;
        tx.commit()?;
        Ok((outcome, capsule.is_unlocked, updated))
    })
    .await?;

    match outcome {
        AttemptOutcome::Opened => {
            if !was_unlocked {
                tracing::info!(
                    capsule_id,
                    attempts = capsule.unlock_attempts,
                    "Capsule unlocked"
                );
            }
            Ok(Json(serde_json::json!({
                "message": "Capsule unlocked",
                "capsule": CapsuleView::new(&capsule, now),
            }))
            .into_response())
        }
        AttemptOutcome::WrongAnswer => {
            tracing::debug!(
                capsule_id,
                attempts = capsule.unlock_attempts,
                "Wrong capsule answer"
            );
            Ok((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "message": "Incorrect answer",
                    "attempts": capsule.unlock_attempts,
                })),
            )
                .into_response())
        }
    }
}

/// GET /api/time-capsules/{id}/media: stream the attachment of an unlocked capsule.
pub async fn capsule_media(
    State(state): State<AppState>,
    Path(capsule_id): Path<i64>,
) -> ApiResult<Response> {
    let capsule = db::blocking(&state.db, move |conn| load_capsule(conn, capsule_id)).await?;
    protocol::ensure_readable(&capsule)?;

    let file_name = capsule
        .media_path
        .filter(|name| store::is_safe_name(name))
        .ok_or_else(|| ApiError::not_found("Capsule has no media"))?;
    file_response(store::capsule_dir(&state.upload_dir).join(file_name), None).await
}

/// DELETE /api/time-capsules/{id}: admin only; removes the stored media too.
pub async fn delete_capsule(
    State(state): State<AppState>,
    session: Session,
    Path(capsule_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;

    let capsule = db::blocking(&state.db, move |conn| {
        let capsule = load_capsule(conn, capsule_id)?;
        conn.execute("DELETE FROM capsules WHERE id = ?1", [capsule_id])?;
        Ok(capsule)
    })
    .await?;

    if let Some(file_name) = &capsule.media_path {
        store::remove(&store::capsule_dir(&state.upload_dir), file_name);
    }

    tracing::info!(capsule_id, admin_id = session.user_id, "Capsule deleted");
    Ok(Json(serde_json::json!({ "message": "Capsule deleted" })))
}

/// PUT /api/time-capsules/{id}/password: admin only; replaces the answer commitment.
/// The unlock flag and attempt counter are left as they are.
pub async fn reset_answer(
    State(state): State<AppState>,
    session: Session,
    Path(capsule_id): Path<i64>,
    ApiJson(req): ApiJson<AnswerRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    session.require_admin()?;
    let answer_hash = protocol::commit_answer(&req.answer)?;

    db::blocking(&state.db, move |conn| {
        let updated = conn.execute(
            "UPDATE capsules SET answer_hash = ?1 WHERE id = ?2",
            params![answer_hash, capsule_id],
        )?;
        if updated == 0 {
            return Err(ApiError::not_found("Capsule not found"));
        }
        Ok(())
    })
    .await?;

    tracing::info!(capsule_id, admin_id = session.user_id, "Capsule answer reset");
    Ok(Json(serde_json::json!({ "message": "Answer updated" })))
}
