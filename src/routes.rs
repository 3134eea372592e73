use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use http::{request::Parts, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Settings;
use crate::engine::overview::{self, Dashboard, LessonView, QuizView, TrackOverview};
use crate::engine::unlock::{self, TrackState};
use crate::engine::{streak, tracker};
use crate::error::{EngineError, ErrorKind};
use crate::models::*;
use crate::store::ProgressStore;

pub const USER_HEADER: &str = "x-user-id";
const MAX_POINTS_PAGE: i64 = 200;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ProgressStore>,
    pub settings: Arc<Settings>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // catalogue
        .route("/api/tracks", get(list_tracks))
        .route("/api/tracks/:track_id", get(get_track))
        .route("/api/lessons/:lesson_id", get(get_lesson))
        .route("/api/lessons/:lesson_id/quiz", get(get_quiz))
        // progression
        .route("/api/progress/complete", post(complete_lesson))
        .route("/api/quizzes/submit", post(submit_quiz))
        // learner
        .route("/api/me/session", post(touch_session))
        .route("/api/me/dashboard", get(dashboard))
        .route("/api/me/points", get(points))
        .with_state(state)
}

/// The authenticated learner, taken from the `x-user-id` header set by the
/// upstream auth proxy.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| e401("missing x-user-id header"))?;
        raw.to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(CurrentUser)
            .ok_or_else(|| e401("invalid x-user-id header"))
    }
}

async fn list_tracks(
    State(app): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> ApiResult<Vec<TrackOverview>> {
    let tracks = overview::tracks(app.store.as_ref(), user_id).await.map_err(reject)?;
    Ok(Json(tracks))
}

async fn get_track(
    State(app): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(track_id): Path<Uuid>,
) -> ApiResult<TrackState> {
    let state = unlock::resolve_for_user(app.store.as_ref(), user_id, track_id)
        .await
        .map_err(reject)?;
    Ok(Json(state))
}

async fn get_lesson(
    State(app): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(lesson_id): Path<Uuid>,
) -> ApiResult<LessonView> {
    let view = overview::lesson_view(app.store.as_ref(), user_id, lesson_id)
        .await
        .map_err(reject)?;
    Ok(Json(view))
}

async fn get_quiz(
    State(app): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(lesson_id): Path<Uuid>,
) -> ApiResult<QuizView> {
    let view = overview::quiz_view(app.store.as_ref(), &app.settings, user_id, lesson_id)
        .await
        .map_err(reject)?;
    Ok(Json(view))
}

async fn complete_lesson(
    State(app): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<CompleteLessonReq>,
) -> ApiResult<CompleteLessonResp> {
    let done = tracker::record_completion(
        app.store.as_ref(),
        &app.settings,
        user_id,
        req.lesson_id,
        Utc::now(),
    )
    .await
    .map_err(reject)?;

    Ok(Json(CompleteLessonResp {
        new_status: done.status,
        points_awarded: done.points_awarded,
    }))
}

async fn submit_quiz(
    State(app): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<SubmitQuizReq>,
) -> ApiResult<SubmitQuizResp> {
    let sub = tracker::submit_quiz(app.store.as_ref(), &app.settings, user_id, &req, Utc::now())
        .await
        .map_err(reject)?;

    let grade = sub.grade;
    Ok(Json(SubmitQuizResp {
        score: grade.score,
        passed: grade.passed,
        passing_score: grade.passing_score,
        correct_count: grade.correct_count,
        total_questions: grade.total_questions,
        per_question_result: grade.results,
        new_status: sub.completion.status,
        points_awarded: sub.completion.points_awarded,
    }))
}

async fn touch_session(
    State(app): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> ApiResult<StreakResp> {
    let streak = streak::touch(app.store.as_ref(), &app.settings, user_id, Utc::now())
        .await
        .map_err(reject)?;
    Ok(Json(streak))
}

async fn dashboard(
    State(app): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> ApiResult<Dashboard> {
    let dash = overview::dashboard(app.store.as_ref(), user_id).await.map_err(reject)?;
    Ok(Json(dash))
}

#[derive(Deserialize, Debug, Default)]
struct PointsQuery {
    limit: Option<i64>,
}

async fn points(
    State(app): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(q): Query<PointsQuery>,
) -> ApiResult<Vec<PointTransaction>> {
    let limit = q.limit.unwrap_or(50).clamp(1, MAX_POINTS_PAGE);
    let history = overview::point_history(app.store.as_ref(), user_id, limit)
        .await
        .map_err(reject)?;
    Ok(Json(history))
}

// --- helpers ---
fn reject(e: EngineError) -> (StatusCode, String) {
    match e.kind() {
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, e.to_string()),
        ErrorKind::Validation => e400(e.to_string()),
        ErrorKind::Authorization => (StatusCode::FORBIDDEN, e.to_string()),
        ErrorKind::Conflict => (StatusCode::CONFLICT, e.to_string()),
        ErrorKind::Internal => e500(e),
    }
}

fn e400<T: Into<String>>(msg: T) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, msg.into())
}

fn e401<T: Into<String>>(msg: T) -> (StatusCode, String) {
    (StatusCode::UNAUTHORIZED, msg.into())
}

fn e500<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    tracing::error!(error=%e, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
}
