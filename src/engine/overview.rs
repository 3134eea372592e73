//! Read paths built on the resolver: catalogue, lesson detail, dashboard.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::status::effective_status;
use super::unlock::{self, TrackProgress, TrackState};
use crate::config::Settings;
use crate::error::EngineError;
use crate::models::{
    Lesson, LessonKind, PointTransaction, ProgressStatus, Track, UnlockStatus,
};
use crate::store::ProgressStore;

const RECENT_PROGRESS_SCAN: i64 = 20;
pub const RECENT_POINTS: i64 = 10;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackOverview {
    pub track: Track,
    pub locked_reason: Option<String>,
    pub progress: TrackProgress,
}

impl From<&TrackState> for TrackOverview {
    fn from(state: &TrackState) -> Self {
        Self {
            track: state.track.clone(),
            locked_reason: state.locked_reason.clone(),
            progress: state.progress,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LessonView {
    pub lesson: Lesson,
    pub track_id: Uuid,
    pub unlock_status: UnlockStatus,
    pub user_status: ProgressStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub quiz_score: Option<u8>,
    pub previous_lesson_id: Option<Uuid>,
    pub next_lesson_id: Option<Uuid>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
}

/// A quiz as shown to the learner: no correct answers, no explanations.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizView {
    pub lesson_id: Uuid,
    pub passing_score: u8,
    pub best_score: Option<u8>,
    pub questions: Vec<QuestionView>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContinueLesson {
    pub lesson_id: Uuid,
    pub title: String,
    pub track_id: Uuid,
    pub user_status: ProgressStatus,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub points: i64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_active_at: Option<DateTime<Utc>>,
    pub tracks: Vec<TrackOverview>,
    pub continue_lesson: Option<ContinueLesson>,
    pub recent_points: Vec<PointTransaction>,
}

async fn resolve_all(
    store: &dyn ProgressStore,
    user_id: Uuid,
) -> Result<Vec<TrackState>, EngineError> {
    let mut states = Vec::new();
    for track in store.tracks().await? {
        states.push(unlock::resolve_for_user(store, user_id, track.id).await?);
    }
    Ok(states)
}

pub async fn tracks(
    store: &dyn ProgressStore,
    user_id: Uuid,
) -> Result<Vec<TrackOverview>, EngineError> {
    let states = resolve_all(store, user_id).await?;
    Ok(states.iter().map(TrackOverview::from).collect())
}

pub async fn lesson_view(
    store: &dyn ProgressStore,
    user_id: Uuid,
    lesson_id: Uuid,
) -> Result<LessonView, EngineError> {
    let (lesson, state) = unlock::authorize_lesson(store, user_id, lesson_id).await?;

    let order: Vec<_> = state.lessons().collect();
    let idx = order
        .iter()
        .position(|l| l.lesson_id == lesson_id)
        .ok_or(EngineError::UnknownLesson(lesson_id))?;
    let here = order[idx];

    Ok(LessonView {
        track_id: state.track.id,
        unlock_status: here.unlock_status,
        user_status: here.user_status,
        completed_at: here.completed_at,
        quiz_score: here.quiz_score,
        previous_lesson_id: idx.checked_sub(1).map(|i| order[i].lesson_id),
        next_lesson_id: order.get(idx + 1).map(|l| l.lesson_id),
        lesson,
    })
}

pub async fn quiz_view(
    store: &dyn ProgressStore,
    settings: &Settings,
    user_id: Uuid,
    lesson_id: Uuid,
) -> Result<QuizView, EngineError> {
    let (lesson, state) = unlock::authorize_lesson(store, user_id, lesson_id).await?;
    if lesson.kind != LessonKind::Quiz {
        return Err(EngineError::NotAQuiz(lesson_id));
    }
    let bank = store
        .quiz(lesson_id)
        .await?
        .filter(|q| !q.questions.is_empty())
        .ok_or(EngineError::EmptyQuiz(lesson_id))?;

    Ok(QuizView {
        lesson_id,
        passing_score: bank
            .passing_score
            .unwrap_or(settings.default_passing_score)
            .min(100),
        best_score: state.lesson(lesson_id).and_then(|l| l.quiz_score),
        questions: bank
            .questions
            .into_iter()
            .map(|q| QuestionView { id: q.id, prompt: q.prompt, options: q.options })
            .collect(),
    })
}

/// The lesson a returning learner should go back to: the most recently
/// touched lesson that is not effectively completed, otherwise the first
/// open lesson in catalogue order.
async fn continue_lesson(
    store: &dyn ProgressStore,
    user_id: Uuid,
    states: &[TrackState],
) -> Result<Option<ContinueLesson>, EngineError> {
    for row in store.recent_progress(user_id, RECENT_PROGRESS_SCAN).await? {
        let Some(lesson) = store.lesson(row.lesson_id).await? else {
            continue;
        };
        if !lesson.is_published() {
            continue;
        }
        let status = effective_status(&lesson, Some(&row));
        if status == ProgressStatus::Completed {
            continue;
        }
        let Some(module) = store.module(lesson.module_id).await? else {
            continue;
        };
        return Ok(Some(ContinueLesson {
            lesson_id: lesson.id,
            title: lesson.title,
            track_id: module.track_id,
            user_status: status,
        }));
    }

    Ok(states.iter().find_map(|state| {
        state
            .lessons()
            .find(|l| l.unlock_status == UnlockStatus::Unlocked)
            .map(|l| ContinueLesson {
                lesson_id: l.lesson_id,
                title: l.title.clone(),
                track_id: state.track.id,
                user_status: l.user_status,
            })
    }))
}

pub async fn dashboard(store: &dyn ProgressStore, user_id: Uuid) -> Result<Dashboard, EngineError> {
    let user = store
        .user(user_id)
        .await?
        .ok_or(EngineError::UnknownUser(user_id))?;
    let states = resolve_all(store, user_id).await?;
    let continue_lesson = continue_lesson(store, user_id, &states).await?;

    Ok(Dashboard {
        points: user.points,
        current_streak: user.current_streak,
        longest_streak: user.longest_streak,
        last_active_at: user.last_active_at,
        tracks: states.iter().map(TrackOverview::from).collect(),
        continue_lesson,
        recent_points: store.point_transactions(user_id, RECENT_POINTS).await?,
    })
}

pub async fn point_history(
    store: &dyn ProgressStore,
    user_id: Uuid,
    limit: i64,
) -> Result<Vec<PointTransaction>, EngineError> {
    Ok(store.point_transactions(user_id, limit).await?)
}
