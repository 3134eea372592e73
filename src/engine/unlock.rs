//! Decides which lessons of a track a user may open.
//!
//! Lessons are walked in display order across module boundaries: the first
//! lesson is always open, every later one opens once its predecessor is
//! effectively completed. A track with an unmet prerequisite is locked as a
//! whole.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use super::status::{effective_status, is_effectively_completed};
use crate::error::EngineError;
use crate::models::{Lesson, LessonKind, ProgressStatus, Track, UnlockStatus, UserProgress};
use crate::store::{ProgressStore, TrackOutline};

pub type ProgressMap = HashMap<Uuid, UserProgress>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prerequisite {
    None,
    /// Declared but the track could not be loaded. Treated as satisfied.
    Missing(Uuid),
    Met,
    Unmet {
        title: String,
        completed: usize,
        total: usize,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LessonState {
    pub lesson_id: Uuid,
    pub title: String,
    pub kind: LessonKind,
    pub point_value: i32,
    pub unlock_status: UnlockStatus,
    pub user_status: ProgressStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub quiz_score: Option<u8>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleState {
    pub module_id: Uuid,
    pub title: String,
    pub lessons: Vec<LessonState>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackProgress {
    pub total_lessons: usize,
    pub completed_lessons: usize,
    pub progress_percent: u8,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackState {
    pub track: Track,
    pub locked_reason: Option<String>,
    pub progress: TrackProgress,
    pub modules: Vec<ModuleState>,
}

impl TrackState {
    pub fn lessons(&self) -> impl Iterator<Item = &LessonState> {
        self.modules.iter().flat_map(|m| m.lessons.iter())
    }

    pub fn lesson(&self, lesson_id: Uuid) -> Option<&LessonState> {
        self.lessons().find(|l| l.lesson_id == lesson_id)
    }

    /// Why `lesson_id` cannot be opened, or `None` if it can.
    pub fn lock_reason(&self, lesson_id: Uuid) -> Option<String> {
        if let Some(reason) = &self.locked_reason {
            return Some(reason.clone());
        }
        let mut previous: Option<&LessonState> = None;
        for lesson in self.lessons() {
            if lesson.lesson_id == lesson_id {
                if lesson.unlock_status != UnlockStatus::Locked {
                    return None;
                }
                return Some(match previous {
                    Some(p) => format!("complete \"{}\" first", p.title),
                    None => "lesson is locked".to_string(),
                });
            }
            previous = Some(lesson);
        }
        None
    }
}

pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    // round half up without going through floats
    let pct = (200 * completed + total) / (2 * total);
    u8::try_from(pct.min(100)).unwrap_or(100)
}

pub fn track_progress(outline: &TrackOutline, progress: &ProgressMap) -> TrackProgress {
    let total = outline.lessons().count();
    let completed = outline
        .lessons()
        .filter(|l| is_effectively_completed(l, progress.get(&l.id)))
        .count();
    TrackProgress {
        total_lessons: total,
        completed_lessons: completed,
        progress_percent: percent(completed, total),
    }
}

/// Pure resolution of one track for one user.
pub fn resolve(
    outline: &TrackOutline,
    progress: &ProgressMap,
    prerequisite: &Prerequisite,
) -> TrackState {
    let locked_reason = match prerequisite {
        Prerequisite::Unmet { title, completed, total } => Some(format!(
            "complete the \"{title}\" track first ({completed}/{total} lessons done)"
        )),
        Prerequisite::None | Prerequisite::Missing(_) | Prerequisite::Met => None,
    };
    let track_locked = locked_reason.is_some();

    let mut previous_completed: Option<bool> = None;
    let modules = outline
        .modules
        .iter()
        .map(|m| {
            let lessons = m
                .lessons
                .iter()
                .map(|lesson| {
                    let row = progress.get(&lesson.id);
                    let user_status = effective_status(lesson, row);
                    let done = user_status == ProgressStatus::Completed;

                    let unlock_status = if track_locked {
                        UnlockStatus::Locked
                    } else if done {
                        UnlockStatus::Completed
                    } else if previous_completed.unwrap_or(true) {
                        UnlockStatus::Unlocked
                    } else if row.is_some_and(|r| r.status == ProgressStatus::Completed) {
                        // reached before its kind changed; still open
                        UnlockStatus::Unlocked
                    } else {
                        UnlockStatus::Locked
                    };
                    previous_completed = Some(done);

                    LessonState {
                        lesson_id: lesson.id,
                        title: lesson.title.clone(),
                        kind: lesson.kind,
                        point_value: lesson.point_value,
                        unlock_status,
                        user_status,
                        completed_at: row.and_then(|r| r.completed_at),
                        quiz_score: row.and_then(|r| r.quiz_score),
                    }
                })
                .collect();
            ModuleState { module_id: m.module.id, title: m.module.title.clone(), lessons }
        })
        .collect();

    TrackState {
        track: outline.track.clone(),
        locked_reason,
        progress: track_progress(outline, progress),
        modules,
    }
}

pub async fn load_progress(
    store: &dyn ProgressStore,
    user_id: Uuid,
    outline: &TrackOutline,
) -> Result<ProgressMap, EngineError> {
    let rows = store.progress_for_lessons(user_id, &outline.lesson_ids()).await?;
    Ok(rows.into_iter().map(|p| (p.lesson_id, p)).collect())
}

pub async fn prerequisite_for(
    store: &dyn ProgressStore,
    user_id: Uuid,
    track: &Track,
) -> Result<Prerequisite, EngineError> {
    let Some(prereq_id) = track.prerequisite_track_id else {
        return Ok(Prerequisite::None);
    };
    let Some(outline) = store.track_outline(prereq_id).await? else {
        tracing::warn!(track_id = %track.id, prerequisite = %prereq_id, "prerequisite track missing, not gating");
        return Ok(Prerequisite::Missing(prereq_id));
    };

    let progress = load_progress(store, user_id, &outline).await?;
    let summary = track_progress(&outline, &progress);
    if summary.total_lessons == 0 {
        tracing::debug!(track_id = %track.id, prerequisite = %prereq_id, "prerequisite track has no published lessons, not gating");
        return Ok(Prerequisite::Met);
    }
    if summary.completed_lessons < summary.total_lessons {
        return Ok(Prerequisite::Unmet {
            title: outline.track.title.clone(),
            completed: summary.completed_lessons,
            total: summary.total_lessons,
        });
    }
    Ok(Prerequisite::Met)
}

/// Loads everything needed and resolves `track_id` for `user_id`.
pub async fn resolve_for_user(
    store: &dyn ProgressStore,
    user_id: Uuid,
    track_id: Uuid,
) -> Result<TrackState, EngineError> {
    let outline = store
        .track_outline(track_id)
        .await?
        .ok_or(EngineError::UnknownTrack(track_id))?;
    let progress = load_progress(store, user_id, &outline).await?;
    let prerequisite = prerequisite_for(store, user_id, &outline.track).await?;
    Ok(resolve(&outline, &progress, &prerequisite))
}

/// Loads a lesson the user is allowed to open, together with the resolved
/// state of its track. Drafts and locked lessons are rejected.
pub async fn authorize_lesson(
    store: &dyn ProgressStore,
    user_id: Uuid,
    lesson_id: Uuid,
) -> Result<(Lesson, TrackState), EngineError> {
    let lesson = store
        .lesson(lesson_id)
        .await?
        .ok_or(EngineError::UnknownLesson(lesson_id))?;
    if !lesson.is_published() {
        return Err(EngineError::LessonNotPublished(lesson_id));
    }
    let module = store
        .module(lesson.module_id)
        .await?
        .ok_or(EngineError::UnknownLesson(lesson_id))?;

    let state = resolve_for_user(store, user_id, module.track_id).await?;
    if let Some(reason) = state.lock_reason(lesson_id) {
        tracing::info!(%user_id, %lesson_id, %reason, "locked lesson requested");
        return Err(EngineError::LessonLocked { lesson_id, reason });
    }
    Ok((lesson, state))
}
