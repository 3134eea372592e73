//! The single writer of `user_progress`, and the only path to a point award.

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use super::quiz::{self, Grade};
use super::status::is_effectively_completed;
use super::{ledger, retry_on_conflict, streak, unlock};
use crate::config::Settings;
use crate::error::EngineError;
use crate::models::{Lesson, LessonKind, ProgressStatus, SubmitQuizReq, UserProgress};
use crate::store::ProgressStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The learner confirmed they finished ungraded content.
    Confirmed,
    Graded { score: u8, passed: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub status: ProgressStatus,
    pub points_awarded: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuizSubmission {
    pub grade: Grade,
    pub completion: Completion,
}

/// Next version of the (user, lesson) row for `outcome`.
///
/// Completed lessons never move backwards: a failed retry keeps the earlier
/// pass, and the stored quiz score is the best one seen.
pub fn transition(
    lesson: &Lesson,
    user_id: Uuid,
    previous: Option<&UserProgress>,
    outcome: Outcome,
    now: DateTime<Utc>,
) -> UserProgress {
    let was_done = is_effectively_completed(lesson, previous);
    let previous_completed_at = previous.and_then(|p| p.completed_at);
    let previous_score = previous.and_then(|p| p.quiz_score);

    let (status, completed_at, quiz_score) = match outcome {
        Outcome::Confirmed if was_done => {
            (ProgressStatus::Completed, previous_completed_at, previous_score)
        }
        Outcome::Confirmed => (ProgressStatus::Completed, Some(now), previous_score),
        Outcome::Graded { score, passed } => {
            let best = previous_score.map_or(score, |s| s.max(score));
            if passed {
                (ProgressStatus::Completed, Some(now), Some(best))
            } else if was_done {
                (ProgressStatus::Completed, previous_completed_at, Some(best))
            } else {
                (ProgressStatus::InProgress, None, Some(best))
            }
        }
    };

    UserProgress {
        user_id,
        lesson_id: lesson.id,
        status,
        quiz_score,
        completed_at,
        created_at: previous.map_or(now, |p| p.created_at),
        updated_at: now,
    }
}

fn award_reason(lesson: &Lesson, outcome: Outcome) -> String {
    match outcome {
        Outcome::Graded { score, .. } => format!("Passed quiz: {} ({score}%)", lesson.title),
        Outcome::Confirmed => format!("Completed lesson: {}", lesson.title),
    }
}

/// One attempt at the read-decide-write sequence, all in one transaction.
async fn apply(
    store: &dyn ProgressStore,
    user_id: Uuid,
    lesson: &Lesson,
    outcome: Outcome,
    now: DateTime<Utc>,
) -> Result<Completion, EngineError> {
    let mut tx = store.begin().await?;
    if tx.lock_user(user_id).await?.is_none() {
        return Err(EngineError::UnknownUser(user_id));
    }
    let previous = tx.lock_progress(user_id, lesson.id).await?;
    let row = transition(lesson, user_id, previous.as_ref(), outcome, now);
    tx.upsert_progress(&row).await?;

    let points_awarded = ledger::award_if_eligible(
        &mut *tx,
        previous.as_ref(),
        &row,
        lesson.point_value,
        award_reason(lesson, outcome),
        now,
    )
    .await?;
    tx.commit().await?;

    Ok(Completion { status: row.status, points_awarded })
}

async fn apply_with_retries(
    store: &dyn ProgressStore,
    settings: &Settings,
    user_id: Uuid,
    lesson: &Lesson,
    outcome: Outcome,
    now: DateTime<Utc>,
) -> Result<Completion, EngineError> {
    // Postgres keeps microseconds; truncate so an equal pair stays equal
    // after a round trip.
    let now = now.trunc_subsecs(6);
    let completion =
        retry_on_conflict(settings.max_retries, move || apply(store, user_id, lesson, outcome, now))
            .await?;

    // Any recorded completion or graded attempt is activity, whatever it paid.
    if let Err(e) = streak::touch(store, settings, user_id, now).await {
        tracing::warn!(%user_id, error = %e, "streak update after progress write failed");
    }
    Ok(completion)
}

/// Marks an ungraded lesson as completed for `user_id`.
pub async fn record_completion(
    store: &dyn ProgressStore,
    settings: &Settings,
    user_id: Uuid,
    lesson_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Completion, EngineError> {
    let (lesson, _) = unlock::authorize_lesson(store, user_id, lesson_id).await?;
    if lesson.kind == LessonKind::Quiz {
        return Err(EngineError::QuizRequiresSubmission(lesson_id));
    }
    let completion =
        apply_with_retries(store, settings, user_id, &lesson, Outcome::Confirmed, now).await?;
    tracing::debug!(
        %user_id,
        %lesson_id,
        kind = lesson.kind.as_str(),
        points = completion.points_awarded,
        "lesson completed"
    );
    Ok(completion)
}

/// Grades a quiz attempt and records it like any other completion.
pub async fn submit_quiz(
    store: &dyn ProgressStore,
    settings: &Settings,
    user_id: Uuid,
    req: &SubmitQuizReq,
    now: DateTime<Utc>,
) -> Result<QuizSubmission, EngineError> {
    quiz::validate_answers(&req.answers)?;
    let (lesson, _) = unlock::authorize_lesson(store, user_id, req.lesson_id).await?;
    if lesson.kind != LessonKind::Quiz {
        return Err(EngineError::NotAQuiz(lesson.id));
    }
    let bank = store
        .quiz(lesson.id)
        .await?
        .ok_or(EngineError::EmptyQuiz(lesson.id))?;
    let passing_score = bank
        .passing_score
        .unwrap_or(settings.default_passing_score)
        .min(100);

    let grade = quiz::grade(lesson.id, &bank.questions, &req.answers, passing_score)?;
    let outcome = Outcome::Graded { score: grade.score, passed: grade.passed };
    let completion = apply_with_retries(store, settings, user_id, &lesson, outcome, now).await?;

    tracing::info!(
        %user_id,
        lesson_id = %lesson.id,
        score = grade.score,
        passed = grade.passed,
        points = completion.points_awarded,
        "quiz graded"
    );
    Ok(QuizSubmission { grade, completion })
}
