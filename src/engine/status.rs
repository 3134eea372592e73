//! Status predicates shared by every reader and writer of `UserProgress`.

use crate::models::{Lesson, LessonKind, ProgressStatus, UserProgress};

/// The status a lesson should be treated as having for a user.
///
/// A quiz lesson whose row says `completed` but carries no score was
/// completed while it was some other kind of content. It counts as
/// in progress until the quiz is actually passed.
pub fn effective_status(lesson: &Lesson, row: Option<&UserProgress>) -> ProgressStatus {
    match row {
        None => ProgressStatus::NotStarted,
        Some(p) if is_migrated_quiz(lesson, p) => ProgressStatus::InProgress,
        Some(p) => p.status,
    }
}

pub fn is_effectively_completed(lesson: &Lesson, row: Option<&UserProgress>) -> bool {
    effective_status(lesson, row) == ProgressStatus::Completed
}

fn is_migrated_quiz(lesson: &Lesson, row: &UserProgress) -> bool {
    lesson.kind == LessonKind::Quiz
        && row.status == ProgressStatus::Completed
        && row.quiz_score.is_none()
}

/// True only for a row that was created and completed by the same write.
///
/// Later re-completions keep the original `created_at`, which is then
/// strictly earlier than the new `completed_at`.
pub fn is_first_time_completion(row: &UserProgress) -> bool {
    row.status == ProgressStatus::Completed && row.completed_at == Some(row.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Publication;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn lesson(kind: LessonKind) -> Lesson {
        Lesson {
            id: Uuid::new_v4(),
            module_id: Uuid::new_v4(),
            title: "l".into(),
            position: 1,
            kind,
            point_value: 10,
            publication: Publication::Published,
        }
    }

    fn completed(lesson: &Lesson, score: Option<u8>) -> UserProgress {
        let now = Utc::now();
        UserProgress {
            user_id: Uuid::new_v4(),
            lesson_id: lesson.id,
            status: ProgressStatus::Completed,
            quiz_score: score,
            completed_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn missing_row_is_not_started() {
        assert_eq!(effective_status(&lesson(LessonKind::Video), None), ProgressStatus::NotStarted);
    }

    #[test]
    fn quiz_completed_without_score_is_not_completed() {
        let quiz = lesson(LessonKind::Quiz);
        let row = completed(&quiz, None);
        assert_eq!(effective_status(&quiz, Some(&row)), ProgressStatus::InProgress);
        assert!(!is_effectively_completed(&quiz, Some(&row)));
    }

    #[test]
    fn scored_quiz_and_plain_content_keep_stored_status() {
        let quiz = lesson(LessonKind::Quiz);
        assert!(is_effectively_completed(&quiz, Some(&completed(&quiz, Some(80)))));

        let video = lesson(LessonKind::Video);
        assert!(is_effectively_completed(&video, Some(&completed(&video, None))));
    }

    #[test]
    fn first_time_completion_needs_matching_timestamps() {
        let video = lesson(LessonKind::Video);
        let mut row = completed(&video, None);
        assert!(is_first_time_completion(&row));

        row.completed_at = Some(row.created_at + Duration::minutes(5));
        assert!(!is_first_time_completion(&row));

        row.completed_at = None;
        row.status = ProgressStatus::InProgress;
        assert!(!is_first_time_completion(&row));
    }

    #[test]
    fn in_progress_row_is_never_first_time_completion() {
        let video = lesson(LessonKind::Video);
        let mut row = completed(&video, None);
        row.status = ProgressStatus::InProgress;
        assert!(!is_first_time_completion(&row));
    }
}
