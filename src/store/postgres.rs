use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use super::{ModuleOutline, ProgressStore, StoreResult, StoreTx, StreakUpdate, TrackOutline};
use crate::db::Db;
use crate::error::StoreError;
use crate::models::*;

// SQLSTATEs that mean "someone else got there first, try again".
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if let Some(code) = db.code() {
            if matches!(
                code.as_ref(),
                SERIALIZATION_FAILURE | DEADLOCK_DETECTED | UNIQUE_VIOLATION
            ) {
                return StoreError::Conflict(format!("{} ({})", db.message(), code));
            }
            if code.as_ref() == FOREIGN_KEY_VIOLATION {
                return StoreError::MissingReference(db.message().to_string());
            }
        }
    }
    StoreError::Database(e)
}

fn corrupt<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::Corrupt(format!("{what}: {e}"))
}

#[derive(FromRow)]
struct TrackRow {
    id: Uuid,
    slug: String,
    title: String,
    position: i32,
    prerequisite_track_id: Option<Uuid>,
}

impl From<TrackRow> for Track {
    fn from(r: TrackRow) -> Self {
        Track {
            id: r.id,
            slug: r.slug,
            title: r.title,
            position: r.position,
            prerequisite_track_id: r.prerequisite_track_id,
        }
    }
}

#[derive(FromRow)]
struct ModuleRow {
    id: Uuid,
    track_id: Uuid,
    title: String,
    position: i32,
}

impl From<ModuleRow> for Module {
    fn from(r: ModuleRow) -> Self {
        Module { id: r.id, track_id: r.track_id, title: r.title, position: r.position }
    }
}

#[derive(FromRow)]
struct LessonRow {
    id: Uuid,
    module_id: Uuid,
    title: String,
    position: i32,
    kind: String,
    point_value: i32,
    status: String,
}

impl TryFrom<LessonRow> for Lesson {
    type Error = StoreError;

    fn try_from(r: LessonRow) -> Result<Self, Self::Error> {
        Ok(Lesson {
            id: r.id,
            module_id: r.module_id,
            title: r.title,
            position: r.position,
            kind: r.kind.parse().map_err(corrupt("lessons.kind"))?,
            point_value: r.point_value,
            publication: r.status.parse().map_err(corrupt("lessons.status"))?,
        })
    }
}

#[derive(FromRow)]
struct ProgressRow {
    user_id: Uuid,
    lesson_id: Uuid,
    status: String,
    quiz_score: Option<i16>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProgressRow> for UserProgress {
    type Error = StoreError;

    fn try_from(r: ProgressRow) -> Result<Self, Self::Error> {
        let quiz_score = r
            .quiz_score
            .map(u8::try_from)
            .transpose()
            .map_err(corrupt("user_progress.quiz_score"))?;
        Ok(UserProgress {
            user_id: r.user_id,
            lesson_id: r.lesson_id,
            status: r.status.parse().map_err(corrupt("user_progress.status"))?,
            quiz_score,
            completed_at: r.completed_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    points: i64,
    current_streak: i32,
    longest_streak: i32,
    last_active_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: r.id,
            points: r.points,
            current_streak: u32::try_from(r.current_streak)
                .map_err(corrupt("users.current_streak"))?,
            longest_streak: u32::try_from(r.longest_streak)
                .map_err(corrupt("users.longest_streak"))?,
            last_active_at: r.last_active_at,
        })
    }
}

#[derive(FromRow)]
struct PointRow {
    id: Uuid,
    user_id: Uuid,
    lesson_id: Option<Uuid>,
    points: i32,
    reason: String,
    created_at: DateTime<Utc>,
}

impl From<PointRow> for PointTransaction {
    fn from(r: PointRow) -> Self {
        PointTransaction {
            id: r.id,
            user_id: r.user_id,
            lesson_id: r.lesson_id,
            points: r.points,
            reason: r.reason,
            created_at: r.created_at,
        }
    }
}

#[derive(FromRow)]
struct QuestionRow {
    id: String,
    prompt: String,
    options: Json<Vec<String>>,
    correct_answer: serde_json::Value,
    explanation: Option<String>,
}

const LESSON_COLUMNS: &str = "id, module_id, title, position, kind, point_value, status";
const PROGRESS_COLUMNS: &str =
    "user_id, lesson_id, status, quiz_score, completed_at, created_at, updated_at";
const USER_COLUMNS: &str = "id, points, current_streak, longest_streak, last_active_at";

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProgressStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.db.begin().await.map_err(db_err)?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn tracks(&self) -> StoreResult<Vec<Track>> {
        let rows = sqlx::query_as::<_, TrackRow>(
            "SELECT id, slug, title, position, prerequisite_track_id FROM tracks ORDER BY position, id",
        )
        .fetch_all(&self.db)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Track::from).collect())
    }

    async fn track_outline(&self, track_id: Uuid) -> StoreResult<Option<TrackOutline>> {
        let track = sqlx::query_as::<_, TrackRow>(
            "SELECT id, slug, title, position, prerequisite_track_id FROM tracks WHERE id = $1",
        )
        .bind(track_id)
        .fetch_optional(&self.db)
        .await
        .map_err(db_err)?;
        let Some(track) = track else {
            return Ok(None);
        };

        let modules = sqlx::query_as::<_, ModuleRow>(
            "SELECT id, track_id, title, position FROM modules WHERE track_id = $1 ORDER BY position, id",
        )
        .bind(track_id)
        .fetch_all(&self.db)
        .await
        .map_err(db_err)?;

        let lessons = sqlx::query_as::<_, LessonRow>(
            r#"
            SELECT l.id, l.module_id, l.title, l.position, l.kind, l.point_value, l.status
            FROM lessons l JOIN modules m ON m.id = l.module_id
            WHERE m.track_id = $1 AND l.status = 'published'
            ORDER BY l.position, l.id
            "#,
        )
        .bind(track_id)
        .fetch_all(&self.db)
        .await
        .map_err(db_err)?;

        let mut by_module: HashMap<Uuid, Vec<Lesson>> = HashMap::new();
        for row in lessons {
            let lesson = Lesson::try_from(row)?;
            by_module.entry(lesson.module_id).or_default().push(lesson);
        }

        let modules = modules
            .into_iter()
            .map(|m| {
                let lessons = by_module.remove(&m.id).unwrap_or_default();
                ModuleOutline { module: m.into(), lessons }
            })
            .collect();

        Ok(Some(TrackOutline { track: track.into(), modules }))
    }

    async fn lesson(&self, lesson_id: Uuid) -> StoreResult<Option<Lesson>> {
        sqlx::query_as::<_, LessonRow>(&format!("SELECT {LESSON_COLUMNS} FROM lessons WHERE id = $1"))
            .bind(lesson_id)
            .fetch_optional(&self.db)
            .await
            .map_err(db_err)?
            .map(Lesson::try_from)
            .transpose()
    }

    async fn module(&self, module_id: Uuid) -> StoreResult<Option<Module>> {
        let row = sqlx::query_as::<_, ModuleRow>(
            "SELECT id, track_id, title, position FROM modules WHERE id = $1",
        )
        .bind(module_id)
        .fetch_optional(&self.db)
        .await
        .map_err(db_err)?;
        Ok(row.map(Module::from))
    }

    async fn quiz(&self, lesson_id: Uuid) -> StoreResult<Option<Quiz>> {
        let passing: Option<Option<i16>> =
            sqlx::query_scalar::<_, Option<i16>>("SELECT passing_score FROM quizzes WHERE lesson_id = $1")
                .bind(lesson_id)
                .fetch_optional(&self.db)
                .await
                .map_err(db_err)?;
        let Some(passing) = passing else {
            return Ok(None);
        };

        let questions = sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT id, prompt, options, correct_answer, explanation
            FROM quiz_questions WHERE lesson_id = $1
            ORDER BY position, id
            "#,
        )
        .bind(lesson_id)
        .fetch_all(&self.db)
        .await
        .map_err(db_err)?;

        Ok(Some(Quiz {
            lesson_id,
            passing_score: passing
                .map(u8::try_from)
                .transpose()
                .map_err(corrupt("quizzes.passing_score"))?,
            questions: questions
                .into_iter()
                .map(|q| QuizQuestion {
                    id: q.id,
                    prompt: q.prompt,
                    options: q.options.0,
                    correct_answer: q.correct_answer,
                    explanation: q.explanation,
                })
                .collect(),
        }))
    }

    async fn user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.db)
            .await
            .map_err(db_err)?
            .map(User::try_from)
            .transpose()
    }

    async fn progress_for_lessons(
        &self,
        user_id: Uuid,
        lesson_ids: &[Uuid],
    ) -> StoreResult<Vec<UserProgress>> {
        if lesson_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, ProgressRow>(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM user_progress WHERE user_id = $1 AND lesson_id = ANY($2)"
        ))
        .bind(user_id)
        .bind(lesson_ids)
        .fetch_all(&self.db)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(UserProgress::try_from)
        .collect()
    }

    async fn recent_progress(&self, user_id: Uuid, limit: i64) -> StoreResult<Vec<UserProgress>> {
        sqlx::query_as::<_, ProgressRow>(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM user_progress WHERE user_id = $1 ORDER BY updated_at DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(UserProgress::try_from)
        .collect()
    }

    async fn point_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<PointTransaction>> {
        let rows = sqlx::query_as::<_, PointRow>(
            r#"
            SELECT id, user_id, lesson_id, points, reason, created_at
            FROM point_transactions WHERE user_id = $1
            ORDER BY created_at DESC, id
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(PointTransaction::from).collect())
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_progress(
        &mut self,
        user_id: Uuid,
        lesson_id: Uuid,
    ) -> StoreResult<Option<UserProgress>> {
        // Row locks cannot cover a row that does not exist yet, so the pair
        // itself is locked for the rest of the transaction.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text || '/' || $2::text, 0))")
            .bind(user_id)
            .bind(lesson_id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;

        sqlx::query_as::<_, ProgressRow>(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM user_progress WHERE user_id = $1 AND lesson_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(lesson_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        .map(UserProgress::try_from)
        .transpose()
    }

    async fn upsert_progress(&mut self, row: &UserProgress) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_progress
                (user_id, lesson_id, status, quiz_score, completed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, lesson_id)
            DO UPDATE SET status = EXCLUDED.status,
                          quiz_score = EXCLUDED.quiz_score,
                          completed_at = EXCLUDED.completed_at,
                          updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(row.user_id)
        .bind(row.lesson_id)
        .bind(row.status.as_str())
        .bind(row.quiz_score.map(i16::from))
        .bind(row.completed_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn append_point_transaction(&mut self, entry: &PointTransaction) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO point_transactions (id, user_id, lesson_id, points, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.lesson_id)
        .bind(entry.points)
        .bind(&entry.reason)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn increment_points(&mut self, user_id: Uuid, delta: i32) -> StoreResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>("UPDATE users SET points = points + $2 WHERE id = $1 RETURNING points")
            .bind(user_id)
            .bind(i64::from(delta))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn lock_user(&mut self, user_id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?
        .map(User::try_from)
        .transpose()
    }

    async fn save_streak(&mut self, user_id: Uuid, streak: &StreakUpdate) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET current_streak = $2, longest_streak = $3, last_active_at = $4
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(i32::try_from(streak.current_streak).unwrap_or(i32::MAX))
        .bind(i32::try_from(streak.longest_streak).unwrap_or(i32::MAX))
        .bind(streak.last_active_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(db_err)
    }
}
