//! In-process store used by the engine and HTTP tests.
//!
//! Every transaction holds the single state mutex from `begin` until it is
//! committed or dropped, so transactions are fully serialised.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{ModuleOutline, ProgressStore, StoreResult, StoreTx, StreakUpdate, TrackOutline};
use crate::error::StoreError;
use crate::models::*;

#[derive(Default, Clone)]
pub struct MemoryState {
    pub tracks: HashMap<Uuid, Track>,
    pub modules: HashMap<Uuid, Module>,
    pub lessons: HashMap<Uuid, Lesson>,
    pub quizzes: HashMap<Uuid, Quiz>,
    pub users: HashMap<Uuid, User>,
    pub progress: HashMap<(Uuid, Uuid), UserProgress>,
    pub ledger: Vec<PointTransaction>,
}

#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub async fn seed<F: FnOnce(&mut MemoryState)>(&self, f: F) {
        f(&mut *self.state.lock().await);
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn tracks(&self) -> StoreResult<Vec<Track>> {
        let state = self.state.lock().await;
        let mut tracks: Vec<Track> = state.tracks.values().cloned().collect();
        tracks.sort_by_key(|t| (t.position, t.id));
        Ok(tracks)
    }

    async fn track_outline(&self, track_id: Uuid) -> StoreResult<Option<TrackOutline>> {
        let state = self.state.lock().await;
        let Some(track) = state.tracks.get(&track_id).cloned() else {
            return Ok(None);
        };
        let mut modules: Vec<Module> = state
            .modules
            .values()
            .filter(|m| m.track_id == track_id)
            .cloned()
            .collect();
        modules.sort_by_key(|m| (m.position, m.id));

        let modules = modules
            .into_iter()
            .map(|module| {
                let mut lessons: Vec<Lesson> = state
                    .lessons
                    .values()
                    .filter(|l| l.module_id == module.id && l.is_published())
                    .cloned()
                    .collect();
                lessons.sort_by_key(|l| (l.position, l.id));
                ModuleOutline { module, lessons }
            })
            .collect();
        Ok(Some(TrackOutline { track, modules }))
    }

    async fn lesson(&self, lesson_id: Uuid) -> StoreResult<Option<Lesson>> {
        Ok(self.state.lock().await.lessons.get(&lesson_id).cloned())
    }

    async fn module(&self, module_id: Uuid) -> StoreResult<Option<Module>> {
        Ok(self.state.lock().await.modules.get(&module_id).cloned())
    }

    async fn quiz(&self, lesson_id: Uuid) -> StoreResult<Option<Quiz>> {
        Ok(self.state.lock().await.quizzes.get(&lesson_id).cloned())
    }

    async fn user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn progress_for_lessons(
        &self,
        user_id: Uuid,
        lesson_ids: &[Uuid],
    ) -> StoreResult<Vec<UserProgress>> {
        let state = self.state.lock().await;
        Ok(lesson_ids
            .iter()
            .filter_map(|id| state.progress.get(&(user_id, *id)).cloned())
            .collect())
    }

    async fn recent_progress(&self, user_id: Uuid, limit: i64) -> StoreResult<Vec<UserProgress>> {
        let state = self.state.lock().await;
        let mut rows: Vec<UserProgress> = state
            .progress
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn point_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<PointTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

impl MemoryTx {
    // Mirrors the `REFERENCES users(id)` foreign keys of the schema.
    fn require_user(&self, user_id: Uuid) -> StoreResult<()> {
        if self.staged.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(StoreError::MissingReference(format!("user {user_id}")))
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_progress(
        &mut self,
        user_id: Uuid,
        lesson_id: Uuid,
    ) -> StoreResult<Option<UserProgress>> {
        Ok(self.staged.progress.get(&(user_id, lesson_id)).cloned())
    }

    async fn upsert_progress(&mut self, row: &UserProgress) -> StoreResult<()> {
        self.require_user(row.user_id)?;
        self.staged.progress.insert((row.user_id, row.lesson_id), row.clone());
        Ok(())
    }

    async fn append_point_transaction(&mut self, entry: &PointTransaction) -> StoreResult<()> {
        self.require_user(entry.user_id)?;
        self.staged.ledger.push(entry.clone());
        Ok(())
    }

    async fn increment_points(&mut self, user_id: Uuid, delta: i32) -> StoreResult<Option<i64>> {
        Ok(self.staged.users.get_mut(&user_id).map(|u| {
            u.points += i64::from(delta);
            u.points
        }))
    }

    async fn lock_user(&mut self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.staged.users.get(&user_id).cloned())
    }

    async fn save_streak(&mut self, user_id: Uuid, streak: &StreakUpdate) -> StoreResult<()> {
        if let Some(user) = self.staged.users.get_mut(&user_id) {
            user.current_streak = streak.current_streak;
            user.longest_streak = streak.longest_streak;
            user.last_active_at = Some(streak.last_active_at);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn writes_for_unknown_users_are_rejected() {
        let store = MemoryStore::new();
        let stranger = Uuid::new_v4();
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();

        let err = tx
            .upsert_progress(&UserProgress {
                user_id: stranger,
                lesson_id: Uuid::new_v4(),
                status: ProgressStatus::Completed,
                quiz_score: None,
                completed_at: Some(now),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingReference(_)));

        let err = tx
            .append_point_transaction(&PointTransaction {
                id: Uuid::new_v4(),
                user_id: stranger,
                lesson_id: None,
                points: 5,
                reason: "bonus".into(),
                created_at: now,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingReference(_)));
        assert_eq!(tx.increment_points(stranger, 5).await.unwrap(), None);
        drop(tx);

        let snap = store.snapshot().await;
        assert!(snap.progress.is_empty());
        assert!(snap.ledger.is_empty());
    }
}
