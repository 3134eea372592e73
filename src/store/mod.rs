//! Storage port for the progression engine.
//!
//! Reads go straight through `ProgressStore`. Anything that reads a row,
//! decides, and writes it back runs inside a `StoreTx` obtained from
//! `ProgressStore::begin`. A transaction that is dropped without `commit`
//! is rolled back.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Lesson, Module, PointTransaction, Quiz, Track, User, UserProgress};

pub type StoreResult<T> = Result<T, StoreError>;

/// A track with its modules and their published lessons, both in display order.
#[derive(Debug, Clone)]
pub struct TrackOutline {
    pub track: Track,
    pub modules: Vec<ModuleOutline>,
}

#[derive(Debug, Clone)]
pub struct ModuleOutline {
    pub module: Module,
    pub lessons: Vec<Lesson>,
}

impl TrackOutline {
    /// Published lessons in walk order across module boundaries.
    pub fn lessons(&self) -> impl Iterator<Item = &Lesson> {
        self.modules.iter().flat_map(|m| m.lessons.iter())
    }

    pub fn lesson_ids(&self) -> Vec<Uuid> {
        self.lessons().map(|l| l.id).collect()
    }
}

/// Streak columns written back by the streak calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakUpdate {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_active_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    async fn tracks(&self) -> StoreResult<Vec<Track>>;
    async fn track_outline(&self, track_id: Uuid) -> StoreResult<Option<TrackOutline>>;
    async fn lesson(&self, lesson_id: Uuid) -> StoreResult<Option<Lesson>>;
    async fn module(&self, module_id: Uuid) -> StoreResult<Option<Module>>;
    async fn quiz(&self, lesson_id: Uuid) -> StoreResult<Option<Quiz>>;
    async fn user(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn progress_for_lessons(
        &self,
        user_id: Uuid,
        lesson_ids: &[Uuid],
    ) -> StoreResult<Vec<UserProgress>>;

    /// Most recently touched progress rows first.
    async fn recent_progress(&self, user_id: Uuid, limit: i64) -> StoreResult<Vec<UserProgress>>;

    /// Newest ledger entries first.
    async fn point_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<PointTransaction>>;
}

#[async_trait]
pub trait StoreTx: Send {
    /// Returns the current row for (user, lesson) and holds it exclusively
    /// until the transaction ends, whether or not a row exists yet.
    async fn lock_progress(
        &mut self,
        user_id: Uuid,
        lesson_id: Uuid,
    ) -> StoreResult<Option<UserProgress>>;

    async fn upsert_progress(&mut self, row: &UserProgress) -> StoreResult<()>;

    async fn append_point_transaction(&mut self, entry: &PointTransaction) -> StoreResult<()>;

    /// Adds `delta` to the user's running total and returns the new total,
    /// or `None` if the user does not exist.
    async fn increment_points(&mut self, user_id: Uuid, delta: i32) -> StoreResult<Option<i64>>;

    async fn lock_user(&mut self, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn save_streak(&mut self, user_id: Uuid, streak: &StreakUpdate) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
