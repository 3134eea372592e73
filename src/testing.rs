//! Catalog and user seeding shared by the engine and route tests.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::config::Settings;
use crate::models::*;
use crate::store::memory::MemoryStore;

pub const LESSON_POINTS: i32 = 10;

pub struct Fixture {
    pub store: MemoryStore,
    pub settings: Settings,
    pub user: Uuid,
    pub now: DateTime<Utc>,
}

impl Fixture {
    pub async fn new() -> Self {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store
            .seed(|s| {
                s.users.insert(
                    user,
                    User {
                        id: user,
                        points: 0,
                        current_streak: 0,
                        longest_streak: 0,
                        last_active_at: None,
                    },
                );
            })
            .await;
        Self {
            store,
            settings: Settings::default(),
            user,
            now: Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap(),
        }
    }

    pub fn lesson_value(kind: LessonKind) -> Lesson {
        Lesson {
            id: Uuid::new_v4(),
            module_id: Uuid::new_v4(),
            title: format!("{} lesson", kind.as_str()),
            position: 1,
            kind,
            point_value: LESSON_POINTS,
            publication: Publication::Published,
        }
    }

    pub async fn track(&self, title: &str, position: i32, prerequisite: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        let track = Track {
            id,
            slug: title.to_lowercase().replace(' ', "-"),
            title: title.into(),
            position,
            prerequisite_track_id: prerequisite,
        };
        self.store.seed(|s| { s.tracks.insert(id, track); }).await;
        id
    }

    pub async fn module(&self, track_id: Uuid, position: i32) -> Uuid {
        let id = Uuid::new_v4();
        let module = Module { id, track_id, title: format!("Module {position}"), position };
        self.store.seed(|s| { s.modules.insert(id, module); }).await;
        id
    }

    async fn insert_lesson(
        &self,
        module_id: Uuid,
        position: i32,
        kind: LessonKind,
        publication: Publication,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let lesson = Lesson {
            id,
            module_id,
            title: format!("Lesson {position}"),
            position,
            kind,
            point_value: LESSON_POINTS,
            publication,
        };
        self.store.seed(|s| { s.lessons.insert(id, lesson); }).await;
        id
    }

    pub async fn lesson(&self, module_id: Uuid, position: i32, kind: LessonKind) -> Uuid {
        self.insert_lesson(module_id, position, kind, Publication::Published).await
    }

    pub async fn draft_lesson(&self, module_id: Uuid, position: i32) -> Uuid {
        self.insert_lesson(module_id, position, LessonKind::Video, Publication::Draft).await
    }

    /// One track with one module holding lessons of `kinds`, in order.
    pub async fn simple_track(&self, kinds: &[LessonKind]) -> (Uuid, Vec<Uuid>) {
        let track = self.track("Basics", 1, None).await;
        let module = self.module(track, 1).await;
        let mut lessons = Vec::with_capacity(kinds.len());
        for (i, kind) in kinds.iter().enumerate() {
            lessons.push(self.lesson(module, i as i32 + 1, *kind).await);
        }
        (module, lessons)
    }

    pub async fn quiz(&self, lesson_id: Uuid, passing_score: Option<u8>, key: &[(&str, Value)]) {
        let quiz = Quiz {
            lesson_id,
            passing_score,
            questions: key
                .iter()
                .map(|(id, correct)| QuizQuestion {
                    id: id.to_string(),
                    prompt: format!("What is {id}?"),
                    options: vec![],
                    correct_answer: correct.clone(),
                    explanation: None,
                })
                .collect(),
        };
        self.store.seed(|s| { s.quizzes.insert(lesson_id, quiz); }).await;
    }

    pub async fn progress(&self, row: UserProgress) {
        self.store
            .seed(|s| { s.progress.insert((row.user_id, row.lesson_id), row); })
            .await;
    }

    pub async fn complete(&self, lesson_id: Uuid, at: DateTime<Utc>) {
        self.progress(UserProgress {
            user_id: self.user,
            lesson_id,
            status: ProgressStatus::Completed,
            quiz_score: None,
            completed_at: Some(at),
            created_at: at,
            updated_at: at,
        })
        .await;
    }
}
