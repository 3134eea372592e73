use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub position: i32,
    pub prerequisite_track_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: Uuid,
    pub track_id: Uuid,
    pub title: String,
    pub position: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LessonKind {
    Video,
    Pdf,
    Quiz,
    Assignment,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Publication {
    Draft,
    Published,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: Uuid,
    pub module_id: Uuid,
    pub title: String,
    pub position: i32,
    pub kind: LessonKind,
    pub point_value: i32,
    pub publication: Publication,
}

impl Lesson {
    pub fn is_published(&self) -> bool {
        self.publication == Publication::Published
    }
}

/// Stored status of a (user, lesson) pair.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// Per-user classification of a lesson produced by the unlock resolver.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnlockStatus {
    Locked,
    Unlocked,
    Completed,
}

/// One row per (user, lesson). `created_at` is fixed at insert time and is
/// the anchor for first-time completion detection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub user_id: Uuid,
    pub lesson_id: Uuid,
    pub status: ProgressStatus,
    pub quiz_score: Option<u8>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only ledger entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PointTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub lesson_id: Option<Uuid>,
    pub points: i32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// The progression-relevant columns of a user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub points: i64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_active_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_answer: serde_json::Value,
    pub explanation: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub lesson_id: Uuid,
    pub passing_score: Option<u8>,
    pub questions: Vec<QuizQuestion>,
}

// --- string forms used by the relational store ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value '{}'", self.0)
    }
}

impl LessonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonKind::Video => "video",
            LessonKind::Pdf => "pdf",
            LessonKind::Quiz => "quiz",
            LessonKind::Assignment => "assignment",
        }
    }
}

impl FromStr for LessonKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(LessonKind::Video),
            "pdf" => Ok(LessonKind::Pdf),
            "quiz" => Ok(LessonKind::Quiz),
            "assignment" => Ok(LessonKind::Assignment),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl FromStr for Publication {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Publication::Draft),
            "published" => Ok(Publication::Published),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
        }
    }
}

impl FromStr for ProgressStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(ProgressStatus::NotStarted),
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

// --- request / response bodies ---

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CompleteLessonReq {
    pub lesson_id: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CompleteLessonResp {
    pub new_status: ProgressStatus,
    pub points_awarded: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmitQuizReq {
    pub lesson_id: Uuid,
    pub answers: HashMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub question_id: String,
    pub submitted_answer: Option<serde_json::Value>,
    pub correct_answer: serde_json::Value,
    pub is_correct: bool,
    pub explanation: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmitQuizResp {
    pub score: u8,
    pub passed: bool,
    pub passing_score: u8,
    pub correct_count: usize,
    pub total_questions: usize,
    pub per_question_result: Vec<QuestionResult>,
    pub new_status: ProgressStatus,
    pub points_awarded: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreakResp {
    pub current_streak: u32,
    pub longest_streak: u32,
}
