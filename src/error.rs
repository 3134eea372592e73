use thiserror::Error;
use uuid::Uuid;

/// Failures raised by a `ProgressStore` implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transient contention; the whole transaction may be retried.
    #[error("transaction conflict: {0}")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    /// A write referenced a row that does not exist.
    #[error("missing referenced row: {0}")]
    MissingReference(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("lesson {0} not found")]
    UnknownLesson(Uuid),
    #[error("track {0} not found")]
    UnknownTrack(Uuid),
    #[error("user {0} not found")]
    UnknownUser(Uuid),
    #[error("quiz for lesson {0} has no questions")]
    EmptyQuiz(Uuid),
    #[error("lesson {0} is not a quiz")]
    NotAQuiz(Uuid),
    #[error("lesson {0} is a quiz and is completed by submitting answers")]
    QuizRequiresSubmission(Uuid),
    #[error("malformed answers: {0}")]
    MalformedAnswers(String),

    #[error("lesson {0} is not published")]
    LessonNotPublished(Uuid),
    #[error("lesson {lesson_id} is locked: {reason}")]
    LessonLocked { lesson_id: Uuid, reason: String },

    #[error("gave up after {attempts} conflicting attempts")]
    Conflict { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Authorization,
    Conflict,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::UnknownLesson(_)
            | EngineError::UnknownTrack(_)
            | EngineError::UnknownUser(_) => ErrorKind::NotFound,
            EngineError::EmptyQuiz(_)
            | EngineError::NotAQuiz(_)
            | EngineError::QuizRequiresSubmission(_)
            | EngineError::MalformedAnswers(_) => ErrorKind::Validation,
            EngineError::LessonNotPublished(_) | EngineError::LessonLocked { .. } => {
                ErrorKind::Authorization
            }
            EngineError::Conflict { .. } | EngineError::Store(StoreError::Conflict(_)) => {
                ErrorKind::Conflict
            }
            EngineError::Store(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Store(StoreError::Conflict(_)))
    }
}
