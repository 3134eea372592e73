//! Grades a submitted answer set against the authoritative question bank.

use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{QuestionResult, QuizQuestion};

#[derive(Debug, Clone, PartialEq)]
pub struct Grade {
    pub score: u8,
    pub passed: bool,
    pub passing_score: u8,
    pub correct_count: usize,
    pub total_questions: usize,
    pub results: Vec<QuestionResult>,
}

/// Rejects payloads that cannot be an answer to any question.
pub fn validate_answers(answers: &HashMap<String, Value>) -> Result<(), EngineError> {
    for (question_id, answer) in answers {
        if question_id.trim().is_empty() {
            return Err(EngineError::MalformedAnswers("empty question id".into()));
        }
        if answer.is_object() {
            return Err(EngineError::MalformedAnswers(format!(
                "answer to {question_id} must be a value or a list, not an object"
            )));
        }
    }
    Ok(())
}

/// Score is `round(100 * correct / total)`; a missing answer is simply wrong.
pub fn grade(
    lesson_id: Uuid,
    questions: &[QuizQuestion],
    answers: &HashMap<String, Value>,
    passing_score: u8,
) -> Result<Grade, EngineError> {
    if questions.is_empty() {
        return Err(EngineError::EmptyQuiz(lesson_id));
    }

    let results: Vec<QuestionResult> = questions
        .iter()
        .map(|q| {
            let submitted = answers.get(&q.id).cloned();
            let is_correct = submitted.as_ref() == Some(&q.correct_answer);
            QuestionResult {
                question_id: q.id.clone(),
                submitted_answer: submitted,
                correct_answer: q.correct_answer.clone(),
                is_correct,
                explanation: q.explanation.clone(),
            }
        })
        .collect();

    let total = results.len();
    let correct = results.iter().filter(|r| r.is_correct).count();
    let score = u8::try_from((200 * correct + total) / (2 * total)).unwrap_or(100);

    Ok(Grade {
        score,
        passed: score >= passing_score,
        passing_score,
        correct_count: correct,
        total_questions: total,
        results,
    })
}
