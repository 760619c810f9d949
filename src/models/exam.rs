// src/models/exam.rs

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Question kinds supported by the exam engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    Descriptive,
    Numerical,
    TrueFalse,
}

/// A single question inside a published exam. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub kind: QuestionKind,
    pub prompt: String,
    /// Candidate options; only meaningful for multiple-choice questions.
    #[serde(default)]
    pub options: Vec<String>,
    pub points: u32,
}

/// An immutable exam definition, owned by the authoring subsystem.
/// The session engine treats this as read-only input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamDefinition {
    pub id: String,
    pub title: String,
    pub questions: Vec<Question>,
    pub duration_secs: i64,
    pub max_attempts: u32,
}

impl ExamDefinition {
    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    pub fn total_points(&self) -> u32 {
        self.questions.iter().map(|q| q.points).sum()
    }
}

/// DTO for registering a new exam definition.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterExamRequest {
    #[validate(length(min = 1, max = 64))]
    pub id: String,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(custom(function = validate_questions))]
    pub questions: Vec<QuestionSpec>,
    #[validate(range(min = 60, max = 86400))]
    pub duration_secs: i64,
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
}

/// Question payload inside a `RegisterExamRequest`.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionSpec {
    pub id: String,
    pub kind: QuestionKind,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub points: u32,
}

fn validate_questions(questions: &[QuestionSpec]) -> Result<(), validator::ValidationError> {
    if questions.is_empty() {
        return Err(validator::ValidationError::new("questions_cannot_be_empty"));
    }
    for q in questions {
        if q.id.is_empty() || q.prompt.is_empty() {
            return Err(validator::ValidationError::new("question_id_and_prompt_required"));
        }
        if q.kind == QuestionKind::MultipleChoice && q.options.len() < 2 {
            return Err(validator::ValidationError::new("multiple_choice_needs_options"));
        }
    }
    Ok(())
}

impl From<QuestionSpec> for Question {
    fn from(spec: QuestionSpec) -> Self {
        Question {
            id: spec.id,
            kind: spec.kind,
            prompt: spec.prompt,
            options: spec.options,
            points: spec.points,
        }
    }
}
