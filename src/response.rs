use serde::Serialize;
use thiserror::Error;

use crate::db::StoreError;
use crate::services::generator::GenerationError;
use crate::types::QuestionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The caller re-fetches and carries on.
    Soft,
    /// A bug or a broken store; surface loudly.
    Hard,
}

/// What the caller can show instead of content that could not be generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    SentencePractice,
    DefinitionCard,
}

impl FallbackMode {
    pub fn for_question_type(question_type: QuestionType) -> Self {
        match question_type {
            QuestionType::Sentence => FallbackMode::DefinitionCard,
            QuestionType::YesNo | QuestionType::MultipleChoice | QuestionType::PhoneticRecall => {
                FallbackMode::SentencePractice
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum PracticeError {
    #[error("stale state: {0}")]
    Stale(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("generation failed: {source}")]
    Generation {
        #[source]
        source: GenerationError,
        fallback: FallbackMode,
    },
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl PracticeError {
    pub fn generation(source: GenerationError, fallback: FallbackMode) -> Self {
        match source {
            GenerationError::UnknownConcept(id) => PracticeError::NotFound(format!("concept {id}")),
            GenerationError::Store(e) => e.into(),
            source => PracticeError::Generation { source, fallback },
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            PracticeError::Stale(_) | PracticeError::NotFound(_) | PracticeError::Generation { .. } => {
                Severity::Soft
            }
            PracticeError::Invariant(_) | PracticeError::Storage(_) => Severity::Hard,
        }
    }

    pub fn is_soft(&self) -> bool {
        self.severity() == Severity::Soft
    }

    pub fn code(&self) -> &'static str {
        match self {
            PracticeError::Stale(_) => "STALE_STATE",
            PracticeError::NotFound(_) => "NOT_FOUND",
            PracticeError::Generation { .. } => "GENERATION_FAILED",
            PracticeError::Invariant(_) => "INVARIANT_VIOLATION",
            PracticeError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Learner-facing text. Hard errors never leak their details.
    pub fn message(&self) -> String {
        match self {
            PracticeError::Stale(_) => "Progress could not be saved, please retry.".to_string(),
            PracticeError::NotFound(_) => "This item is no longer available.".to_string(),
            PracticeError::Generation { .. } => {
                "Practice content is not ready yet, try another exercise.".to_string()
            }
            PracticeError::Invariant(_) | PracticeError::Storage(_) => "Internal error.".to_string(),
        }
    }

    pub fn fallback(&self) -> Option<FallbackMode> {
        match self {
            PracticeError::Generation { fallback, .. } => Some(*fallback),
            _ => None,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            success: false,
            error: self.message(),
            code: self.code().to_string(),
            severity: self.severity(),
            fallback: self.fallback(),
        }
    }
}

impl From<StoreError> for PracticeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => PracticeError::Stale(err.to_string()),
            StoreError::NotFound(what) => PracticeError::NotFound(what),
            StoreError::Invariant(what) => PracticeError::Invariant(what),
            StoreError::Sqlx(_) | StoreError::Json(_) => PracticeError::Storage(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackMode>,
}
