//! Recording answers against review tracks.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::operations::{concepts, questions, reviews, Concept, GeneratedQuestion, ReviewRecord, ReviewRef};
use crate::db::Database;
use crate::response::PracticeError;
use crate::services::generator::uses_word;
use crate::services::llm_provider::{extract_json, Prompt, TextGenerator};
use crate::services::srs;
use crate::types::QuestionType;

/// Understanding given to a concept the learner marks as understood.
pub const UNDERSTOOD_FLOOR: i64 = 10;
const CRITIQUE_TIMEOUT: Duration = Duration::from_secs(30);
/// Re-reads allowed when a consumed question's track moves underneath it.
const ANSWER_WRITE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub correct: bool,
    pub canonical_answer: String,
    pub critique: Option<String>,
    pub record: Option<ReviewRecord>,
    pub graduated: bool,
}

/// Applies one review outcome to a track the caller has seen at
/// `reference.version`. A stale or deleted track is reported, never
/// overwritten.
pub async fn apply_review(
    db: &Database,
    reference: &ReviewRef,
    correct: bool,
    now: DateTime<Utc>,
) -> Result<ReviewRecord, PracticeError> {
    let current = reviews::get_review(db, &reference.concept_id, reference.question_type)
        .await?
        .ok_or_else(|| {
            PracticeError::NotFound(format!(
                "review record {}/{}",
                reference.concept_id, reference.question_type
            ))
        })?;

    if current.version != reference.version {
        warn!(
            concept_id = %reference.concept_id,
            question_type = %reference.question_type,
            expected_version = reference.version,
            stored_version = current.version,
            "answer against stale review record ignored"
        );
        return Err(PracticeError::Stale(format!(
            "review record {}/{} moved to version {}",
            reference.concept_id, reference.question_type, current.version
        )));
    }

    let scheduled = srs::review(current.state, correct, now);
    let updated = reviews::update_checked(db, reference, &scheduled, now).await?;
    refresh_understanding(db, &reference.concept_id).await?;

    info!(
        concept_id = %updated.concept_id,
        question_type = %updated.question_type,
        correct,
        from_tier = current.state.tier,
        to_tier = updated.state.tier,
        "review recorded"
    );
    Ok(updated)
}

async fn refresh_understanding(db: &Database, concept_id: &str) -> Result<(), PracticeError> {
    let tiers: Vec<u8> = reviews::list_reviews(db, concept_id)
        .await?
        .iter()
        .map(|r| r.state.tier)
        .collect();
    concepts::set_understanding(db, concept_id, srs::understanding_from_tiers(&tiers)).await?;
    Ok(())
}

/// Creates the initial tracks for a concept the learner says they know.
/// Repeating it is harmless.
pub async fn mark_understood(
    db: &Database,
    concept: &Concept,
    question_types: &[QuestionType],
    now: DateTime<Utc>,
) -> Result<Vec<ReviewRecord>, PracticeError> {
    let created = reviews::create_initial(db, &concept.id, question_types, now).await?;
    let understanding = concept.understanding.max(UNDERSTOOD_FLOOR);
    concepts::set_understanding(db, &concept.id, understanding).await?;
    info!(concept_id = %concept.id, created, "concept marked understood");
    Ok(reviews::list_reviews(db, &concept.id).await?)
}

/// Normalised comparison used for closed-form answers.
pub fn judge(question: &GeneratedQuestion, response: &str) -> bool {
    let response = normalize(response);
    match question.question_type {
        QuestionType::YesNo => yes_no(&response).is_some_and(|r| Some(r) == yes_no(&question.answer)),
        QuestionType::MultipleChoice | QuestionType::PhoneticRecall => {
            response == normalize(&question.answer)
        }
        QuestionType::Sentence => false,
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c.is_ascii_punctuation() || matches!(c, '。' | '！' | '？' | '，'))
        .to_lowercase()
}

fn yes_no(text: &str) -> Option<bool> {
    match text {
        "yes" | "y" | "true" | "是" | "对" | "はい" | "sí" | "si" | "oui" | "ja" | "sim" => Some(true),
        "no" | "n" | "false" | "不是" | "不" | "不对" | "いいえ" | "non" | "nein" | "não" | "nao" => {
            Some(false)
        }
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct CritiqueReply {
    correct: bool,
    #[serde(default)]
    critique: String,
}

/// Asks the backend to judge a learner-written sentence. When the backend
/// fails, the sentence is accepted if it uses the target word.
pub async fn critique_sentence(
    backend: &dyn TextGenerator,
    concept: &Concept,
    sentence: &str,
) -> (bool, Option<String>) {
    let uses_target = uses_word(concept.language, sentence, &concept.surface);
    if !uses_target {
        return (false, None);
    }

    let prompt = Prompt {
        system: format!(
            "You are a patient {} teacher. Judge whether the learner's sentence uses the word \"{}\" \
             correctly and naturally. Reply with JSON only: {{\"correct\":true,\"critique\":\"...\"}}. \
             Keep the critique short and encouraging.",
            concept.language.name(),
            concept.surface
        ),
        user: sentence.to_string(),
    };

    match tokio::time::timeout(CRITIQUE_TIMEOUT, backend.generate(&prompt)).await {
        Ok(Ok(raw)) => match serde_json::from_str::<CritiqueReply>(extract_json(&raw)) {
            Ok(reply) => {
                let critique = Some(reply.critique.trim().to_string()).filter(|c| !c.is_empty());
                (reply.correct, critique)
            }
            Err(e) => {
                warn!(concept_id = %concept.id, error = %e, "unparsable sentence critique");
                (true, None)
            }
        },
        Ok(Err(e)) => {
            warn!(concept_id = %concept.id, error = %e, "sentence critique failed");
            (true, None)
        }
        Err(_) => {
            warn!(concept_id = %concept.id, "sentence critique timed out");
            (true, None)
        }
    }
}

/// Consumes `question` and applies the learner's response to its track.
pub async fn submit_answer(
    db: &Database,
    backend: &dyn TextGenerator,
    question: &GeneratedQuestion,
    response: &str,
    now: DateTime<Utc>,
) -> Result<Feedback, PracticeError> {
    if question.used_at.is_some() {
        return Err(PracticeError::Stale(format!("question {} already answered", question.id)));
    }

    let concept = concepts::get_concept(db, &question.concept_id)
        .await?
        .ok_or_else(|| PracticeError::NotFound(format!("concept {}", question.concept_id)))?;

    let (correct, critique) = match question.question_type {
        QuestionType::Sentence => critique_sentence(backend, &concept, response).await,
        _ => (judge(question, response), None),
    };

    if !questions::mark_used(db, &question.id, now).await? {
        return Err(PracticeError::Stale(format!("question {} already answered", question.id)));
    }

    let record = apply_consumed(db, question, correct, now).await?;

    Ok(Feedback {
        correct,
        canonical_answer: question.answer.clone(),
        critique,
        graduated: record.as_ref().is_some_and(|r| r.state.is_graduated()),
        record,
    })
}

/// Applies the outcome of an already consumed question. The question cannot
/// be answered again, so a concurrent write to its track is absorbed by
/// re-reading the track instead of surfacing as stale.
async fn apply_consumed(
    db: &Database,
    question: &GeneratedQuestion,
    correct: bool,
    now: DateTime<Utc>,
) -> Result<Option<ReviewRecord>, PracticeError> {
    let mut attempt = 1;
    loop {
        // Answering content for a concept without a track only consumes it.
        let current = reviews::get_review(db, &question.concept_id, question.question_type).await?;
        let Some(current) = current else {
            return Ok(None);
        };
        match apply_review(db, &current.reference(), correct, now).await {
            Err(PracticeError::Stale(reason)) if attempt < ANSWER_WRITE_ATTEMPTS => {
                warn!(
                    question_id = %question.id,
                    attempt,
                    reason = %reason,
                    "track moved while answering, re-reading"
                );
                attempt += 1;
            }
            result => return result.map(Some),
        }
    }
}
