//! Vocabulary-constrained content generation.
//!
//! Every request runs a short, strictly sequential loop: ask the backend,
//! parse the reply, check each variant against the learner's known
//! vocabulary, and either accept the legal variants or ask again with the
//! offending tokens listed. The loop stops after at most three attempts and
//! the whole request runs under one deadline.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::config::{env_u32, env_u64};
use crate::db::operations::{Concept, NewQuestion};
use crate::db::StoreError;
use crate::services::constraint::AllowedSymbols;
use crate::services::language::Language;
use crate::services::lexicon::Lexicon;
use crate::services::llm_provider::{extract_json, Prompt, TextGenerator};
use crate::services::vocabulary::KnownVocabularySet;
use crate::types::QuestionType;

/// Hard cap on backend calls per request, whatever the configuration says.
pub const MAX_ATTEMPTS: u32 = 3;
/// Placeholder a multiple-choice question uses for the missing word.
pub const BLANK: &str = "___";
const PROMPT_VOCABULARY_LIMIT: usize = 400;

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub concurrency: usize,
    pub explanation_variants: usize,
    pub distractors: usize,
    pub pregeneration_schedule: String,
    pub pregeneration_batch: u32,
}

impl GenerationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_u32("GENERATION_MAX_ATTEMPTS", defaults.max_attempts),
            timeout: Duration::from_millis(env_u64("GENERATION_TIMEOUT_MS", 90_000)),
            concurrency: env_u32("GENERATION_CONCURRENCY", 5).max(1) as usize,
            explanation_variants: env_u32("EXPLANATION_VARIANTS", 3).max(1) as usize,
            distractors: env_u32("MC_DISTRACTORS", 3).max(1) as usize,
            pregeneration_schedule: std::env::var("PREGENERATION_SCHEDULE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.pregeneration_schedule),
            pregeneration_batch: env_u32("PREGENERATION_BATCH", defaults.pregeneration_batch),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_ATTEMPTS)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            timeout: Duration::from_secs(90),
            concurrency: 5,
            explanation_variants: 3,
            distractors: 3,
            pregeneration_schedule: "0 */10 * * * *".to_string(),
            pregeneration_batch: 20,
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no admissible content after {attempts} attempts; illegal tokens: {illegal_tokens:?}")]
    Exhausted {
        attempts: u32,
        illegal_tokens: Vec<String>,
        last_failure: Option<String>,
    },
    #[error("generation timed out after {attempts} attempts")]
    TimedOut {
        attempts: u32,
        illegal_tokens: Vec<String>,
    },
    #[error("concept {0} does not exist")]
    UnknownConcept(String),
    #[error("{question_type} content cannot be produced for concept {concept_id}")]
    Unsupported {
        concept_id: String,
        question_type: QuestionType,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GenerationError {
    pub fn illegal_tokens(&self) -> &[String] {
        match self {
            GenerationError::Exhausted { illegal_tokens, .. }
            | GenerationError::TimedOut { illegal_tokens, .. } => illegal_tokens,
            _ => &[],
        }
    }
}

/// What one request saw. Lives outside the timed future so a timeout can
/// still report it.
#[derive(Debug, Default)]
struct AttemptLog {
    attempts: u32,
    illegal_tokens: Vec<String>,
    last_failure: Option<String>,
}

impl AttemptLog {
    fn record_illegal(&mut self, tokens: impl IntoIterator<Item = String>) {
        for token in tokens {
            if !self.illegal_tokens.contains(&token) {
                self.illegal_tokens.push(token);
            }
        }
    }
}

/// A parsed variant plus every free-text field that must pass the check.
struct Candidate<T> {
    value: T,
    texts: Vec<String>,
}

enum Parsed<T> {
    Candidates(Vec<Candidate<T>>),
    Malformed(String),
}

/// Everything the generator needs to know about one target word.
pub struct GenerationTarget<'a> {
    pub concept: &'a Concept,
    pub known: &'a KnownVocabularySet,
    pub distractors: &'a [String],
}

impl GenerationTarget<'_> {
    fn allowed(&self) -> AllowedSymbols {
        AllowedSymbols::new(
            self.concept.language,
            self.known,
            std::iter::once(self.concept.surface.as_str())
                .chain(self.distractors.iter().map(String::as_str)),
        )
    }
}

#[derive(Clone)]
pub struct ContentGenerator {
    backend: Arc<dyn TextGenerator>,
    config: GenerationConfig,
}

impl ContentGenerator {
    pub fn new(backend: Arc<dyn TextGenerator>, config: GenerationConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Produces one question of `question_type` for the target.
    pub async fn generate_question(
        &self,
        target: &GenerationTarget<'_>,
        question_type: QuestionType,
    ) -> Result<NewQuestion, GenerationError> {
        let concept = target.concept;
        match question_type {
            QuestionType::PhoneticRecall => phonetic_recall(concept),
            QuestionType::YesNo => {
                let mut accepted = self
                    .run(target, question_type.as_str(), |avoid| yes_no_prompt(target, avoid), parse_yes_no)
                    .await?;
                Ok(accepted.swap_remove(0))
            }
            QuestionType::MultipleChoice if target.distractors.is_empty() => {
                Err(GenerationError::Unsupported {
                    concept_id: concept.id.clone(),
                    question_type,
                })
            }
            QuestionType::MultipleChoice => {
                let mut accepted = self
                    .run(
                        target,
                        question_type.as_str(),
                        |avoid| multiple_choice_prompt(target, avoid),
                        parse_multiple_choice,
                    )
                    .await?;
                let mut question = accepted.swap_remove(0);
                question.options = shuffled_options(&concept.surface, target.distractors);
                question.answer = concept.surface.clone();
                Ok(question)
            }
            QuestionType::Sentence => {
                let surface = concept.surface.clone();
                let language = concept.language;
                let mut accepted = self
                    .run(
                        target,
                        question_type.as_str(),
                        |avoid| sentence_prompt(target, avoid),
                        move |raw| parse_sentence(raw, &surface, language),
                    )
                    .await?;
                Ok(accepted.swap_remove(0))
            }
        }
    }

    /// Produces up to `explanation_variants` explanations. Any legal subset
    /// of a reply is accepted without another attempt.
    pub async fn generate_explanations(
        &self,
        target: &GenerationTarget<'_>,
    ) -> Result<Vec<String>, GenerationError> {
        let wanted = self.config.explanation_variants;
        let mut accepted = self
            .run(
                target,
                "explanation",
                |avoid| explanation_prompt(target, wanted, avoid),
                parse_explanations,
            )
            .await?;
        accepted.truncate(wanted);
        Ok(accepted)
    }

    async fn run<T, B, P>(
        &self,
        target: &GenerationTarget<'_>,
        kind: &'static str,
        build: B,
        parse: P,
    ) -> Result<Vec<T>, GenerationError>
    where
        B: Fn(&[String]) -> Prompt,
        P: Fn(&str) -> Parsed<T>,
    {
        let allowed = target.allowed();
        let started = Instant::now();
        let mut log = AttemptLog::default();

        let outcome = tokio::time::timeout(
            self.config.timeout,
            self.attempt_loop(target.concept, kind, &allowed, &build, &parse, &mut log),
        )
        .await;

        match outcome {
            Ok(Some(accepted)) => {
                info!(
                    concept_id = %target.concept.id,
                    kind,
                    attempts = log.attempts,
                    variants = accepted.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "generated content accepted"
                );
                Ok(accepted)
            }
            Ok(None) => Err(GenerationError::Exhausted {
                attempts: log.attempts,
                illegal_tokens: log.illegal_tokens,
                last_failure: log.last_failure,
            }),
            Err(_) => {
                warn!(
                    concept_id = %target.concept.id,
                    kind,
                    attempts = log.attempts,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "generation timed out"
                );
                Err(GenerationError::TimedOut {
                    attempts: log.attempts,
                    illegal_tokens: log.illegal_tokens,
                })
            }
        }
    }

    async fn attempt_loop<T, B, P>(
        &self,
        concept: &Concept,
        kind: &'static str,
        allowed: &AllowedSymbols,
        build: &B,
        parse: &P,
        log: &mut AttemptLog,
    ) -> Option<Vec<T>>
    where
        B: Fn(&[String]) -> Prompt,
        P: Fn(&str) -> Parsed<T>,
    {
        for attempt in 1..=self.config.attempts() {
            log.attempts = attempt;
            let prompt = build(&log.illegal_tokens);

            let raw = match self.backend.generate(&prompt).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(concept_id = %concept.id, kind, attempt, error = %e, "backend call failed");
                    log.last_failure = Some(e.to_string());
                    continue;
                }
            };

            let candidates = match parse(&raw) {
                Parsed::Candidates(candidates) if !candidates.is_empty() => candidates,
                Parsed::Candidates(_) => {
                    log.last_failure = Some("reply contained no usable variants".to_string());
                    continue;
                }
                Parsed::Malformed(reason) => {
                    warn!(concept_id = %concept.id, kind, attempt, reason = %reason, "unparsable reply");
                    log.last_failure = Some(reason);
                    continue;
                }
            };

            let mut accepted = Vec::new();
            let mut rejected = BTreeSet::new();
            for candidate in candidates {
                let violations: BTreeSet<String> = candidate
                    .texts
                    .iter()
                    .flat_map(|text| allowed.violations(text))
                    .collect();
                if violations.is_empty() {
                    accepted.push(candidate.value);
                } else {
                    rejected.extend(violations);
                }
            }

            if !accepted.is_empty() {
                return Some(accepted);
            }

            warn!(
                concept_id = %concept.id,
                kind,
                attempt,
                illegal_tokens = ?rejected,
                "every variant used unknown vocabulary"
            );
            log.last_failure = Some("every variant used unknown vocabulary".to_string());
            log.record_illegal(rejected);
        }
        None
    }
}

fn phonetic_recall(concept: &Concept) -> Result<NewQuestion, GenerationError> {
    if concept.reading.trim().is_empty() {
        return Err(GenerationError::Unsupported {
            concept_id: concept.id.clone(),
            question_type: QuestionType::PhoneticRecall,
        });
    }
    Ok(NewQuestion {
        question: concept.surface.clone(),
        options: Vec::new(),
        answer: concept.reading.trim().to_string(),
        explanation: concept.meaning.clone(),
    })
}

/// Up to `count` known words to offer next to the target. Words sharing the
/// target's part of speech (per the lexicon or the learner's own table)
/// come first.
pub fn pick_distractors(
    concept: &Concept,
    known: &KnownVocabularySet,
    lexicon: &Lexicon,
    peers: &[String],
    count: usize,
) -> Vec<String> {
    let target_pos = Some(concept.part_of_speech.as_str())
        .filter(|pos| !pos.is_empty())
        .or_else(|| lexicon.part_of_speech(concept.language, &concept.surface));

    let mut same_pos: Vec<String> = Vec::new();
    let mut others: Vec<String> = Vec::new();
    let mut words: Vec<&String> = known.words.iter().collect();
    words.sort();
    for word in words {
        if *word == concept.surface {
            continue;
        }
        let matches = peers.contains(word)
            || target_pos.is_some_and(|pos| lexicon.part_of_speech(concept.language, word) == Some(pos));
        if matches {
            same_pos.push(word.clone());
        } else {
            others.push(word.clone());
        }
    }

    let mut rng = rand::rng();
    same_pos.shuffle(&mut rng);
    others.shuffle(&mut rng);
    same_pos.into_iter().chain(others).take(count).collect()
}

fn shuffled_options(surface: &str, distractors: &[String]) -> Vec<String> {
    let mut options: Vec<String> = std::iter::once(surface.to_string())
        .chain(distractors.iter().filter(|d| d.as_str() != surface).cloned())
        .collect();
    options.dedup();
    options.shuffle(&mut rand::rng());
    options
}

fn vocabulary_line(known: &KnownVocabularySet) -> String {
    let mut words: Vec<(&String, i64)> = known
        .words
        .iter()
        .map(|w| (w, known.understanding.get(w).copied().unwrap_or(0)))
        .collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    words
        .into_iter()
        .take(PROMPT_VOCABULARY_LIMIT)
        .map(|(w, _)| w.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn system_prompt(target: &GenerationTarget<'_>, avoid: &[String]) -> String {
    let concept = target.concept;
    let mut system = format!(
        "You write {language} practice material for a learner. Write ONLY in {language}. \
         Use ONLY these words the learner knows: [{vocab}]. \
         You may also use the target word \"{surface}\", digits, punctuation and emoji. \
         Any other word makes the answer unusable. Reply with JSON only, no Markdown.",
        language = concept.language.name(),
        vocab = vocabulary_line(target.known),
        surface = concept.surface,
    );
    if !target.distractors.is_empty() {
        system.push_str(&format!(" Also allowed: {}.", target.distractors.join(", ")));
    }
    if !avoid.is_empty() {
        system.push_str(&format!(
            " Your previous answer used words the learner does not know: {}. Do not use them.",
            avoid.join(", ")
        ));
    }
    system
}

fn describe(concept: &Concept) -> String {
    let mut line = format!("Target word: {}", concept.surface);
    if !concept.reading.is_empty() {
        line.push_str(&format!(" ({})", concept.reading));
    }
    if !concept.meaning.is_empty() {
        line.push_str(&format!(", meaning: {}", concept.meaning));
    }
    if !concept.part_of_speech.is_empty() {
        line.push_str(&format!(", part of speech: {}", concept.part_of_speech));
    }
    line
}

fn yes_no_prompt(target: &GenerationTarget<'_>, avoid: &[String]) -> Prompt {
    Prompt {
        system: system_prompt(target, avoid),
        user: format!(
            "{}\nWrite 3 yes/no questions that test whether the learner understands the target word. \
             Return {{\"variants\":[{{\"question\":\"...\",\"answer\":true,\"explanation\":\"...\"}}]}}.",
            describe(target.concept)
        ),
    }
}

fn multiple_choice_prompt(target: &GenerationTarget<'_>, avoid: &[String]) -> Prompt {
    Prompt {
        system: system_prompt(target, avoid),
        user: format!(
            "{}\nWrite 3 sentences where the target word fits and the words {} do not. \
             Replace the target word with {BLANK}. \
             Return {{\"variants\":[{{\"question\":\"... {BLANK} ...\",\"explanation\":\"...\"}}]}}.",
            describe(target.concept),
            target.distractors.join(", ")
        ),
    }
}

fn sentence_prompt(target: &GenerationTarget<'_>, avoid: &[String]) -> Prompt {
    Prompt {
        system: system_prompt(target, avoid),
        user: format!(
            "{}\nWrite 3 short example sentences that use the target word. \
             Return {{\"variants\":[{{\"sentence\":\"...\",\"explanation\":\"...\"}}]}}.",
            describe(target.concept)
        ),
    }
}

fn explanation_prompt(target: &GenerationTarget<'_>, wanted: usize, avoid: &[String]) -> Prompt {
    Prompt {
        system: system_prompt(target, avoid),
        user: format!(
            "{}\nExplain what the target word means in {wanted} different ways. \
             Return {{\"explanations\":[\"...\"]}}.",
            describe(target.concept)
        ),
    }
}

/// Accepts `{"variants": [...]}`, a bare array or a single object.
fn variant_values(raw: &str, key: &str) -> Result<Vec<Value>, String> {
    let value: Value =
        serde_json::from_str(extract_json(raw)).map_err(|e| format!("invalid JSON: {e}"))?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(format!("`{key}` is not an array: {other}")),
            None => Ok(vec![Value::Object(map)]),
        },
        other => Err(format!("unexpected JSON value: {other}")),
    }
}

fn parse_variants<D, T>(raw: &str, convert: impl Fn(D) -> Option<Candidate<T>>) -> Parsed<T>
where
    D: for<'de> Deserialize<'de>,
{
    match variant_values(raw, "variants") {
        Ok(values) => Parsed::Candidates(
            values
                .into_iter()
                .filter_map(|v| serde_json::from_value::<D>(v).ok())
                .filter_map(convert)
                .collect(),
        ),
        Err(reason) => Parsed::Malformed(reason),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Verdict {
    Flag(bool),
    Word(String),
}

impl Verdict {
    fn as_bool(&self) -> Option<bool> {
        match self {
            Verdict::Flag(flag) => Some(*flag),
            Verdict::Word(word) => match word.trim().to_lowercase().as_str() {
                "yes" | "true" | "y" => Some(true),
                "no" | "false" | "n" => Some(false),
                _ => None,
            },
        }
    }
}

#[derive(Deserialize)]
struct YesNoDraft {
    question: String,
    answer: Verdict,
    #[serde(default)]
    explanation: String,
}

fn parse_yes_no(raw: &str) -> Parsed<NewQuestion> {
    parse_variants(raw, |draft: YesNoDraft| {
        let answer = draft.answer.as_bool()?;
        let question = draft.question.trim().to_string();
        if question.is_empty() {
            return None;
        }
        Some(Candidate {
            texts: vec![question.clone(), draft.explanation.clone()],
            value: NewQuestion {
                question,
                options: Vec::new(),
                answer: if answer { "yes" } else { "no" }.to_string(),
                explanation: draft.explanation.trim().to_string(),
            },
        })
    })
}

#[derive(Deserialize)]
struct MultipleChoiceDraft {
    question: String,
    #[serde(default)]
    explanation: String,
}

fn parse_multiple_choice(raw: &str) -> Parsed<NewQuestion> {
    parse_variants(raw, |draft: MultipleChoiceDraft| {
        let question = draft.question.trim().to_string();
        if !question.contains(BLANK) {
            return None;
        }
        Some(Candidate {
            texts: vec![question.clone(), draft.explanation.clone()],
            value: NewQuestion {
                question,
                options: Vec::new(),
                answer: String::new(),
                explanation: draft.explanation.trim().to_string(),
            },
        })
    })
}

#[derive(Deserialize)]
struct SentenceDraft {
    sentence: String,
    #[serde(default)]
    explanation: String,
}

fn parse_sentence(
    raw: &str,
    surface: &str,
    language: Language,
) -> Parsed<NewQuestion> {
    parse_variants(raw, |draft: SentenceDraft| {
        let sentence = draft.sentence.trim().to_string();
        if !uses_word(language, &sentence, surface) {
            return None;
        }
        Some(Candidate {
            texts: vec![sentence.clone(), draft.explanation.clone()],
            value: NewQuestion {
                question: sentence.clone(),
                options: Vec::new(),
                answer: sentence,
                explanation: draft.explanation.trim().to_string(),
            },
        })
    })
}

fn parse_explanations(raw: &str) -> Parsed<String> {
    match variant_values(raw, "explanations") {
        Ok(values) => Parsed::Candidates(
            values
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(text) => Some(text),
                    Value::Object(map) => map
                        .get("explanation")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
                .map(|text| Candidate {
                    texts: vec![text.clone()],
                    value: text,
                })
                .collect(),
        ),
        Err(reason) => Parsed::Malformed(reason),
    }
}

/// Whether `text` contains `word`, compared the way the language is checked.
pub fn uses_word(language: Language, text: &str, word: &str) -> bool {
    let word_units = language.checked_units(word);
    if word_units.is_empty() {
        return text.contains(word.trim());
    }
    let text_units = language.checked_units(text);
    text_units
        .windows(word_units.len())
        .any(|window| window == word_units.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_variant_envelope_and_bare_forms() {
        let envelope = r#"{"variants":[{"question":"a?","answer":true},{"question":"b?","answer":"no"}]}"#;
        match parse_yes_no(envelope) {
            Parsed::Candidates(c) => {
                assert_eq!(c.len(), 2);
                assert_eq!(c[0].value.answer, "yes");
                assert_eq!(c[1].value.answer, "no");
            }
            Parsed::Malformed(r) => panic!("{r}"),
        }

        match parse_yes_no(r#"{"question":"a?","answer":"maybe"}"#) {
            Parsed::Candidates(c) => assert!(c.is_empty()),
            Parsed::Malformed(r) => panic!("{r}"),
        }

        assert!(matches!(parse_yes_no("not json at all"), Parsed::Malformed(_)));
    }

    #[test]
    fn multiple_choice_requires_a_blank() {
        let raw = r#"[{"question":"我有一只___。"},{"question":"我有一只猫。"}]"#;
        match parse_multiple_choice(raw) {
            Parsed::Candidates(c) => assert_eq!(c.len(), 1),
            Parsed::Malformed(r) => panic!("{r}"),
        }
    }

    #[test]
    fn sentence_must_use_the_target() {
        let raw = r#"{"variants":[{"sentence":"我是学生。"},{"sentence":"我有猫。"}]}"#;
        match parse_sentence(raw, "猫", Language::Chinese) {
            Parsed::Candidates(c) => {
                assert_eq!(c.len(), 1);
                assert_eq!(c[0].value.answer, "我有猫。");
            }
            Parsed::Malformed(r) => panic!("{r}"),
        }
    }

    #[test]
    fn uses_word_respects_word_boundaries() {
        assert!(uses_word(Language::English, "The Cat sleeps.", "cat"));
        assert!(!uses_word(Language::English, "The category is new.", "cat"));
        assert!(uses_word(Language::Chinese, "我们是学生", "学生"));
    }

    #[test]
    fn explanations_accept_strings_and_objects() {
        let raw = r#"{"explanations":["一", {"explanation":"二"}, 3, ""]}"#;
        match parse_explanations(raw) {
            Parsed::Candidates(c) => {
                let values: Vec<_> = c.into_iter().map(|c| c.value).collect();
                assert_eq!(values, vec!["一", "二"]);
            }
            Parsed::Malformed(r) => panic!("{r}"),
        }
    }

    #[test]
    fn attempts_are_capped_at_three() {
        let config = GenerationConfig {
            max_attempts: 10,
            ..GenerationConfig::default()
        };
        assert_eq!(config.attempts(), 3);
        let config = GenerationConfig {
            max_attempts: 0,
            ..GenerationConfig::default()
        };
        assert_eq!(config.attempts(), 1);
    }

    #[test]
    fn options_contain_target_once() {
        let options = shuffled_options("猫", &["狗".to_string(), "鱼".to_string()]);
        assert_eq!(options.len(), 3);
        assert_eq!(options.iter().filter(|o| o.as_str() == "猫").count(), 1);
    }
}
