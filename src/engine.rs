//! Caller-facing practice operations.
//!
//! `PracticeEngine` is cheap to clone and safe to share across tasks. Every
//! operation returns a [`PracticeError`] whose severity tells the caller
//! whether to retry, degrade or give up.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::SrsConfig;
use crate::db::operations::{
    concepts, questions, reviews, Concept, GeneratedQuestion, NewConcept, ProgressSummary, ReviewRecord,
    ReviewRef,
};
use crate::db::Database;
use crate::response::{FallbackMode, PracticeError};
use crate::services::answer::{self, Feedback};
use crate::services::generator::{
    pick_distractors, ContentGenerator, GenerationConfig, GenerationError, GenerationTarget,
};
use crate::services::lexicon::Lexicon;
use crate::services::llm_provider::TextGenerator;
use crate::services::scheduler::{self, PracticeItem};
use crate::services::vocabulary::VocabularyProvider;
use crate::types::{QuestionType, Scope};
use crate::workers::pregeneration::{PregenerationQueue, PregenerationRequest};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Outcome of one request inside a fan-out.
#[derive(Debug)]
pub struct BatchItem {
    pub concept_id: String,
    pub question_type: QuestionType,
    pub result: Result<GeneratedQuestion, PracticeError>,
}

#[derive(Clone)]
struct EngineInner {
    db: Database,
    vocabulary: Arc<dyn VocabularyProvider>,
    backend: Arc<dyn TextGenerator>,
    generator: ContentGenerator,
    lexicon: Arc<Lexicon>,
    srs: SrsConfig,
    clock: Clock,
    queue: Option<PregenerationQueue>,
}

#[derive(Clone)]
pub struct PracticeEngine {
    inner: Arc<EngineInner>,
}

impl PracticeEngine {
    pub fn new(
        db: Database,
        vocabulary: Arc<dyn VocabularyProvider>,
        backend: Arc<dyn TextGenerator>,
        generator: ContentGenerator,
        lexicon: Arc<Lexicon>,
        srs: SrsConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                db,
                vocabulary,
                backend,
                generator,
                lexicon,
                srs,
                clock: Arc::new(Utc::now),
                queue: None,
            }),
        }
    }

    fn rebuild(self, update: impl FnOnce(&mut EngineInner)) -> Self {
        let mut inner = Arc::try_unwrap(self.inner).unwrap_or_else(|shared| (*shared).clone());
        update(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Replaces the wall clock. Intended for tests and replays.
    pub fn with_clock(self, clock: Clock) -> Self {
        self.rebuild(|inner| inner.clock = clock)
    }

    /// Routes [`enqueue_pregeneration`](Self::enqueue_pregeneration) through
    /// a worker-drained queue.
    pub fn with_pregeneration(self, queue: PregenerationQueue) -> Self {
        self.rebuild(|inner| inner.queue = Some(queue))
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        self.inner.generator.config()
    }

    pub fn concurrency(&self) -> usize {
        self.generation_config().concurrency
    }

    fn now(&self) -> DateTime<Utc> {
        (self.inner.clock)()
    }

    async fn concept(&self, concept_id: &str) -> Result<Concept, PracticeError> {
        concepts::get_concept(&self.inner.db, concept_id)
            .await?
            .ok_or_else(|| PracticeError::NotFound(format!("concept {concept_id}")))
    }

    pub async fn add_concept(
        &self,
        scope: &Scope,
        input: &NewConcept,
    ) -> Result<Concept, PracticeError> {
        let concept = concepts::insert_concept(&self.inner.db, scope, input, self.now()).await?;
        debug!(concept_id = %concept.id, surface = %concept.surface, "concept added");
        Ok(concept)
    }

    pub async fn get_next_practice_item(&self, scope: &Scope) -> Result<PracticeItem, PracticeError> {
        Ok(scheduler::next_practice_item(&self.inner.db, scope, self.now()).await?)
    }

    /// Returns the cached unused question for the track, generating one if
    /// none exists. Generation runs on its own task: if this call is dropped
    /// the work still finishes and its result is cached.
    pub async fn get_or_generate_content(
        &self,
        concept_id: &str,
        question_type: QuestionType,
    ) -> Result<GeneratedQuestion, PracticeError> {
        if let Some(cached) = questions::find_unused(&self.inner.db, concept_id, question_type).await? {
            return Ok(cached);
        }

        let engine = self.clone();
        let concept_id = concept_id.to_string();
        let handle =
            tokio::spawn(async move { engine.generate_and_cache(&concept_id, question_type).await });
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(PracticeError::Storage(format!("generation task failed: {e}"))),
        }
    }

    async fn generate_and_cache(
        &self,
        concept_id: &str,
        question_type: QuestionType,
    ) -> Result<GeneratedQuestion, PracticeError> {
        let fallback = FallbackMode::for_question_type(question_type);
        let concept = concepts::get_concept(&self.inner.db, concept_id)
            .await?
            .ok_or_else(|| {
                PracticeError::generation(GenerationError::UnknownConcept(concept_id.to_string()), fallback)
            })?;

        let known = self.inner.vocabulary.known_vocabulary(&concept.scope()).await?;
        let distractors = if question_type == QuestionType::MultipleChoice {
            let wanted = self.inner.generator.config().distractors;
            let peers = concepts::part_of_speech_peers(&self.inner.db, &concept, wanted as u32 * 4).await?;
            pick_distractors(&concept, &known, &self.inner.lexicon, &peers, wanted)
        } else {
            Vec::new()
        };

        let target = GenerationTarget {
            concept: &concept,
            known: &known,
            distractors: &distractors,
        };
        let draft = self
            .inner
            .generator
            .generate_question(&target, question_type)
            .await
            .map_err(|e| {
                warn!(
                    concept_id = %concept.id,
                    question_type = %question_type,
                    illegal_tokens = ?e.illegal_tokens(),
                    error = %e,
                    "content generation failed"
                );
                PracticeError::generation(e, fallback)
            })?;

        Ok(questions::insert_question(&self.inner.db, &concept.id, question_type, &draft, self.now()).await?)
    }

    /// Generates content for many tracks at once, at most `concurrency`
    /// requests in flight. One failure never affects the others.
    pub async fn generate_batch(&self, targets: Vec<(String, QuestionType)>) -> Vec<BatchItem> {
        let limit = self.concurrency();
        stream::iter(targets)
            .map(|(concept_id, question_type)| {
                let engine = self.clone();
                async move {
                    let result = engine.get_or_generate_content(&concept_id, question_type).await;
                    BatchItem {
                        concept_id,
                        question_type,
                        result,
                    }
                }
            })
            .buffer_unordered(limit)
            .collect()
            .await
    }

    /// Generates and stores a fresh explanation set for the concept.
    pub async fn generate_explanations(&self, concept_id: &str) -> Result<Vec<String>, PracticeError> {
        let concept = self.concept(concept_id).await?;
        let known = self.inner.vocabulary.known_vocabulary(&concept.scope()).await?;
        let target = GenerationTarget {
            concept: &concept,
            known: &known,
            distractors: &[],
        };
        let explanations = self
            .inner
            .generator
            .generate_explanations(&target)
            .await
            .map_err(|e| PracticeError::generation(e, FallbackMode::DefinitionCard))?;
        concepts::set_explanations(&self.inner.db, &concept.id, &explanations).await?;
        Ok(explanations)
    }

    pub async fn record_answer(
        &self,
        reference: &ReviewRef,
        correct: bool,
    ) -> Result<ReviewRecord, PracticeError> {
        answer::apply_review(&self.inner.db, reference, correct, self.now()).await
    }

    pub async fn submit_answer(
        &self,
        question_id: &str,
        response: &str,
    ) -> Result<Feedback, PracticeError> {
        let question = questions::get_question(&self.inner.db, question_id)
            .await?
            .ok_or_else(|| PracticeError::NotFound(format!("question {question_id}")))?;
        answer::submit_answer(
            &self.inner.db,
            self.inner.backend.as_ref(),
            &question,
            response,
            self.now(),
        )
        .await
    }

    pub async fn mark_understood(&self, concept_id: &str) -> Result<Vec<ReviewRecord>, PracticeError> {
        let concept = self.concept(concept_id).await?;
        let has_reading =
            concept.language.has_phonetic_reading() && !concept.reading.trim().is_empty();
        let tracks = self.inner.srs.tracks_for(has_reading);
        answer::mark_understood(&self.inner.db, &concept, &tracks, self.now()).await
    }

    pub async fn set_paused(&self, concept_id: &str, paused: bool) -> Result<(), PracticeError> {
        concepts::set_paused(&self.inner.db, concept_id, paused).await?;
        info!(concept_id, paused, "concept pause toggled");
        Ok(())
    }

    pub async fn delete_concept(&self, concept_id: &str) -> Result<(), PracticeError> {
        if !concepts::delete_concept(&self.inner.db, concept_id).await? {
            return Err(PracticeError::NotFound(format!("concept {concept_id}")));
        }
        info!(concept_id, "concept deleted");
        Ok(())
    }

    pub async fn progress(&self, scope: &Scope) -> Result<ProgressSummary, PracticeError> {
        Ok(concepts::progress(&self.inner.db, scope, self.now()).await?)
    }

    /// Requests background generation for every track of the given concepts.
    /// Concepts without tracks get their would-be tracks. Returns how many
    /// requests were handed off.
    pub async fn enqueue_pregeneration(&self, concept_ids: &[String]) -> Result<usize, PracticeError> {
        let mut requests = Vec::new();
        for concept_id in concept_ids {
            let Some(concept) = concepts::get_concept(&self.inner.db, concept_id).await? else {
                debug!(concept_id = %concept_id, "skipping pre-generation for missing concept");
                continue;
            };
            let mut types: Vec<QuestionType> = reviews::list_reviews(&self.inner.db, &concept.id)
                .await?
                .into_iter()
                .filter(|r| !r.state.is_graduated())
                .map(|r| r.question_type)
                .collect();
            if types.is_empty() {
                let has_reading =
                    concept.language.has_phonetic_reading() && !concept.reading.trim().is_empty();
                types = self.inner.srs.tracks_for(has_reading);
            }
            requests.extend(types.into_iter().map(|question_type| PregenerationRequest {
                concept_id: concept.id.clone(),
                question_type,
            }));
        }

        match &self.inner.queue {
            Some(queue) => Ok(queue.enqueue(requests).await),
            None => {
                // No worker attached: run the batch on a detached task.
                let count = requests.len();
                let engine = self.clone();
                let targets = requests
                    .into_iter()
                    .map(|r| (r.concept_id, r.question_type))
                    .collect();
                tokio::spawn(async move {
                    let failed = engine
                        .generate_batch(targets)
                        .await
                        .iter()
                        .filter(|item| item.result.is_err())
                        .count();
                    if failed > 0 {
                        warn!(failed, "detached pre-generation finished with failures");
                    }
                });
                Ok(count)
            }
        }
    }

    /// Tracks due before `horizon` with nothing cached yet.
    pub async fn tracks_missing_content(
        &self,
        horizon: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<(String, QuestionType)>, PracticeError> {
        Ok(questions::tracks_missing_content(&self.inner.db, horizon, limit).await?)
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.now()
    }
}
