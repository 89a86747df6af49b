#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tempfile::TempDir;

use danci_practice::config::SrsConfig;
use danci_practice::db::config::DbConfig;
use danci_practice::db::operations::{Concept, NewConcept};
use danci_practice::db::Database;
use danci_practice::engine::PracticeEngine;
use danci_practice::services::generator::{ContentGenerator, GenerationConfig};
use danci_practice::services::lexicon::Lexicon;
use danci_practice::services::llm_provider::{LLMError, Prompt, TextGenerator};
use danci_practice::services::vocabulary::ConceptVocabulary;
use danci_practice::{Language, Scope};

/// Replays canned replies in order. Once the script runs out every call
/// fails as if the backend were down.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<Prompt>>,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, raw: impl Into<String>) {
        self.replies.lock().push_back(Ok(raw.into()));
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.replies.lock().push_back(Err(reason.into()));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().clone()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate<'a>(&'a self, prompt: &'a Prompt) -> BoxFuture<'a, Result<String, LLMError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().push(prompt.clone());
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.replies.lock().pop_front();
            match next {
                Some(Ok(raw)) => Ok(raw),
                Some(Err(reason)) => Err(LLMError::Unavailable(reason)),
                None => Err(LLMError::Unavailable("script exhausted".to_string())),
            }
        })
    }
}

/// Wall clock the test can move by hand.
#[derive(Clone)]
pub struct TestClock(Arc<Mutex<DateTime<Utc>>>);

impl TestClock {
    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(at)))
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.0.lock();
        *now = *now + by;
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub fn test_generation_config() -> GenerationConfig {
    GenerationConfig {
        timeout: Duration::from_secs(5),
        concurrency: 4,
        ..GenerationConfig::default()
    }
}

pub struct TestEnv {
    _dir: TempDir,
    pub db: Database,
    pub backend: Arc<ScriptedGenerator>,
    pub clock: TestClock,
    pub engine: PracticeEngine,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(test_generation_config()).await
    }

    pub async fn with_config(generation: GenerationConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::connect(&DbConfig::at_path(dir.path().join("practice.db")))
            .await
            .expect("database");
        let backend = ScriptedGenerator::new();
        let clock = TestClock::starting_at(epoch());
        let engine_clock = clock.clone();

        let engine = PracticeEngine::new(
            db.clone(),
            Arc::new(ConceptVocabulary::new(db.clone())),
            backend.clone(),
            ContentGenerator::new(backend.clone(), generation),
            Arc::new(Lexicon::empty()),
            SrsConfig::default(),
        )
        .with_clock(Arc::new(move || engine_clock.now()));

        Self {
            _dir: dir,
            db,
            backend,
            clock,
            engine,
        }
    }

    pub async fn concept(&self, scope: &Scope, surface: &str, reading: &str) -> Concept {
        self.engine
            .add_concept(
                scope,
                &NewConcept {
                    surface: surface.to_string(),
                    reading: reading.to_string(),
                    meaning: format!("meaning of {surface}"),
                    part_of_speech: "noun".to_string(),
                },
            )
            .await
            .expect("add concept")
    }

    /// Adds a concept and marks it understood so it joins the known set.
    pub async fn known(&self, scope: &Scope, surface: &str) -> Concept {
        let concept = self.concept(scope, surface, "").await;
        self.engine
            .mark_understood(&concept.id)
            .await
            .expect("mark understood");
        concept
    }

    /// Forces a track onto `tier` with no further bookkeeping.
    pub async fn force_tier(&self, concept_id: &str, question_type: &str, tier: i64) {
        sqlx::query(
            r#"UPDATE "review_records" SET "tier" = ? WHERE "conceptId" = ? AND "questionType" = ?"#,
        )
        .bind(tier)
        .bind(concept_id)
        .bind(question_type)
        .execute(self.db.pool())
        .await
        .expect("force tier");
    }
}

pub fn chinese(user: &str) -> Scope {
    Scope::new(user, Language::Chinese)
}
