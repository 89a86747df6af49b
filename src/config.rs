use std::path::PathBuf;

use crate::db::config::DbConfig;
use crate::logging::LogConfig;
use crate::services::generator::GenerationConfig;
use crate::services::llm_provider::LLMConfig;
use crate::types::QuestionType;

#[derive(Debug, Clone)]
pub struct Config {
    pub log: LogConfig,
    pub database: DbConfig,
    pub llm: LLMConfig,
    pub generation: GenerationConfig,
    pub srs: SrsConfig,
    pub lexicon_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            log: LogConfig::from_env(),
            database: DbConfig::from_env(),
            llm: LLMConfig::from_env(),
            generation: GenerationConfig::from_env(),
            srs: SrsConfig::from_env(),
            lexicon_path: std::env::var("LEXICON_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Which review tracks a concept gets when the learner marks it understood.
/// The tier ladder itself is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrsConfig {
    pub tracked_types: Vec<QuestionType>,
}

impl SrsConfig {
    pub fn from_env() -> Self {
        std::env::var("SRS_TRACKED_TYPES")
            .ok()
            .map(|raw| Self::parse(&raw))
            .filter(|config| !config.tracked_types.is_empty())
            .unwrap_or_default()
    }

    /// Unknown names are skipped with a warning.
    pub fn parse(raw: &str) -> Self {
        let mut tracked_types = Vec::new();
        for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match name.parse::<QuestionType>() {
                Ok(t) if !tracked_types.contains(&t) => tracked_types.push(t),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "ignoring SRS_TRACKED_TYPES entry"),
            }
        }
        Self { tracked_types }
    }

    /// Tracks for one concept: the configured ones, plus phonetic recall
    /// when the concept carries a reading worth drilling.
    pub fn tracks_for(&self, has_reading: bool) -> Vec<QuestionType> {
        let mut types = self.tracked_types.clone();
        if has_reading && !types.contains(&QuestionType::PhoneticRecall) {
            types.push(QuestionType::PhoneticRecall);
        }
        if !has_reading {
            types.retain(|t| *t != QuestionType::PhoneticRecall);
        }
        types
    }
}

impl Default for SrsConfig {
    fn default() -> Self {
        Self {
            tracked_types: vec![
                QuestionType::YesNo,
                QuestionType::MultipleChoice,
                QuestionType::Sentence,
            ],
        }
    }
}
