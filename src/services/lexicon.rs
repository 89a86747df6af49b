//! Read-only reference index of dictionary entries.
//!
//! Loaded once at startup and shared behind an `Arc`; there is no API to
//! mutate it afterwards.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::services::language::Language;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexiconEntry {
    pub language: Language,
    pub word: String,
    #[serde(default)]
    pub reading: String,
    #[serde(default)]
    pub meaning: String,
    #[serde(default)]
    pub part_of_speech: String,
}

#[derive(Debug, Error)]
pub enum LexiconError {
    #[error("failed to read lexicon: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse lexicon: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
pub struct Lexicon {
    entries: HashMap<(Language, String), LexiconEntry>,
}

impl Lexicon {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Later duplicates replace earlier ones.
    pub fn from_entries(entries: impl IntoIterator<Item = LexiconEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| ((entry.language, entry.word.clone()), entry))
            .collect();
        Self { entries }
    }

    /// Loads a JSON array of entries.
    pub fn load(path: &Path) -> Result<Self, LexiconError> {
        let raw = std::fs::read_to_string(path)?;
        let entries: Vec<LexiconEntry> = serde_json::from_str(&raw)?;
        let lexicon = Self::from_entries(entries);
        tracing::info!(path = %path.display(), entries = lexicon.len(), "lexicon loaded");
        Ok(lexicon)
    }

    pub fn get(&self, language: Language, word: &str) -> Option<&LexiconEntry> {
        self.entries.get(&(language, word.to_string()))
    }

    pub fn part_of_speech(&self, language: Language, word: &str) -> Option<&str> {
        self.get(language, word)
            .map(|entry| entry.part_of_speech.as_str())
            .filter(|pos| !pos.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
