//! Closed-vocabulary check applied to generated text.

use std::collections::{BTreeSet, HashSet};

use crate::services::language::Language;
use crate::services::vocabulary::KnownVocabularySet;

/// Units a learner may be shown: known words, the target word and any
/// distractors, each broken into the same units generated text is checked
/// against. Non-letters are always allowed and never appear here.
#[derive(Debug, Clone)]
pub struct AllowedSymbols {
    language: Language,
    units: HashSet<String>,
}

impl AllowedSymbols {
    pub fn new<'a>(
        language: Language,
        known: &'a KnownVocabularySet,
        extra: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut allowed = Self {
            language,
            units: HashSet::new(),
        };
        for word in known.words.iter().map(String::as_str).chain(extra) {
            allowed.allow(word);
        }
        allowed
    }

    pub fn allow(&mut self, word: &str) {
        self.units.extend(self.language.checked_units(word));
    }

    pub fn permits(&self, unit: &str) -> bool {
        self.units.contains(unit)
    }

    /// Illegal units in `text`, deduplicated and sorted.
    pub fn violations(&self, text: &str) -> Vec<String> {
        self.language
            .checked_units(text)
            .into_iter()
            .filter(|unit| !self.permits(unit))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn is_legal(&self, text: &str) -> bool {
        self.violations(text).is_empty()
    }
}
