use std::collections::{HashMap, HashSet};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::db::operations::concepts;
use crate::db::{Database, StoreError};
use crate::types::Scope;

/// Words a learner can already read, with how well they know each one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownVocabularySet {
    pub words: HashSet<String>,
    pub understanding: HashMap<String, i64>,
}

impl KnownVocabularySet {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for (word, understanding) in pairs {
            let word = word.into();
            set.words.insert(word.clone());
            set.understanding.insert(word, understanding);
        }
        set
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

pub trait VocabularyProvider: Send + Sync {
    fn known_vocabulary<'a>(
        &'a self,
        scope: &'a Scope,
    ) -> BoxFuture<'a, Result<KnownVocabularySet, StoreError>>;
}

/// Reads the snapshot from the learner's own concept table: every concept
/// with nonzero understanding counts as known.
#[derive(Clone)]
pub struct ConceptVocabulary {
    db: Database,
}

impl ConceptVocabulary {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl VocabularyProvider for ConceptVocabulary {
    fn known_vocabulary<'a>(
        &'a self,
        scope: &'a Scope,
    ) -> BoxFuture<'a, Result<KnownVocabularySet, StoreError>> {
        Box::pin(async move {
            let words = concepts::known_words(&self.db, scope).await?;
            Ok(KnownVocabularySet::from_pairs(words))
        })
    }
}
