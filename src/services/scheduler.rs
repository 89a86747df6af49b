use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::db::operations::{concepts, reviews, Concept, ReviewRecord};
use crate::db::{Database, StoreError};
use crate::types::Scope;

/// Bound on re-reads when a selected concept disappears mid-selection.
const SELECTION_RETRIES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PracticeItem {
    /// A due track to quiz.
    Review {
        concept: Concept,
        record: ReviewRecord,
    },
    /// A never-reviewed concept, shown as a definition card.
    FirstEncounter { concept: Concept },
    Nothing,
}

impl PracticeItem {
    pub fn concept(&self) -> Option<&Concept> {
        match self {
            PracticeItem::Review { concept, .. } | PracticeItem::FirstEncounter { concept } => {
                Some(concept)
            }
            PracticeItem::Nothing => None,
        }
    }
}

/// Picks what the learner should see next. Read-only.
///
/// Due tracks win over first encounters. Paused concepts and graduated
/// tracks never qualify.
pub async fn next_practice_item(
    db: &Database,
    scope: &Scope,
    now: DateTime<Utc>,
) -> Result<PracticeItem, StoreError> {
    for _ in 0..SELECTION_RETRIES {
        if let Some(record) = reviews::next_due(db, scope, now).await? {
            match concepts::get_concept(db, &record.concept_id).await? {
                Some(concept) => {
                    debug!(
                        concept_id = %concept.id,
                        question_type = %record.question_type,
                        tier = record.state.tier,
                        "due review selected"
                    );
                    return Ok(PracticeItem::Review { concept, record });
                }
                // Deleted between the two reads.
                None => continue,
            }
        }

        return Ok(match concepts::first_encounter(db, scope).await? {
            Some(concept) => {
                debug!(concept_id = %concept.id, "first encounter selected");
                PracticeItem::FirstEncounter { concept }
            }
            None => PracticeItem::Nothing,
        });
    }
    Ok(PracticeItem::Nothing)
}
