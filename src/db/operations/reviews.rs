use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::db::{from_millis, to_millis, Database, StoreError};
use crate::services::srs::{self, Scheduled, SrsState};
use crate::types::{QuestionType, Scope};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub concept_id: String,
    pub question_type: QuestionType,
    #[serde(flatten)]
    pub state: SrsState,
    pub next_review_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl ReviewRecord {
    pub fn reference(&self) -> ReviewRef {
        ReviewRef {
            concept_id: self.concept_id.clone(),
            question_type: self.question_type,
            version: self.version,
        }
    }
}

/// Handle the caller holds between selection and answer. `version` is the
/// copy the caller saw; writes against an older copy are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRef {
    pub concept_id: String,
    pub question_type: QuestionType,
    pub version: i64,
}

const REVIEW_COLUMNS: &str =
    r#""conceptId", "questionType", "tier", "streak", "lapses", "nextReviewAt", "version", "updatedAt""#;

fn map_review(row: &SqliteRow) -> Result<ReviewRecord, StoreError> {
    let concept_id: String = row.try_get("conceptId")?;
    let question_type: String = row.try_get("questionType")?;
    let question_type: QuestionType = question_type
        .parse()
        .map_err(|e: crate::types::UnknownQuestionType| StoreError::Invariant(e.to_string()))?;

    let state = SrsState::try_new(
        row.try_get("tier")?,
        row.try_get("streak")?,
        row.try_get("lapses")?,
    )
    .map_err(|e| StoreError::Invariant(format!("{concept_id}/{question_type}: {e}")))?;

    let next_review_at = row
        .try_get::<Option<i64>, _>("nextReviewAt")?
        .map(from_millis)
        .transpose()?;
    if next_review_at.is_none() != state.is_graduated() {
        return Err(StoreError::Invariant(format!(
            "{concept_id}/{question_type}: tier {} with next review {next_review_at:?}",
            state.tier
        )));
    }

    Ok(ReviewRecord {
        concept_id,
        question_type,
        state,
        next_review_at,
        version: row.try_get("version")?,
        updated_at: from_millis(row.try_get("updatedAt")?)?,
    })
}

pub async fn get_review(
    db: &Database,
    concept_id: &str,
    question_type: QuestionType,
) -> Result<Option<ReviewRecord>, StoreError> {
    let sql = format!(
        r#"SELECT {REVIEW_COLUMNS} FROM "review_records" WHERE "conceptId" = ? AND "questionType" = ?"#
    );
    let row = sqlx::query(&sql)
        .bind(concept_id)
        .bind(question_type.as_str())
        .fetch_optional(db.pool())
        .await?;
    row.as_ref().map(map_review).transpose()
}

pub async fn list_reviews(db: &Database, concept_id: &str) -> Result<Vec<ReviewRecord>, StoreError> {
    let sql = format!(
        r#"SELECT {REVIEW_COLUMNS} FROM "review_records" WHERE "conceptId" = ? ORDER BY "questionType""#
    );
    let rows = sqlx::query(&sql)
        .bind(concept_id)
        .fetch_all(db.pool())
        .await?;
    rows.iter().map(map_review).collect()
}

/// Creates tier-0 tracks for the given question types. Existing tracks are
/// left untouched. Returns how many tracks were created.
pub async fn create_initial(
    db: &Database,
    concept_id: &str,
    question_types: &[QuestionType],
    now: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let Scheduled {
        state,
        next_review_at,
    } = srs::initial(now);

    let mut tx = db.pool().begin().await?;
    let mut created = 0;
    for question_type in question_types {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO "review_records" (
                "conceptId", "questionType", "tier", "streak", "lapses",
                "nextReviewAt", "version", "updatedAt"
            ) VALUES (?, ?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(concept_id)
        .bind(question_type.as_str())
        .bind(i64::from(state.tier))
        .bind(i64::from(state.streak))
        .bind(i64::from(state.lapses))
        .bind(next_review_at.map(to_millis))
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?;
        created += result.rows_affected();
    }
    tx.commit().await?;
    Ok(created)
}

/// Earliest due track across the scope's non-paused concepts. Ties go to
/// the lower tier, then the older concept.
pub async fn next_due(
    db: &Database,
    scope: &Scope,
    now: DateTime<Utc>,
) -> Result<Option<ReviewRecord>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT r."conceptId", r."questionType", r."tier", r."streak", r."lapses",
               r."nextReviewAt", r."version", r."updatedAt"
        FROM "review_records" r
        JOIN "concepts" c ON c."id" = r."conceptId"
        WHERE c."userId" = ? AND c."language" = ? AND c."paused" = 0
          AND r."nextReviewAt" IS NOT NULL AND r."nextReviewAt" <= ?
        ORDER BY r."nextReviewAt", r."tier", c."createdAt", c."id", r."questionType"
        LIMIT 1
        "#,
    )
    .bind(&scope.user_id)
    .bind(scope.language.code())
    .bind(to_millis(now))
    .fetch_optional(db.pool())
    .await?;
    row.as_ref().map(map_review).transpose()
}

/// Writes a new state if and only if the stored version still matches.
///
/// Zero affected rows means either the track was deleted (`NotFound`) or
/// someone else wrote first (`Conflict`). Both leave the stored row intact.
pub async fn update_checked(
    db: &Database,
    reference: &ReviewRef,
    scheduled: &Scheduled,
    now: DateTime<Utc>,
) -> Result<ReviewRecord, StoreError> {
    let Scheduled {
        state,
        next_review_at,
    } = *scheduled;

    let result = sqlx::query(
        r#"
        UPDATE "review_records" SET
            "tier" = ?,
            "streak" = ?,
            "lapses" = ?,
            "nextReviewAt" = ?,
            "version" = "version" + 1,
            "updatedAt" = ?
        WHERE "conceptId" = ? AND "questionType" = ? AND "version" = ?
        "#,
    )
    .bind(i64::from(state.tier))
    .bind(i64::from(state.streak))
    .bind(i64::from(state.lapses))
    .bind(next_review_at.map(to_millis))
    .bind(to_millis(now))
    .bind(&reference.concept_id)
    .bind(reference.question_type.as_str())
    .bind(reference.version)
    .execute(db.pool())
    .await?;

    let current = get_review(db, &reference.concept_id, reference.question_type).await?;
    match current {
        None => Err(StoreError::NotFound(format!(
            "review record {}/{}",
            reference.concept_id, reference.question_type
        ))),
        Some(record) if result.rows_affected() == 0 => {
            tracing::warn!(
                concept_id = %reference.concept_id,
                question_type = %reference.question_type,
                expected_version = reference.version,
                stored_version = record.version,
                "stale review record update rejected"
            );
            Err(StoreError::Conflict {
                concept_id: reference.concept_id.clone(),
                question_type: reference.question_type,
            })
        }
        Some(record) => Ok(record),
    }
}
