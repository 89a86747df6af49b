use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::db::operations::concepts::get_concept;
use crate::db::{from_millis, to_millis, Database, StoreError};
use crate::types::{QuestionType, Scope};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuestion {
    pub id: String,
    pub concept_id: String,
    pub question_type: QuestionType,
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
    pub explanation: String,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
    pub explanation: String,
}

const QUESTION_COLUMNS: &str = r#""id", "conceptId", "questionType", "question", "options", "answer", "explanation", "createdAt", "usedAt""#;

fn map_question(row: &SqliteRow) -> Result<GeneratedQuestion, StoreError> {
    let question_type: String = row.try_get("questionType")?;
    let options: String = row.try_get("options")?;
    Ok(GeneratedQuestion {
        id: row.try_get("id")?,
        concept_id: row.try_get("conceptId")?,
        question_type: question_type
            .parse()
            .map_err(|e: crate::types::UnknownQuestionType| StoreError::Invariant(e.to_string()))?,
        question: row.try_get("question")?,
        options: serde_json::from_str(&options)?,
        answer: row.try_get("answer")?,
        explanation: row.try_get("explanation")?,
        created_at: from_millis(row.try_get("createdAt")?)?,
        used_at: row
            .try_get::<Option<i64>, _>("usedAt")?
            .map(from_millis)
            .transpose()?,
    })
}

pub async fn find_unused(
    db: &Database,
    concept_id: &str,
    question_type: QuestionType,
) -> Result<Option<GeneratedQuestion>, StoreError> {
    let sql = format!(
        r#"
        SELECT {QUESTION_COLUMNS} FROM "generated_questions"
        WHERE "conceptId" = ? AND "questionType" = ? AND "usedAt" IS NULL
        LIMIT 1
        "#
    );
    let row = sqlx::query(&sql)
        .bind(concept_id)
        .bind(question_type.as_str())
        .fetch_optional(db.pool())
        .await?;
    row.as_ref().map(map_question).transpose()
}

pub async fn get_question(
    db: &Database,
    question_id: &str,
) -> Result<Option<GeneratedQuestion>, StoreError> {
    let sql = format!(r#"SELECT {QUESTION_COLUMNS} FROM "generated_questions" WHERE "id" = ?"#);
    let row = sqlx::query(&sql)
        .bind(question_id)
        .fetch_optional(db.pool())
        .await?;
    row.as_ref().map(map_question).transpose()
}

/// Caches a question. If a concurrent generation already cached one for the
/// same concept and type, that one wins and is returned instead.
pub async fn insert_question(
    db: &Database,
    concept_id: &str,
    question_type: QuestionType,
    input: &NewQuestion,
    now: DateTime<Utc>,
) -> Result<GeneratedQuestion, StoreError> {
    let id = uuid::Uuid::new_v4().to_string();
    let inserted = sqlx::query(
        r#"
        INSERT OR IGNORE INTO "generated_questions" (
            "id", "conceptId", "questionType", "question", "options",
            "answer", "explanation", "createdAt", "usedAt"
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)
        "#,
    )
    .bind(&id)
    .bind(concept_id)
    .bind(question_type.as_str())
    .bind(&input.question)
    .bind(serde_json::to_string(&input.options)?)
    .bind(&input.answer)
    .bind(&input.explanation)
    .bind(to_millis(now))
    .execute(db.pool())
    .await;

    // The concept may have been deleted while its content was generated.
    if let Err(e) = inserted {
        if get_concept(db, concept_id).await?.is_none() {
            return Err(StoreError::NotFound(format!("concept {concept_id}")));
        }
        return Err(e.into());
    }

    find_unused(db, concept_id, question_type)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("concept {concept_id}")))
}

/// Consumes a question. Returns `false` when it was already consumed or no
/// longer exists.
pub async fn mark_used(
    db: &Database,
    question_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"UPDATE "generated_questions" SET "usedAt" = ? WHERE "id" = ? AND "usedAt" IS NULL"#,
    )
    .bind(to_millis(now))
    .bind(question_id)
    .execute(db.pool())
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Tracks due before `horizon` that have no unused question cached, oldest
/// first. Feeds the pre-generation sweep.
pub async fn tracks_missing_content(
    db: &Database,
    horizon: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<(String, QuestionType)>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT r."conceptId", r."questionType"
        FROM "review_records" r
        JOIN "concepts" c ON c."id" = r."conceptId"
        WHERE c."paused" = 0
          AND r."nextReviewAt" IS NOT NULL AND r."nextReviewAt" <= ?
          AND NOT EXISTS (
              SELECT 1 FROM "generated_questions" q
              WHERE q."conceptId" = r."conceptId"
                AND q."questionType" = r."questionType"
                AND q."usedAt" IS NULL
          )
        ORDER BY r."nextReviewAt"
        LIMIT ?
        "#,
    )
    .bind(to_millis(horizon))
    .bind(i64::from(limit))
    .fetch_all(db.pool())
    .await?;

    rows.iter()
        .map(|row| -> Result<(String, QuestionType), StoreError> {
            let concept_id: String = row.try_get("conceptId")?;
            let question_type: String = row.try_get("questionType")?;
            let question_type: QuestionType = question_type
                .parse()
                .map_err(|e: crate::types::UnknownQuestionType| StoreError::Invariant(e.to_string()))?;
            Ok((concept_id, question_type))
        })
        .collect()
}

/// Number of questions consumed in a scope. Used for progress reporting.
pub async fn count_used(db: &Database, scope: &Scope) -> Result<i64, StoreError> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM "generated_questions" q
        JOIN "concepts" c ON c."id" = q."conceptId"
        WHERE c."userId" = ? AND c."language" = ? AND q."usedAt" IS NOT NULL
        "#,
    )
    .bind(&scope.user_id)
    .bind(scope.language.code())
    .fetch_one(db.pool())
    .await?;
    Ok(count)
}
