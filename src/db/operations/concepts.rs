use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::db::operations::questions::count_used;
use crate::db::{from_millis, to_millis, Database, StoreError};
use crate::services::language::Language;
use crate::types::Scope;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub id: String,
    pub user_id: String,
    pub language: Language,
    pub surface: String,
    pub reading: String,
    pub meaning: String,
    pub part_of_speech: String,
    pub explanations: Vec<String>,
    pub understanding: i64,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
}

impl Concept {
    pub fn scope(&self) -> Scope {
        Scope::new(self.user_id.clone(), self.language)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConcept {
    pub surface: String,
    #[serde(default)]
    pub reading: String,
    #[serde(default)]
    pub meaning: String,
    #[serde(default)]
    pub part_of_speech: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub new: i64,
    pub learning: i64,
    pub mastered: i64,
    pub paused: i64,
    pub due: i64,
    pub answered: i64,
}

const CONCEPT_COLUMNS: &str = r#""id", "userId", "language", "surface", "reading", "meaning", "partOfSpeech", "explanations", "understanding", "paused", "createdAt""#;

fn map_concept(row: &SqliteRow) -> Result<Concept, StoreError> {
    let language: String = row.try_get("language")?;
    let language = Language::from_code(&language)
        .ok_or_else(|| StoreError::Invariant(format!("unknown language tag {language}")))?;
    let explanations: String = row.try_get("explanations")?;
    let created_at: i64 = row.try_get("createdAt")?;
    let understanding: i64 = row.try_get("understanding")?;
    if !(0..=100).contains(&understanding) {
        return Err(StoreError::Invariant(format!(
            "understanding {understanding} outside 0..=100"
        )));
    }

    Ok(Concept {
        id: row.try_get("id")?,
        user_id: row.try_get("userId")?,
        language,
        surface: row.try_get("surface")?,
        reading: row.try_get("reading")?,
        meaning: row.try_get("meaning")?,
        part_of_speech: row.try_get("partOfSpeech")?,
        explanations: serde_json::from_str(&explanations)?,
        understanding,
        paused: row.try_get::<i64, _>("paused")? != 0,
        created_at: from_millis(created_at)?,
    })
}

pub async fn insert_concept(
    db: &Database,
    scope: &Scope,
    input: &NewConcept,
    now: DateTime<Utc>,
) -> Result<Concept, StoreError> {
    let surface = input.surface.trim();
    if surface.is_empty() {
        return Err(StoreError::Invariant("concept surface form is empty".to_string()));
    }

    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO "concepts" (
            "id", "userId", "language", "surface", "reading", "meaning",
            "partOfSpeech", "explanations", "understanding", "paused", "createdAt"
        ) VALUES (?, ?, ?, ?, ?, ?, ?, '[]', 0, 0, ?)
        ON CONFLICT ("userId", "language", "surface") DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(&scope.user_id)
    .bind(scope.language.code())
    .bind(surface)
    .bind(input.reading.trim())
    .bind(input.meaning.trim())
    .bind(input.part_of_speech.trim())
    .bind(to_millis(now))
    .execute(db.pool())
    .await?;

    // Re-importing a word returns the existing concept.
    let sql = format!(
        r#"SELECT {CONCEPT_COLUMNS} FROM "concepts" WHERE "userId" = ? AND "language" = ? AND "surface" = ?"#
    );
    let row = sqlx::query(&sql)
        .bind(&scope.user_id)
        .bind(scope.language.code())
        .bind(surface)
        .fetch_one(db.pool())
        .await?;
    map_concept(&row)
}

pub async fn get_concept(db: &Database, concept_id: &str) -> Result<Option<Concept>, StoreError> {
    let sql = format!(r#"SELECT {CONCEPT_COLUMNS} FROM "concepts" WHERE "id" = ?"#);
    let row = sqlx::query(&sql)
        .bind(concept_id)
        .fetch_optional(db.pool())
        .await?;
    row.as_ref().map(map_concept).transpose()
}

pub async fn list_concepts(db: &Database, scope: &Scope) -> Result<Vec<Concept>, StoreError> {
    let sql = format!(
        r#"SELECT {CONCEPT_COLUMNS} FROM "concepts" WHERE "userId" = ? AND "language" = ? ORDER BY "createdAt", "id""#
    );
    let rows = sqlx::query(&sql)
        .bind(&scope.user_id)
        .bind(scope.language.code())
        .fetch_all(db.pool())
        .await?;
    rows.iter().map(map_concept).collect()
}

/// Oldest non-paused concept with no review history and zero understanding.
pub async fn first_encounter(db: &Database, scope: &Scope) -> Result<Option<Concept>, StoreError> {
    let sql = format!(
        r#"
        SELECT {CONCEPT_COLUMNS} FROM "concepts" c
        WHERE c."userId" = ? AND c."language" = ? AND c."paused" = 0 AND c."understanding" = 0
          AND NOT EXISTS (SELECT 1 FROM "review_records" r WHERE r."conceptId" = c."id")
        ORDER BY c."createdAt", c."id"
        LIMIT 1
        "#
    );
    let row = sqlx::query(&sql)
        .bind(&scope.user_id)
        .bind(scope.language.code())
        .fetch_optional(db.pool())
        .await?;
    row.as_ref().map(map_concept).transpose()
}

async fn update_flag(
    db: &Database,
    concept_id: &str,
    sql: &str,
    value: i64,
) -> Result<(), StoreError> {
    let result = sqlx::query(sql)
        .bind(value)
        .bind(concept_id)
        .execute(db.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("concept {concept_id}")));
    }
    Ok(())
}

pub async fn set_paused(db: &Database, concept_id: &str, paused: bool) -> Result<(), StoreError> {
    update_flag(
        db,
        concept_id,
        r#"UPDATE "concepts" SET "paused" = ? WHERE "id" = ?"#,
        i64::from(paused),
    )
    .await
}

pub async fn set_understanding(
    db: &Database,
    concept_id: &str,
    understanding: i64,
) -> Result<(), StoreError> {
    if !(0..=100).contains(&understanding) {
        return Err(StoreError::Invariant(format!(
            "understanding {understanding} outside 0..=100"
        )));
    }
    update_flag(
        db,
        concept_id,
        r#"UPDATE "concepts" SET "understanding" = ? WHERE "id" = ?"#,
        understanding,
    )
    .await
}

pub async fn set_explanations(
    db: &Database,
    concept_id: &str,
    explanations: &[String],
) -> Result<(), StoreError> {
    let json = serde_json::to_string(explanations)?;
    let result = sqlx::query(r#"UPDATE "concepts" SET "explanations" = ? WHERE "id" = ?"#)
        .bind(json)
        .bind(concept_id)
        .execute(db.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("concept {concept_id}")));
    }
    Ok(())
}

/// Deletes the concept; review records and cached questions cascade.
pub async fn delete_concept(db: &Database, concept_id: &str) -> Result<bool, StoreError> {
    let result = sqlx::query(r#"DELETE FROM "concepts" WHERE "id" = ?"#)
        .bind(concept_id)
        .execute(db.pool())
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Surface forms the learner understands, with their understanding.
pub async fn known_words(db: &Database, scope: &Scope) -> Result<Vec<(String, i64)>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT "surface", "understanding" FROM "concepts"
        WHERE "userId" = ? AND "language" = ? AND "understanding" >= 1
        "#,
    )
    .bind(&scope.user_id)
    .bind(scope.language.code())
    .fetch_all(db.pool())
    .await?;

    rows.iter()
        .map(|row| -> Result<(String, i64), StoreError> {
            Ok((row.try_get("surface")?, row.try_get("understanding")?))
        })
        .collect()
}

/// Known words sharing a part of speech with the target, used as distractors.
pub async fn part_of_speech_peers(
    db: &Database,
    concept: &Concept,
    limit: u32,
) -> Result<Vec<String>, StoreError> {
    if concept.part_of_speech.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query(
        r#"
        SELECT "surface" FROM "concepts"
        WHERE "userId" = ? AND "language" = ? AND "partOfSpeech" = ?
          AND "id" <> ? AND "understanding" >= 1
        ORDER BY "understanding" DESC, "surface"
        LIMIT ?
        "#,
    )
    .bind(&concept.user_id)
    .bind(concept.language.code())
    .bind(&concept.part_of_speech)
    .bind(&concept.id)
    .bind(i64::from(limit))
    .fetch_all(db.pool())
    .await?;

    rows.iter()
        .map(|row| row.try_get("surface").map_err(StoreError::from))
        .collect()
}

pub async fn progress(
    db: &Database,
    scope: &Scope,
    now: DateTime<Utc>,
) -> Result<ProgressSummary, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN c."paused" = 1 THEN 1 ELSE 0 END), 0) AS "paused",
            COALESCE(SUM(CASE WHEN c."paused" = 0 AND t."tracks" IS NULL THEN 1 ELSE 0 END), 0) AS "new",
            COALESCE(SUM(CASE WHEN c."paused" = 0 AND t."tracks" > 0 AND t."graduated" = t."tracks" THEN 1 ELSE 0 END), 0) AS "mastered",
            COALESCE(SUM(CASE WHEN c."paused" = 0 AND t."tracks" > 0 AND t."graduated" < t."tracks" THEN 1 ELSE 0 END), 0) AS "learning",
            COALESCE(SUM(CASE WHEN c."paused" = 0 THEN COALESCE(t."due", 0) ELSE 0 END), 0) AS "due"
        FROM "concepts" c
        LEFT JOIN (
            SELECT "conceptId",
                   COUNT(*) AS "tracks",
                   SUM(CASE WHEN "tier" = 7 THEN 1 ELSE 0 END) AS "graduated",
                   SUM(CASE WHEN "nextReviewAt" IS NOT NULL AND "nextReviewAt" <= ? THEN 1 ELSE 0 END) AS "due"
            FROM "review_records"
            GROUP BY "conceptId"
        ) t ON t."conceptId" = c."id"
        WHERE c."userId" = ? AND c."language" = ?
        "#,
    )
    .bind(to_millis(now))
    .bind(&scope.user_id)
    .bind(scope.language.code())
    .fetch_one(db.pool())
    .await?;

    Ok(ProgressSummary {
        new: row.try_get("new")?,
        learning: row.try_get("learning")?,
        mastered: row.try_get("mastered")?,
        paused: row.try_get("paused")?,
        due: row.try_get("due")?,
        answered: count_used(db, scope).await?,
    })
}
