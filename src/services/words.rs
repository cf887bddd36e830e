use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::db::{format_ts, parse_ts, truncate_to_millis, ReviewStore};
use crate::scheduler::SchedulerError;

pub const MAX_WORD_LENGTH: usize = 100;
pub const MAX_RATING: i64 = 5;

const WORD_COLUMNS: &str = r#""id","text","definition","example","phonetic","phonetic_uk","phonetic_us","rating","created_at""#;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    pub id: String,
    pub text: String,
    pub definition: String,
    pub example: String,
    pub phonetic: String,
    pub phonetic_uk: String,
    pub phonetic_us: String,
    pub rating: i64,
    pub created_at: DateTime<Utc>,
}

/// Fields written back by dictionary enrichment. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordMetadataUpdate {
    pub definition: Option<String>,
    pub example: Option<String>,
    pub phonetic: Option<String>,
    pub phonetic_uk: Option<String>,
    pub phonetic_us: Option<String>,
    pub rating: Option<i64>,
}

/// One word per line; blank lines and repeats are dropped, order is kept.
pub fn parse_word_lines(raw: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect()
}

/// Get-or-create for every line of `raw`. Returns the words in input order.
pub async fn add_words(
    store: &ReviewStore,
    raw: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Word>, SchedulerError> {
    let texts = parse_word_lines(raw);
    if texts.is_empty() {
        return Err(SchedulerError::Validation("no words supplied".to_string()));
    }
    if let Some(long) = texts.iter().find(|t| t.chars().count() > MAX_WORD_LENGTH) {
        return Err(SchedulerError::Validation(format!(
            "word exceeds {MAX_WORD_LENGTH} characters: {long}"
        )));
    }

    let created_at = format_ts(truncate_to_millis(now));
    let mut tx = store.begin_write().await?;
    let mut words = Vec::with_capacity(texts.len());
    let mut inserted = 0usize;

    for text in &texts {
        let result = sqlx::query(
            r#"INSERT INTO "words" ("id","text","created_at") VALUES (?, ?, ?)
               ON CONFLICT ("text") DO NOTHING"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(text)
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected() as usize;

        let word = fetch_word_by_text(&mut tx, text)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("word {text}")))?;
        words.push(word);
    }

    tx.commit().await?;
    tracing::info!(requested = texts.len(), inserted, "words added");
    Ok(words)
}

pub async fn get_word(store: &ReviewStore, word_id: &str) -> Result<Word, SchedulerError> {
    let mut conn = store.pool().acquire().await?;
    fetch_word(&mut conn, word_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("word {word_id}")))
}

/// Removes a word together with every memory record, review history row
/// and task entry built on it.
pub async fn delete_word(store: &ReviewStore, word_id: &str) -> Result<u64, SchedulerError> {
    let mut tx = store.begin_write().await?;
    let records: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "memory_records" WHERE "word_id" = ?"#)
        .bind(word_id)
        .fetch_one(&mut *tx)
        .await?;

    let result = sqlx::query(r#"DELETE FROM "words" WHERE "id" = ?"#)
        .bind(word_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(SchedulerError::NotFound(format!("word {word_id}")));
    }

    tx.commit().await?;
    tracing::info!(word_id = %word_id, records, "word deleted");
    Ok(records as u64)
}

pub async fn list_words(store: &ReviewStore) -> Result<Vec<Word>, SchedulerError> {
    let sql = format!(r#"SELECT {WORD_COLUMNS} FROM "words" ORDER BY "created_at", "text""#);
    let rows = sqlx::query(&sql).fetch_all(store.pool()).await?;
    rows.iter()
        .map(map_word_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(SchedulerError::from)
}

pub async fn update_word_metadata(
    store: &ReviewStore,
    word_id: &str,
    update: WordMetadataUpdate,
) -> Result<Word, SchedulerError> {
    if let Some(rating) = update.rating {
        if !(0..=MAX_RATING).contains(&rating) {
            return Err(SchedulerError::Validation(format!(
                "rating must be between 0 and {MAX_RATING}"
            )));
        }
    }

    let mut tx = store.begin_write().await?;
    let result = sqlx::query(
        r#"
        UPDATE "words" SET
          "definition" = COALESCE(?, "definition"),
          "example" = COALESCE(?, "example"),
          "phonetic" = COALESCE(?, "phonetic"),
          "phonetic_uk" = COALESCE(?, "phonetic_uk"),
          "phonetic_us" = COALESCE(?, "phonetic_us"),
          "rating" = COALESCE(?, "rating")
        WHERE "id" = ?
        "#,
    )
    .bind(update.definition)
    .bind(update.example)
    .bind(update.phonetic)
    .bind(update.phonetic_uk)
    .bind(update.phonetic_us)
    .bind(update.rating)
    .bind(word_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(SchedulerError::NotFound(format!("word {word_id}")));
    }

    let word = fetch_word(&mut tx, word_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("word {word_id}")))?;
    tx.commit().await?;
    Ok(word)
}

pub(crate) async fn fetch_word(
    conn: &mut SqliteConnection,
    word_id: &str,
) -> Result<Option<Word>, sqlx::Error> {
    let sql = format!(r#"SELECT {WORD_COLUMNS} FROM "words" WHERE "id" = ? LIMIT 1"#);
    let row = sqlx::query(&sql).bind(word_id).fetch_optional(&mut *conn).await?;
    row.as_ref().map(map_word_row).transpose()
}

async fn fetch_word_by_text(
    conn: &mut SqliteConnection,
    text: &str,
) -> Result<Option<Word>, sqlx::Error> {
    let sql = format!(r#"SELECT {WORD_COLUMNS} FROM "words" WHERE "text" = ? LIMIT 1"#);
    let row = sqlx::query(&sql).bind(text).fetch_optional(&mut *conn).await?;
    row.as_ref().map(map_word_row).transpose()
}

fn map_word_row(row: &SqliteRow) -> Result<Word, sqlx::Error> {
    let created_at: String = row.try_get("created_at")?;
    Ok(Word {
        id: row.try_get("id")?,
        text: row.try_get("text")?,
        definition: row.try_get("definition")?,
        example: row.try_get("example")?,
        phonetic: row.try_get("phonetic")?,
        phonetic_uk: row.try_get("phonetic_uk")?,
        phonetic_us: row.try_get("phonetic_us")?,
        rating: row.try_get("rating")?,
        created_at: parse_ts(&created_at)?,
    })
}
