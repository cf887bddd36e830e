use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::db::{format_ts, parse_ts, truncate_to_millis, ReviewStore};
use crate::scheduler::review::ReviewOutcome;
use crate::scheduler::{scorer, HistoryEntry, HistoryLog, MemoryPhase, MemoryRecord, RandomSource, SchedulerError};

const RECORD_COLUMNS: &str = r#""id","user_id","word_id","memory_strength","initial_strength","correct_streak","error_count","review_count","priority","memory_phase","next_review","last_review","version","created_at""#;

/// Never-reviewed words are first shown between one and three days after
/// bulk initialization.
const INITIAL_DELAY_DAYS: (i64, i64) = (1, 3);

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSummary {
    pub created: usize,
    pub scheduled: usize,
}

pub async fn get_record(
    store: &ReviewStore,
    user_id: &str,
    word_id: &str,
) -> Result<MemoryRecord, SchedulerError> {
    let mut conn = store.pool().acquire().await?;
    fetch_record_by_word(&mut conn, user_id, word_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("memory record for word {word_id}")))
}

pub async fn get_record_by_id(
    store: &ReviewStore,
    record_id: &str,
) -> Result<MemoryRecord, SchedulerError> {
    let mut conn = store.pool().acquire().await?;
    fetch_record(&mut conn, record_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("memory record {record_id}")))
}

/// Returns the user's record for `word_id`, creating it on first use.
pub async fn ensure_record(
    store: &ReviewStore,
    user_id: &str,
    word_id: &str,
    initial_strength: f64,
    now: DateTime<Utc>,
) -> Result<MemoryRecord, SchedulerError> {
    {
        let mut conn = store.pool().acquire().await?;
        if let Some(record) = fetch_record_by_word(&mut conn, user_id, word_id).await? {
            return Ok(record);
        }
    }

    let mut tx = store.begin_write().await?;
    if !word_exists(&mut tx, word_id).await? {
        return Err(SchedulerError::NotFound(format!("word {word_id}")));
    }
    let record = MemoryRecord::new(user_id, word_id, initial_strength, truncate_to_millis(now));
    // a concurrent creator may have won; the reload below picks its row up
    insert_record(&mut tx, &record).await?;
    let stored = fetch_record_by_word(&mut tx, user_id, word_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("memory record for word {word_id}")))?;
    tx.commit().await?;
    Ok(stored)
}

/// Creates records for every catalog word the user lacks, then spreads all
/// never-reviewed records over the next few days.
pub async fn initialize_user_records(
    store: &ReviewStore,
    user_id: &str,
    initial_strength: f64,
    now: DateTime<Utc>,
    rng: &mut dyn RandomSource,
) -> Result<InitSummary, SchedulerError> {
    let now = truncate_to_millis(now);
    let mut tx = store.begin_write().await?;

    let created = create_missing_records(&mut tx, user_id, None, initial_strength, now).await?;

    let fresh: Vec<String> = sqlx::query_scalar(
        r#"SELECT "id" FROM "memory_records" WHERE "user_id" = ? AND "review_count" = 0 ORDER BY "created_at", "id""#,
    )
    .bind(user_id)
    .fetch_all(&mut *tx)
    .await?;

    for record_id in &fresh {
        let delay = rng.int_inclusive(INITIAL_DELAY_DAYS.0, INITIAL_DELAY_DAYS.1);
        sqlx::query(
            r#"UPDATE "memory_records" SET "next_review" = ?, "version" = "version" + 1 WHERE "id" = ?"#,
        )
        .bind(format_ts(now + Duration::days(delay)))
        .bind(record_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let summary = InitSummary {
        created: created.len(),
        scheduled: fresh.len(),
    };
    tracing::info!(
        user_id = %user_id,
        created = summary.created,
        scheduled = summary.scheduled,
        "initial schedule computed"
    );
    Ok(summary)
}

/// Recomputes stored priorities so the time factor reflects `now`.
/// Counters and history are not touched.
pub async fn refresh_priorities(
    store: &ReviewStore,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<usize, SchedulerError> {
    let mut tx = store.begin_write().await?;
    let sql = format!(r#"SELECT {RECORD_COLUMNS} FROM "memory_records" WHERE "user_id" = ?"#);
    let rows = sqlx::query(&sql).bind(user_id).fetch_all(&mut *tx).await?;

    let mut updated = 0usize;
    for row in &rows {
        let record = map_record_row(row)?;
        let priority = scorer::calculate_priority(&record, now);
        if (priority - record.priority).abs() < 1e-9 {
            continue;
        }
        let result = sqlx::query(
            r#"UPDATE "memory_records" SET "priority" = ?, "version" = "version" + 1
               WHERE "id" = ? AND "version" = ?"#,
        )
        .bind(priority)
        .bind(&record.id)
        .bind(record.version)
        .execute(&mut *tx)
        .await?;
        updated += result.rows_affected() as usize;
    }

    tx.commit().await?;
    Ok(updated)
}

pub async fn list_user_ids(store: &ReviewStore) -> Result<Vec<String>, SchedulerError> {
    let ids = sqlx::query_scalar(r#"SELECT DISTINCT "user_id" FROM "memory_records" ORDER BY "user_id""#)
        .fetch_all(store.pool())
        .await?;
    Ok(ids)
}

pub(crate) async fn fetch_record(
    conn: &mut SqliteConnection,
    record_id: &str,
) -> Result<Option<MemoryRecord>, sqlx::Error> {
    let sql = format!(r#"SELECT {RECORD_COLUMNS} FROM "memory_records" WHERE "id" = ? LIMIT 1"#);
    let Some(row) = sqlx::query(&sql).bind(record_id).fetch_optional(&mut *conn).await? else {
        return Ok(None);
    };
    let mut record = map_record_row(&row)?;
    record.history_intervals = fetch_history(conn, &record.id).await?;
    Ok(Some(record))
}

pub(crate) async fn fetch_record_by_word(
    conn: &mut SqliteConnection,
    user_id: &str,
    word_id: &str,
) -> Result<Option<MemoryRecord>, sqlx::Error> {
    let sql = format!(
        r#"SELECT {RECORD_COLUMNS} FROM "memory_records" WHERE "user_id" = ? AND "word_id" = ? LIMIT 1"#
    );
    let Some(row) = sqlx::query(&sql)
        .bind(user_id)
        .bind(word_id)
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };
    let mut record = map_record_row(&row)?;
    record.history_intervals = fetch_history(conn, &record.id).await?;
    Ok(Some(record))
}

pub(crate) async fn fetch_history(
    conn: &mut SqliteConnection,
    record_id: &str,
) -> Result<HistoryLog, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "reviewed_at","interval_days","correct","strength"
           FROM "review_history" WHERE "record_id" = ? ORDER BY "seq""#,
    )
    .bind(record_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<HistoryEntry, sqlx::Error> {
            let reviewed_at: String = row.try_get("reviewed_at")?;
            Ok(HistoryEntry {
                date: parse_ts(&reviewed_at)?,
                interval: row.try_get("interval_days")?,
                correct: row.try_get("correct")?,
                strength: row.try_get("strength")?,
            })
        })
        .collect()
}

/// Inserts a new record; returns `false` when the (user, word) pair exists.
pub(crate) async fn insert_record(
    conn: &mut SqliteConnection,
    record: &MemoryRecord,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO "memory_records"
          ("id","user_id","word_id","memory_strength","initial_strength","correct_streak",
           "error_count","review_count","priority","memory_phase","next_review","last_review",
           "version","created_at")
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT ("user_id","word_id") DO NOTHING
        "#,
    )
    .bind(&record.id)
    .bind(&record.user_id)
    .bind(&record.word_id)
    .bind(record.memory_strength)
    .bind(record.initial_strength)
    .bind(record.correct_streak)
    .bind(record.error_count)
    .bind(record.review_count)
    .bind(record.priority)
    .bind(record.memory_phase.as_str())
    .bind(format_ts(record.next_review))
    .bind(format_ts(record.last_review))
    .bind(record.version)
    .bind(format_ts(record.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Writes the post-answer snapshot and appends its history entry. Fails
/// with a conflict when the row moved on since `before` was read.
pub(crate) async fn persist_review(
    conn: &mut SqliteConnection,
    before: &MemoryRecord,
    outcome: &ReviewOutcome,
) -> Result<(), SchedulerError> {
    let after = &outcome.record;
    let result = sqlx::query(
        r#"
        UPDATE "memory_records" SET
          "memory_strength" = ?, "correct_streak" = ?, "error_count" = ?, "review_count" = ?,
          "priority" = ?, "memory_phase" = ?, "next_review" = ?, "last_review" = ?, "version" = ?
        WHERE "id" = ? AND "version" = ?
        "#,
    )
    .bind(after.memory_strength)
    .bind(after.correct_streak)
    .bind(after.error_count)
    .bind(after.review_count)
    .bind(after.priority)
    .bind(after.memory_phase.as_str())
    .bind(format_ts(after.next_review))
    .bind(format_ts(after.last_review))
    .bind(after.version)
    .bind(&after.id)
    .bind(before.version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(SchedulerError::ConcurrentUpdateConflict(format!(
            "memory record {} changed since version {}",
            before.id, before.version
        )));
    }

    sqlx::query(
        r#"INSERT INTO "review_history" ("record_id","seq","reviewed_at","interval_days","correct","strength")
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&after.id)
    .bind(after.review_count)
    .bind(format_ts(outcome.entry.date))
    .bind(outcome.entry.interval)
    .bind(outcome.entry.correct)
    .bind(outcome.entry.strength)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Creates records for catalog words the user has never been scheduled,
/// oldest words first. `limit = None` means all of them.
pub(crate) async fn create_missing_records(
    conn: &mut SqliteConnection,
    user_id: &str,
    limit: Option<i64>,
    initial_strength: f64,
    now: DateTime<Utc>,
) -> Result<Vec<MemoryRecord>, sqlx::Error> {
    let word_ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT w."id" FROM "words" w
        WHERE NOT EXISTS (
          SELECT 1 FROM "memory_records" r WHERE r."user_id" = ? AND r."word_id" = w."id"
        )
        ORDER BY w."created_at", w."id"
        LIMIT ?
        "#,
    )
    .bind(user_id)
    .bind(limit.unwrap_or(-1))
    .fetch_all(&mut *conn)
    .await?;

    let mut created = Vec::with_capacity(word_ids.len());
    for word_id in word_ids {
        let record = MemoryRecord::new(user_id, word_id, initial_strength, now);
        if insert_record(conn, &record).await? {
            created.push(record);
        }
    }
    Ok(created)
}

pub(crate) async fn word_exists(conn: &mut SqliteConnection, word_id: &str) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar(r#"SELECT 1 FROM "words" WHERE "id" = ?"#)
        .bind(word_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

fn map_record_row(row: &SqliteRow) -> Result<MemoryRecord, sqlx::Error> {
    let phase_raw: String = row.try_get("memory_phase")?;
    let memory_phase = MemoryPhase::parse(&phase_raw)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown memory phase {phase_raw:?}").into()))?;
    let next_review: String = row.try_get("next_review")?;
    let last_review: String = row.try_get("last_review")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(MemoryRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        word_id: row.try_get("word_id")?,
        memory_strength: row.try_get("memory_strength")?,
        initial_strength: row.try_get("initial_strength")?,
        correct_streak: row.try_get("correct_streak")?,
        error_count: row.try_get("error_count")?,
        review_count: row.try_get("review_count")?,
        priority: row.try_get("priority")?,
        memory_phase,
        next_review: parse_ts(&next_review)?,
        last_review: parse_ts(&last_review)?,
        version: row.try_get("version")?,
        created_at: parse_ts(&created_at)?,
        history_intervals: HistoryLog::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::DbConfig;
    use crate::scheduler::{review, FixedSource};
    use crate::services::{feedback, words};
    use chrono::TimeZone;

    async fn history_rows(store: &ReviewStore, record_id: &str) -> i64 {
        sqlx::query_scalar(r#"SELECT COUNT(*) FROM "review_history" WHERE "record_id" = ?"#)
            .bind(record_id)
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn stale_version_is_rejected_and_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReviewStore::open(&DbConfig::at(dir.path().join("review.db"))).await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();

        let word = words::add_words(&store, "apple", now).await.unwrap().remove(0);
        let record = ensure_record(&store, "u1", &word.id, 3.0, now).await.unwrap();
        feedback::process_feedback(&store, &record.id, true, now, &mut FixedSource::neutral())
            .await
            .unwrap();

        let before = get_record_by_id(&store, &record.id).await.unwrap();
        let later = now + Duration::days(1);
        let outcome = review::apply_feedback(&before, false, later, &mut FixedSource::neutral());

        // another writer moves the row on after the snapshot was taken
        sqlx::query(r#"UPDATE "memory_records" SET "version" = "version" + 1 WHERE "id" = ?"#)
            .bind(&record.id)
            .execute(store.pool())
            .await
            .unwrap();

        let mut tx = store.begin_write().await.unwrap();
        let err = persist_review(&mut tx, &before, &outcome).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ConcurrentUpdateConflict(_)));
        assert!(err.is_retryable());
        drop(tx);

        let after = get_record_by_id(&store, &record.id).await.unwrap();
        assert_eq!(after.review_count, 1);
        assert_eq!(after.error_count, 0);
        assert_eq!(after.version, before.version + 1);
        assert_eq!(after.history_intervals.len(), 1);
        assert_eq!(history_rows(&store, &record.id).await, 1);
    }
}
