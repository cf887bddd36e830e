use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::db::{truncate_to_millis, ReviewStore};
use crate::scheduler::review::{self, ReviewOutcome};
use crate::scheduler::{FeedbackOutcome, MemoryRecord, RandomSource, SchedulerError};
use crate::services::records;

/// Applies one answer to a record and returns the new snapshot.
///
/// Same-record calls serialize on the record lock and the database write
/// lock; the `version` check guards against writers outside this process.
/// Nothing is written unless every step succeeds.
pub async fn process_feedback(
    store: &ReviewStore,
    record_id: &str,
    is_correct: bool,
    now: DateTime<Utc>,
    rng: &mut dyn RandomSource,
) -> Result<MemoryRecord, SchedulerError> {
    let now = truncate_to_millis(now);
    let _guard = store.lock_record(record_id).await;

    let mut tx = store.begin_write().await?;
    let outcome = apply_in_tx(&mut tx, record_id, is_correct, now, rng).await?;
    tx.commit().await?;

    tracing::debug!(
        record_id = %record_id,
        is_correct,
        review_count = outcome.record.review_count,
        interval_days = outcome.interval_days,
        phase = %outcome.record.memory_phase,
        "feedback applied"
    );
    Ok(outcome.record)
}

/// Feedback keyed by (user, word); the record is created on first use.
pub async fn record_feedback(
    store: &ReviewStore,
    user_id: &str,
    word_id: &str,
    is_correct: bool,
    initial_strength: f64,
    now: DateTime<Utc>,
    rng: &mut dyn RandomSource,
) -> Result<FeedbackOutcome, SchedulerError> {
    let record = records::ensure_record(store, user_id, word_id, initial_strength, now).await?;
    let updated = process_feedback(store, &record.id, is_correct, now, rng).await?;
    Ok(FeedbackOutcome::from(&updated))
}

/// Read-modify-write of one record inside the caller's write transaction.
pub(crate) async fn apply_in_tx(
    conn: &mut SqliteConnection,
    record_id: &str,
    is_correct: bool,
    now: DateTime<Utc>,
    rng: &mut dyn RandomSource,
) -> Result<ReviewOutcome, SchedulerError> {
    let current = records::fetch_record(conn, record_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("memory record {record_id}")))?;

    let outcome = review::apply_feedback(&current, is_correct, now, rng);
    records::persist_review(conn, &current, &outcome).await?;
    Ok(outcome)
}
