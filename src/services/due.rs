use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqliteConnection};

use crate::db::{format_ts, ReviewStore};
use crate::scheduler::{RandomSource, SchedulerError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueCandidate {
    pub record_id: String,
    pub priority: f64,
    pub review_count: i64,
}

/// Picks at most `limit` candidates, highest priority first.
///
/// On overflow the top half is kept as is and the remaining slots are
/// sampled uniformly from everything below it, so low-priority words that
/// have been waiting still surface now and then.
pub fn select_due(
    mut candidates: Vec<DueCandidate>,
    limit: usize,
    rng: &mut dyn RandomSource,
) -> Vec<DueCandidate> {
    sort_by_priority(&mut candidates);
    if candidates.len() <= limit {
        return candidates;
    }

    let top = limit / 2;
    let rest = candidates.split_off(top);
    let mut picked = rng.sample_indices(rest.len(), limit - top);
    picked.sort_unstable();
    picked.dedup();

    let mut rest: Vec<Option<DueCandidate>> = rest.into_iter().map(Some).collect();
    candidates.extend(picked.into_iter().filter_map(|idx| rest.get_mut(idx).and_then(Option::take)));
    candidates
}

pub async fn get_due_words(
    store: &ReviewStore,
    user_id: &str,
    now: DateTime<Utc>,
    limit: usize,
    rng: &mut dyn RandomSource,
) -> Result<Vec<String>, SchedulerError> {
    let mut conn = store.pool().acquire().await?;
    let due = fetch_due_candidates(&mut conn, user_id, now).await?;
    let total = due.len();
    let selected = select_due(due, limit, rng);

    tracing::debug!(user_id = %user_id, total, selected = selected.len(), limit, "due words selected");
    Ok(selected.into_iter().map(|c| c.record_id).collect())
}

pub(crate) async fn fetch_due_candidates(
    conn: &mut SqliteConnection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<DueCandidate>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT "id","priority","review_count" FROM "memory_records"
        WHERE "user_id" = ? AND "next_review" <= ?
        ORDER BY "priority" DESC, "id" ASC
        "#,
    )
    .bind(user_id)
    .bind(format_ts(now))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<DueCandidate, sqlx::Error> {
            Ok(DueCandidate {
                record_id: row.try_get("id")?,
                priority: row.try_get("priority")?,
                review_count: row.try_get("review_count")?,
            })
        })
        .collect()
}

fn sort_by_priority(candidates: &mut [DueCandidate]) {
    candidates.sort_by(|a, b| {
        b.priority
            .total_cmp(&a.priority)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
}
