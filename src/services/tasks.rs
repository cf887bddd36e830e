use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::db::{format_ts, parse_date, parse_ts, truncate_to_millis, ReviewStore};
use crate::scheduler::{
    DailyTask, FeedbackAction, FeedbackOutcome, RandomSource, SchedulerError, TaskStatus, TaskWord,
    TaskWordStatus,
};
use crate::services::{due, feedback, records};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFeedbackOutcome {
    pub task_id: String,
    pub word_id: String,
    pub word_status: TaskWordStatus,
    pub task_completed: bool,
    #[serde(flatten)]
    pub feedback: FeedbackOutcome,
}

struct TaskHeader {
    user_id: String,
    status: TaskStatus,
}

/// Today's task for `user_id`, created and filled on first call.
///
/// Concurrent callers for the same (user, date) end up with the same task:
/// the unique key decides who inserts, everyone else reloads.
pub async fn generate_daily_task(
    store: &ReviewStore,
    config: &SchedulerConfig,
    user_id: &str,
    date: NaiveDate,
    now: DateTime<Utc>,
    rng: &mut dyn RandomSource,
) -> Result<DailyTask, SchedulerError> {
    let now = truncate_to_millis(now);
    let task_id = get_or_create_task(store, user_id, date, now).await?;

    let mut tx = store.begin_write().await?;
    let header = fetch_task_header(&mut tx, &task_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("task {task_id}")))?;
    let word_count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "task_words" WHERE "task_id" = ?"#)
        .bind(&task_id)
        .fetch_one(&mut *tx)
        .await?;

    if word_count == 0 {
        let added = populate_task(&mut tx, config, &task_id, user_id, now, rng).await?;
        // an empty task completed earlier reopens once it has words
        if added > 0 && header.status == TaskStatus::Completed {
            set_task_status(&mut tx, &task_id, TaskStatus::Created, now).await?;
        }
        tracing::info!(user_id = %user_id, task_id = %task_id, %date, words = added, "daily task populated");
    }
    tx.commit().await?;

    load_task(store, &task_id).await
}

pub async fn get_task(
    store: &ReviewStore,
    user_id: &str,
    task_id: &str,
) -> Result<DailyTask, SchedulerError> {
    let task = load_task(store, task_id).await?;
    if task.user_id != user_id {
        return Err(SchedulerError::NotFound(format!("task {task_id}")));
    }
    Ok(task)
}

/// The task with pending words first, most urgent first.
pub async fn load_task(store: &ReviewStore, task_id: &str) -> Result<DailyTask, SchedulerError> {
    let mut conn = store.pool().acquire().await?;

    let row = sqlx::query(
        r#"SELECT "id","user_id","task_date","status","created_at","updated_at" FROM "daily_tasks" WHERE "id" = ?"#,
    )
    .bind(task_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| SchedulerError::NotFound(format!("task {task_id}")))?;

    let task_date: String = row.try_get("task_date")?;
    let status_raw: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let word_rows = sqlx::query(
        r#"
        SELECT tw."id", tw."record_id", tw."status", r."word_id", r."priority", w."text"
        FROM "task_words" tw
        JOIN "memory_records" r ON r."id" = tw."record_id"
        JOIN "words" w ON w."id" = r."word_id"
        WHERE tw."task_id" = ?
        ORDER BY CASE tw."status" WHEN 'known' THEN 1 ELSE 0 END, r."priority" DESC, tw."id"
        "#,
    )
    .bind(task_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut words = Vec::with_capacity(word_rows.len());
    for word_row in &word_rows {
        let status_raw: String = word_row.try_get("status")?;
        words.push(TaskWord {
            id: word_row.try_get("id")?,
            task_id: task_id.to_string(),
            record_id: word_row.try_get("record_id")?,
            word_id: word_row.try_get("word_id")?,
            word: word_row.try_get("text")?,
            status: parse_word_status(&status_raw)?,
            priority: word_row.try_get("priority")?,
        });
    }

    Ok(DailyTask {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        task_date: parse_date(&task_date)?,
        status: parse_task_status(&status_raw)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        words,
    })
}

/// Marks the task completed once no word is left in `new` or `retry`.
/// Completion is terminal for a task that has words.
pub async fn check_completion(
    store: &ReviewStore,
    task_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, SchedulerError> {
    let now = truncate_to_millis(now);
    let mut tx = store.begin_write().await?;
    let header = fetch_task_header(&mut tx, task_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("task {task_id}")))?;
    if header.status == TaskStatus::Completed {
        return Ok(true);
    }

    let pending: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM "task_words" WHERE "task_id" = ? AND "status" IN ('new', 'retry')"#,
    )
    .bind(task_id)
    .fetch_one(&mut *tx)
    .await?;

    if pending > 0 {
        return Ok(false);
    }

    set_task_status(&mut tx, task_id, TaskStatus::Completed, now).await?;
    tx.commit().await?;
    tracing::info!(task_id = %task_id, user_id = %header.user_id, "daily task completed");
    Ok(true)
}

/// Feedback on one word of a task: updates the memory record, the task
/// word's status and the task's progress in one transaction, then
/// re-evaluates completion.
///
/// Once a task is completed its words are frozen; the memory record is
/// still updated.
pub async fn submit_task_feedback(
    store: &ReviewStore,
    user_id: &str,
    task_id: &str,
    word_id: &str,
    action: FeedbackAction,
    now: DateTime<Utc>,
    rng: &mut dyn RandomSource,
) -> Result<TaskFeedbackOutcome, SchedulerError> {
    let now = truncate_to_millis(now);
    let is_correct = action.is_correct();

    let (task_word_id, record_id) = {
        let mut conn = store.pool().acquire().await?;
        let header = fetch_task_header(&mut conn, task_id).await?;
        if header.map(|h| h.user_id != user_id).unwrap_or(true) {
            return Err(SchedulerError::NotFound(format!("task {task_id}")));
        }
        find_task_word(&mut conn, task_id, word_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("word {word_id} in task {task_id}")))?
    };

    let guard = store.lock_record(&record_id).await;
    let mut tx = store.begin_write().await?;

    let outcome = feedback::apply_in_tx(&mut tx, &record_id, is_correct, now, rng).await?;

    let header = fetch_task_header(&mut tx, task_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("task {task_id}")))?;

    let word_status = if header.status == TaskStatus::Completed {
        let raw: String = sqlx::query_scalar(r#"SELECT "status" FROM "task_words" WHERE "id" = ?"#)
            .bind(&task_word_id)
            .fetch_one(&mut *tx)
            .await?;
        parse_word_status(&raw)?
    } else {
        let status = TaskWordStatus::after_feedback(is_correct);
        sqlx::query(r#"UPDATE "task_words" SET "status" = ?, "updated_at" = ? WHERE "id" = ?"#)
            .bind(status.as_str())
            .bind(format_ts(now))
            .bind(&task_word_id)
            .execute(&mut *tx)
            .await?;
        if header.status == TaskStatus::Created {
            set_task_status(&mut tx, task_id, TaskStatus::InProgress, now).await?;
        }
        status
    };

    tx.commit().await?;
    drop(guard);

    let task_completed = check_completion(store, task_id, now).await?;

    Ok(TaskFeedbackOutcome {
        task_id: task_id.to_string(),
        word_id: word_id.to_string(),
        word_status,
        task_completed,
        feedback: FeedbackOutcome::from(&outcome.record),
    })
}

async fn get_or_create_task(
    store: &ReviewStore,
    user_id: &str,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<String, SchedulerError> {
    let date_key = date.format("%Y-%m-%d").to_string();

    if let Some(id) = find_task_id(store, user_id, &date_key).await? {
        return Ok(id);
    }

    let task_id = Uuid::new_v4().to_string();
    let created = sqlx::query(
        r#"INSERT INTO "daily_tasks" ("id","user_id","task_date","status","created_at","updated_at")
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&task_id)
    .bind(user_id)
    .bind(&date_key)
    .bind(TaskStatus::Created.as_str())
    .bind(format_ts(now))
    .bind(format_ts(now))
    .execute(store.pool())
    .await;

    match created.map_err(SchedulerError::from) {
        Ok(_) => {
            tracing::info!(user_id = %user_id, task_id = %task_id, date = %date_key, "daily task created");
            Ok(task_id)
        }
        Err(SchedulerError::ConstraintViolation(_)) => find_task_id(store, user_id, &date_key)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("task for {date_key}"))),
        Err(err) => Err(err),
    }
}

async fn find_task_id(
    store: &ReviewStore,
    user_id: &str,
    date_key: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(r#"SELECT "id" FROM "daily_tasks" WHERE "user_id" = ? AND "task_date" = ?"#)
        .bind(user_id)
        .bind(date_key)
        .fetch_optional(store.pool())
        .await
}

/// Due words first (capped by the daily review limit), then a quota of
/// never-reviewed words, creating records for unseen catalog words when
/// the user has run out.
async fn populate_task(
    conn: &mut SqliteConnection,
    config: &SchedulerConfig,
    task_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
    rng: &mut dyn RandomSource,
) -> Result<usize, SchedulerError> {
    let candidates = due::fetch_due_candidates(conn, user_id, now).await?;
    let selected = due::select_due(candidates, config.daily_review_limit, rng);

    let mut included: HashSet<String> = HashSet::with_capacity(selected.len() + config.daily_new_words);
    let mut entries: Vec<(String, TaskWordStatus)> = Vec::with_capacity(selected.len() + config.daily_new_words);
    for candidate in selected {
        let status = if candidate.review_count == 0 {
            TaskWordStatus::New
        } else {
            TaskWordStatus::Retry
        };
        included.insert(candidate.record_id.clone());
        entries.push((candidate.record_id, status));
    }

    if config.daily_new_words > 0 {
        let fresh: Vec<String> = sqlx::query_scalar(
            r#"SELECT "id" FROM "memory_records" WHERE "user_id" = ? AND "review_count" = 0
               ORDER BY "created_at", "id" LIMIT ?"#,
        )
        .bind(user_id)
        .bind((config.daily_new_words + included.len()) as i64)
        .fetch_all(&mut *conn)
        .await?;

        let mut new_ids: Vec<String> = fresh
            .into_iter()
            .filter(|id| !included.contains(id))
            .take(config.daily_new_words)
            .collect();

        let missing = config.daily_new_words - new_ids.len();
        if missing > 0 {
            let created = records::create_missing_records(
                conn,
                user_id,
                Some(missing as i64),
                config.initial_strength,
                now,
            )
            .await?;
            new_ids.extend(created.into_iter().map(|r| r.id));
        }

        for id in new_ids {
            if included.insert(id.clone()) {
                entries.push((id, TaskWordStatus::New));
            }
        }
    }

    for (record_id, status) in &entries {
        sqlx::query(
            r#"INSERT OR IGNORE INTO "task_words" ("id","task_id","record_id","status","updated_at")
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(task_id)
        .bind(record_id)
        .bind(status.as_str())
        .bind(format_ts(now))
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query(r#"UPDATE "daily_tasks" SET "updated_at" = ? WHERE "id" = ?"#)
        .bind(format_ts(now))
        .bind(task_id)
        .execute(&mut *conn)
        .await?;

    Ok(entries.len())
}

async fn fetch_task_header(
    conn: &mut SqliteConnection,
    task_id: &str,
) -> Result<Option<TaskHeader>, SchedulerError> {
    let row = sqlx::query(r#"SELECT "user_id","status" FROM "daily_tasks" WHERE "id" = ?"#)
        .bind(task_id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let status_raw: String = row.try_get("status")?;
    Ok(Some(TaskHeader {
        user_id: row.try_get("user_id")?,
        status: parse_task_status(&status_raw)?,
    }))
}

async fn find_task_word(
    conn: &mut SqliteConnection,
    task_id: &str,
    word_id: &str,
) -> Result<Option<(String, String)>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT tw."id", tw."record_id"
        FROM "task_words" tw
        JOIN "memory_records" r ON r."id" = tw."record_id"
        WHERE tw."task_id" = ? AND r."word_id" = ?
        LIMIT 1
        "#,
    )
    .bind(task_id)
    .bind(word_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| -> Result<(String, String), sqlx::Error> {
        Ok((row.try_get("id")?, row.try_get("record_id")?))
    })
    .transpose()
}

async fn set_task_status(
    conn: &mut SqliteConnection,
    task_id: &str,
    status: TaskStatus,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(r#"UPDATE "daily_tasks" SET "status" = ?, "updated_at" = ? WHERE "id" = ?"#)
        .bind(status.as_str())
        .bind(format_ts(now))
        .bind(task_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn parse_task_status(raw: &str) -> Result<TaskStatus, sqlx::Error> {
    TaskStatus::parse(raw).ok_or_else(|| sqlx::Error::Decode(format!("unknown task status {raw:?}").into()))
}

fn parse_word_status(raw: &str) -> Result<TaskWordStatus, sqlx::Error> {
    TaskWordStatus::parse(raw)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown task word status {raw:?}").into()))
}
