use std::collections::HashSet;

use chrono::{Duration, NaiveDate, TimeZone, Utc};

use vocab_review::scheduler::{
    FeedbackAction, FixedSource, MemoryPhase, RngSource, SchedulerError, TaskStatus, TaskWordStatus,
};
use vocab_review::services::words::WordMetadataUpdate;
use vocab_review::services::{due, feedback, records, tasks, words};

mod common;

fn at(day: u32, hour: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

fn task_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 20).unwrap()
}

async fn count_rows(store: &vocab_review::db::ReviewStore, table: &str, column: &str, id: &str) -> i64 {
    let sql = format!(r#"SELECT COUNT(*) FROM "{table}" WHERE "{column}" = ?"#);
    sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_one(store.pool())
        .await
        .unwrap()
}

// ============================================================================
// Words
// ============================================================================

#[tokio::test]
async fn add_words_is_get_or_create() {
    let (_dir, store) = common::create_test_store().await;
    let now = at(1, 8);

    let first = words::add_words(&store, "apple\n\n  banana \napple\n", now).await.unwrap();
    assert_eq!(first.iter().map(|w| w.text.as_str()).collect::<Vec<_>>(), ["apple", "banana"]);

    let second = words::add_words(&store, "banana\ncherry", now).await.unwrap();
    assert_eq!(second[0].id, first[1].id);
    assert_eq!(words::list_words(&store).await.unwrap().len(), 3);

    let err = words::add_words(&store, "  \n ", now).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Validation(_)));
}

#[tokio::test]
async fn metadata_update_validates_rating() {
    let (_dir, store) = common::create_test_store().await;
    let word = common::seed_words(&store, 1, at(1, 8)).await.remove(0);

    let updated = words::update_word_metadata(
        &store,
        &word.id,
        WordMetadataUpdate {
            definition: Some("a fruit".to_string()),
            rating: Some(4),
            ..WordMetadataUpdate::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(updated.definition, "a fruit");
    assert_eq!(updated.rating, 4);
    assert_eq!(updated.example, "");

    let bad = WordMetadataUpdate {
        rating: Some(6),
        ..WordMetadataUpdate::default()
    };
    let err = words::update_word_metadata(&store, &word.id, bad).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Validation(_)));

    let err = words::update_word_metadata(&store, "missing", WordMetadataUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));
}

#[tokio::test]
async fn deleting_a_word_cascades_to_its_schedule() {
    let (_dir, store) = common::create_test_store().await;
    let config = common::test_scheduler_config();
    common::seed_words(&store, 2, at(1, 8)).await;
    let now = at(20, 7);
    let mut rng = RngSource::seeded(6);

    let task = tasks::generate_daily_task(&store, &config, "u1", task_date(), now, &mut rng).await.unwrap();
    assert_eq!(task.words.len(), 2);
    let doomed = &task.words[0];
    let kept = &task.words[1];
    tasks::submit_task_feedback(&store, "u1", &task.id, &doomed.word_id, FeedbackAction::Forget, now, &mut rng)
        .await
        .unwrap();

    let removed = words::delete_word(&store, &doomed.word_id).await.unwrap();
    assert_eq!(removed, 1);

    assert_eq!(count_rows(&store, "memory_records", "id", &doomed.record_id).await, 0);
    assert_eq!(count_rows(&store, "task_words", "record_id", &doomed.record_id).await, 0);
    assert_eq!(count_rows(&store, "review_history", "record_id", &doomed.record_id).await, 0);

    let err = words::get_word(&store, &doomed.word_id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));
    let err = words::delete_word(&store, &doomed.word_id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));

    let remaining = tasks::get_task(&store, "u1", &task.id).await.unwrap();
    assert_eq!(remaining.words.len(), 1);
    assert_eq!(remaining.words[0].word_id, kept.word_id);
    assert_eq!(words::get_word(&store, &kept.word_id).await.unwrap().id, kept.word_id);
}

// ============================================================================
// Feedback
// ============================================================================

#[tokio::test]
async fn first_correct_answer_is_persisted() {
    let (_dir, store) = common::create_test_store().await;
    let now = at(2, 9);
    let word = common::seed_words(&store, 1, now).await.remove(0);

    let outcome = feedback::record_feedback(&store, "u1", &word.id, true, 3.0, now, &mut FixedSource::neutral())
        .await
        .unwrap();
    assert_eq!(outcome.phase, MemoryPhase::Initial);
    assert_eq!(outcome.next_review, now + Duration::days(1));

    let record = records::get_record(&store, "u1", &word.id).await.unwrap();
    assert_eq!(record.review_count, 1);
    assert_eq!(record.correct_streak, 1);
    assert_eq!(record.error_count, 0);
    assert_eq!(record.history_intervals.len(), 1);
    assert_eq!(record.history_intervals.last().unwrap().interval, 1.0);
    assert_eq!(record.last_review, now);
}

#[tokio::test]
async fn four_correct_answers_reach_mastery() {
    let (_dir, store) = common::create_test_store().await;
    let word = common::seed_words(&store, 1, at(1, 8)).await.remove(0);
    let mut rng = RngSource::seeded(11);

    let mut outcome = None;
    for day in 2..6 {
        outcome = Some(
            feedback::record_feedback(&store, "u1", &word.id, true, 3.0, at(day, 8), &mut rng)
                .await
                .unwrap(),
        );
    }
    assert_eq!(outcome.unwrap().phase, MemoryPhase::Mastered);

    let record = records::get_record(&store, "u1", &word.id).await.unwrap();
    assert_eq!(record.review_count, 4);
    assert_eq!(record.history_intervals.len(), 4);
    assert!(record.history_intervals.iter().all(|entry| entry.correct));
}

#[tokio::test]
async fn feedback_for_missing_record_or_word_fails() {
    let (_dir, store) = common::create_test_store().await;

    let err = feedback::process_feedback(&store, "nope", true, at(1, 8), &mut FixedSource::neutral())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));

    let err = feedback::record_feedback(&store, "u1", "nope", true, 3.0, at(1, 8), &mut FixedSource::neutral())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_feedback_on_one_record_is_serialized() {
    let (_dir, store) = common::create_test_store().await;
    let now = at(3, 10);
    let word = common::seed_words(&store, 1, now).await.remove(0);
    let record = records::ensure_record(&store, "u1", &word.id, 3.0, now).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8u64 {
        let store = store.clone();
        let record_id = record.id.clone();
        handles.push(tokio::spawn(async move {
            let mut rng = RngSource::seeded(i);
            feedback::process_feedback(&store, &record_id, i % 3 != 0, now, &mut rng).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = records::get_record_by_id(&store, &record.id).await.unwrap();
    assert_eq!(stored.review_count, 8);
    assert_eq!(stored.version, 8);
    assert_eq!(stored.history_intervals.len(), 8);
    assert_eq!(stored.history_intervals.iter().filter(|e| !e.correct).count(), 3);
}

// ============================================================================
// Due selection
// ============================================================================

#[tokio::test]
async fn fifty_due_with_limit_twenty() {
    let (_dir, store) = common::create_test_store().await;
    let created = at(1, 8);
    let seeded = common::seed_words(&store, 50, created).await;

    let mut all = Vec::new();
    for word in &seeded {
        all.push(records::ensure_record(&store, "u1", &word.id, 3.0, created).await.unwrap());
    }
    all.sort_by(|a, b| b.priority.total_cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
    let expected_top: Vec<String> = all[..10].iter().map(|r| r.id.clone()).collect();

    let picked = due::get_due_words(&store, "u1", at(2, 8), 20, &mut RngSource::seeded(3))
        .await
        .unwrap();
    assert_eq!(picked.len(), 20);
    assert_eq!(picked[..10], expected_top[..]);
    assert_eq!(picked.iter().collect::<HashSet<_>>().len(), 20);

    let other = due::get_due_words(&store, "u2", at(2, 8), 20, &mut RngSource::seeded(3))
        .await
        .unwrap();
    assert!(other.is_empty());
}

// ============================================================================
// Initialization and refresh
// ============================================================================

#[tokio::test]
async fn initialize_spreads_new_records_over_the_next_days() {
    let (_dir, store) = common::create_test_store().await;
    let now = at(5, 12);
    common::seed_words(&store, 6, at(1, 8)).await;

    let summary = records::initialize_user_records(&store, "u1", 3.0, now, &mut FixedSource::neutral())
        .await
        .unwrap();
    assert_eq!(summary.created, 6);
    assert_eq!(summary.scheduled, 6);

    let due_now = due::get_due_words(&store, "u1", now, 10, &mut FixedSource::neutral())
        .await
        .unwrap();
    assert!(due_now.is_empty());

    let due_later = due::get_due_words(&store, "u1", now + Duration::days(1), 10, &mut FixedSource::neutral())
        .await
        .unwrap();
    assert_eq!(due_later.len(), 6);

    let again = records::initialize_user_records(&store, "u1", 3.0, now, &mut FixedSource::neutral())
        .await
        .unwrap();
    assert_eq!(again.created, 0);
}

#[tokio::test]
async fn refresh_raises_priority_of_stale_records() {
    let (_dir, store) = common::create_test_store().await;
    let now = at(1, 8);
    let word = common::seed_words(&store, 1, now).await.remove(0);
    let before = records::ensure_record(&store, "u1", &word.id, 3.0, now).await.unwrap();

    let updated = records::refresh_priorities(&store, "u1", now + Duration::days(10)).await.unwrap();
    assert_eq!(updated, 1);

    let after = records::get_record(&store, "u1", &word.id).await.unwrap();
    assert!(after.priority > before.priority);
    assert_eq!(after.review_count, 0);
    assert_eq!(records::list_user_ids(&store).await.unwrap(), vec!["u1".to_string()]);
}

// ============================================================================
// Daily tasks
// ============================================================================

#[tokio::test]
async fn daily_task_is_idempotent() {
    let (_dir, store) = common::create_test_store().await;
    let config = common::test_scheduler_config();
    common::seed_words(&store, 12, at(1, 8)).await;
    let now = at(20, 7);

    let first = tasks::generate_daily_task(&store, &config, "u1", task_date(), now, &mut RngSource::seeded(1))
        .await
        .unwrap();
    assert_eq!(first.words.len(), config.daily_new_words);
    assert!(first.words.iter().all(|w| w.status == TaskWordStatus::New));
    assert_eq!(first.status, TaskStatus::Created);

    let second = tasks::generate_daily_task(&store, &config, "u1", task_date(), now, &mut RngSource::seeded(2))
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    let ids = |t: &vocab_review::scheduler::DailyTask| t.words.iter().map(|w| w.id.clone()).collect::<HashSet<_>>();
    assert_eq!(ids(&first), ids(&second));

    let next_day = tasks::generate_daily_task(
        &store,
        &config,
        "u1",
        task_date().succ_opt().unwrap(),
        now + Duration::days(1),
        &mut RngSource::seeded(3),
    )
    .await
    .unwrap();
    assert_ne!(next_day.id, first.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_generation_yields_one_task() {
    let (_dir, store) = common::create_test_store().await;
    let config = common::test_scheduler_config();
    common::seed_words(&store, 12, at(1, 8)).await;
    let now = at(20, 7);

    let mut handles = Vec::new();
    for i in 0..4u64 {
        let store = store.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            tasks::generate_daily_task(&store, &config, "u1", task_date(), now, &mut RngSource::seeded(i)).await
        }));
    }

    let mut task_ids = HashSet::new();
    for handle in handles {
        let task = handle.await.unwrap().unwrap();
        assert_eq!(task.words.len(), config.daily_new_words);
        task_ids.insert(task.id);
    }
    assert_eq!(task_ids.len(), 1);
}

#[tokio::test]
async fn due_words_enter_the_task_before_new_ones() {
    let (_dir, store) = common::create_test_store().await;
    let config = common::test_scheduler_config();
    let seeded = common::seed_words(&store, 12, at(1, 8)).await;

    let reviewed = records::ensure_record(&store, "u1", &seeded[0].id, 3.0, at(1, 8)).await.unwrap();
    feedback::process_feedback(&store, &reviewed.id, false, at(2, 8), &mut FixedSource::neutral())
        .await
        .unwrap();
    let untouched = records::ensure_record(&store, "u1", &seeded[1].id, 3.0, at(1, 8)).await.unwrap();

    let task = tasks::generate_daily_task(&store, &config, "u1", task_date(), at(20, 7), &mut RngSource::seeded(5))
        .await
        .unwrap();

    let status_of = |record_id: &str| {
        task.words
            .iter()
            .find(|w| w.record_id == record_id)
            .map(|w| w.status)
    };
    assert_eq!(status_of(&reviewed.id), Some(TaskWordStatus::Retry));
    assert_eq!(status_of(&untouched.id), Some(TaskWordStatus::New));
    assert_eq!(task.words.len(), 2 + config.daily_new_words);
    assert_eq!(
        task.words.iter().map(|w| w.record_id.clone()).collect::<HashSet<_>>().len(),
        task.words.len()
    );
}

#[tokio::test]
async fn task_feedback_drives_completion() {
    let (_dir, store) = common::create_test_store().await;
    let config = common::test_scheduler_config();
    common::seed_words(&store, 3, at(1, 8)).await;
    let now = at(20, 7);
    let mut rng = RngSource::seeded(9);

    let task = tasks::generate_daily_task(&store, &config, "u1", task_date(), now, &mut rng).await.unwrap();
    assert_eq!(task.words.len(), 3);
    assert!(!tasks::check_completion(&store, &task.id, now).await.unwrap());

    let first = &task.words[0];
    let outcome = tasks::submit_task_feedback(&store, "u1", &task.id, &first.word_id, FeedbackAction::Forget, now, &mut rng)
        .await
        .unwrap();
    assert_eq!(outcome.word_status, TaskWordStatus::Retry);
    assert!(!outcome.task_completed);
    assert_eq!(tasks::get_task(&store, "u1", &task.id).await.unwrap().status, TaskStatus::InProgress);

    let mut last = None;
    for word in &task.words {
        last = Some(
            tasks::submit_task_feedback(&store, "u1", &task.id, &word.word_id, FeedbackAction::Know, now, &mut rng)
                .await
                .unwrap(),
        );
    }
    let last = last.unwrap();
    assert_eq!(last.word_status, TaskWordStatus::Known);
    assert!(last.task_completed);

    let done = tasks::get_task(&store, "u1", &task.id).await.unwrap();
    assert!(done.is_completed());
    assert_eq!(done.pending_count(), 0);
    assert_eq!(done.updated_at, now);

    // completed tasks stay completed; the memory record still moves
    let after = tasks::submit_task_feedback(&store, "u1", &task.id, &first.word_id, FeedbackAction::Forget, now, &mut rng)
        .await
        .unwrap();
    assert!(after.task_completed);
    assert_eq!(after.word_status, TaskWordStatus::Known);
    let record = records::get_record_by_id(&store, &first.record_id).await.unwrap();
    assert_eq!(record.review_count, 3);
}

#[tokio::test]
async fn task_feedback_rejects_foreign_words_and_users() {
    let (_dir, store) = common::create_test_store().await;
    let config = common::test_scheduler_config();
    let seeded = common::seed_words(&store, 8, at(1, 8)).await;
    let now = at(20, 7);
    let mut rng = RngSource::seeded(4);

    let task = tasks::generate_daily_task(&store, &config, "u1", task_date(), now, &mut rng).await.unwrap();
    let in_task: HashSet<&str> = task.words.iter().map(|w| w.word_id.as_str()).collect();
    let outsider = seeded.iter().find(|w| !in_task.contains(w.id.as_str())).unwrap();

    let err = tasks::submit_task_feedback(&store, "u1", &task.id, &outsider.id, FeedbackAction::Know, now, &mut rng)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));

    let err = tasks::submit_task_feedback(&store, "u2", &task.id, &task.words[0].word_id, FeedbackAction::Know, now, &mut rng)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));

    let err = tasks::get_task(&store, "u2", &task.id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));
}

#[tokio::test]
async fn empty_task_completes_immediately() {
    let (_dir, store) = common::create_test_store().await;
    let config = common::test_scheduler_config();

    let now = at(20, 7);

    let task = tasks::generate_daily_task(&store, &config, "u1", task_date(), now, &mut FixedSource::neutral())
        .await
        .unwrap();
    assert!(task.words.is_empty());
    assert!(tasks::check_completion(&store, &task.id, now).await.unwrap());
    let completed = tasks::get_task(&store, "u1", &task.id).await.unwrap();
    assert!(completed.is_completed());
    assert_eq!(completed.updated_at, now);

    let err = tasks::check_completion(&store, "missing", at(20, 7)).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));
}

#[tokio::test]
async fn empty_completed_task_is_filled_once_words_exist() {
    let (_dir, store) = common::create_test_store().await;
    let config = common::test_scheduler_config();
    let now = at(20, 7);

    let empty = tasks::generate_daily_task(&store, &config, "u1", task_date(), now, &mut FixedSource::neutral())
        .await
        .unwrap();
    assert!(tasks::check_completion(&store, &empty.id, now).await.unwrap());

    common::seed_words(&store, 5, now).await;
    let later = now + Duration::hours(1);
    let refilled = tasks::generate_daily_task(&store, &config, "u1", task_date(), later, &mut FixedSource::neutral())
        .await
        .unwrap();
    assert_eq!(refilled.id, empty.id);
    assert_eq!(refilled.words.len(), 5);
    assert_eq!(refilled.status, TaskStatus::Created);
    assert!(!tasks::check_completion(&store, &refilled.id, later).await.unwrap());
}
