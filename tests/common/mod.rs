#![allow(dead_code)]

use axum::Router;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use vocab_review::config::SchedulerConfig;
use vocab_review::db::config::DbConfig;
use vocab_review::db::ReviewStore;
use vocab_review::services::words::{self, Word};
use vocab_review::state::AppState;

/// A store backed by a throwaway database file. Keep the `TempDir` alive
/// for as long as the store is used.
pub async fn create_test_store() -> (TempDir, ReviewStore) {
    let dir = TempDir::new().expect("temp dir");
    let config = DbConfig::at(dir.path().join("review.db"));
    let store = ReviewStore::open(&config).await.expect("open store");
    (dir, store)
}

pub async fn seed_words(store: &ReviewStore, count: usize, now: DateTime<Utc>) -> Vec<Word> {
    let raw = (0..count)
        .map(|i| format!("word{i:03}"))
        .collect::<Vec<_>>()
        .join("\n");
    words::add_words(store, &raw, now).await.expect("seed words")
}

pub fn test_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        daily_review_limit: 20,
        daily_new_words: 5,
        jitter_seed: Some(7),
        ..SchedulerConfig::default()
    }
}

pub async fn create_test_app() -> (TempDir, ReviewStore, Router) {
    let (dir, store) = create_test_store().await;
    let state = AppState::new(store.clone(), test_scheduler_config());
    (dir, store, vocab_review::create_app(state))
}
