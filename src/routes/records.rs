use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;

use crate::response::{json_error, ok, AppError};
use crate::services::{due, records};
use crate::state::AppState;

const MAX_DUE_LIMIT: usize = 500;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DueResponse {
    record_ids: Vec<String>,
    limit: usize,
}

pub async fn init_records(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    let mut rng = state.random_source();
    let result = records::initialize_user_records(
        state.store(),
        &user_id,
        state.scheduler().initial_strength,
        Utc::now(),
        &mut rng,
    )
    .await;

    match result {
        Ok(summary) => ok(summary),
        Err(err) => AppError::from(err).into_response(),
    }
}

pub async fn get_record(
    State(state): State<AppState>,
    Path((user_id, word_id)): Path<(String, String)>,
) -> Response {
    match records::get_record(state.store(), &user_id, &word_id).await {
        Ok(record) => ok(record),
        Err(err) => AppError::from(err).into_response(),
    }
}

pub async fn due_words(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let limit = match params.get("limit") {
        None => state.scheduler().daily_review_limit,
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(value) if value <= MAX_DUE_LIMIT => value,
            _ => {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    "VALIDATION_ERROR",
                    format!("limit must be an integer between 0 and {MAX_DUE_LIMIT}"),
                )
                .into_response()
            }
        },
    };

    let mut rng = state.random_source();
    match due::get_due_words(state.store(), &user_id, Utc::now(), limit, &mut rng).await {
        Ok(record_ids) => ok(DueResponse { record_ids, limit }),
        Err(err) => AppError::from(err).into_response(),
    }
}
