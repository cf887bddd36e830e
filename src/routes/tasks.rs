use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::response::{json_error, ok, AppError};
use crate::scheduler::FeedbackAction;
use crate::services::tasks;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskFeedbackRequest {
    task_id: String,
    word_id: String,
    action: String,
}

pub async fn today(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let now = Utc::now();
    let date = match params.get("date") {
        None => now.date_naive(),
        Some(raw) => match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
            Ok(date) => date,
            Err(_) => {
                return json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "date must be YYYY-MM-DD")
                    .into_response()
            }
        },
    };

    let mut rng = state.random_source();
    match tasks::generate_daily_task(state.store(), state.scheduler(), &user_id, date, now, &mut rng).await {
        Ok(task) => ok(task),
        Err(err) => AppError::from(err).into_response(),
    }
}

pub async fn get_task(
    State(state): State<AppState>,
    Path((user_id, task_id)): Path<(String, String)>,
) -> Response {
    match tasks::get_task(state.store(), &user_id, &task_id).await {
        Ok(task) => ok(task),
        Err(err) => AppError::from(err).into_response(),
    }
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Response {
    let payload: TaskFeedbackRequest = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "invalid request body")
                .into_response()
        }
    };

    let action: FeedbackAction = match payload.action.parse() {
        Ok(action) => action,
        Err(err) => return AppError::from(err).into_response(),
    };

    let mut rng = state.random_source();
    let result = tasks::submit_task_feedback(
        state.store(),
        &user_id,
        &payload.task_id,
        &payload.word_id,
        action,
        Utc::now(),
        &mut rng,
    )
    .await;

    match result {
        Ok(outcome) => ok(outcome),
        Err(err) => {
            if err.is_retryable() {
                tracing::debug!(user_id = %user_id, task_id = %payload.task_id, error = %err, "task feedback conflict");
            }
            AppError::from(err).into_response()
        }
    }
}
