use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::response::{created, json_error, ok, AppError};
use crate::services::words::{self, WordMetadataUpdate};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeletedWord {
    id: String,
    removed_records: u64,
}

#[derive(Debug, Deserialize)]
struct AddWordsRequest {
    words: String,
}

pub async fn add_words(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: AddWordsRequest = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "invalid request body")
                .into_response()
        }
    };

    match words::add_words(state.store(), &payload.words, Utc::now()).await {
        Ok(words) => created(words),
        Err(err) => AppError::from(err).into_response(),
    }
}

pub async fn list_words(State(state): State<AppState>) -> Response {
    match words::list_words(state.store()).await {
        Ok(words) => ok(words),
        Err(err) => AppError::from(err).into_response(),
    }
}

pub async fn get_word(State(state): State<AppState>, Path(word_id): Path<String>) -> Response {
    match words::get_word(state.store(), &word_id).await {
        Ok(word) => ok(word),
        Err(err) => AppError::from(err).into_response(),
    }
}

pub async fn delete_word(State(state): State<AppState>, Path(word_id): Path<String>) -> Response {
    match words::delete_word(state.store(), &word_id).await {
        Ok(removed_records) => ok(DeletedWord {
            id: word_id,
            removed_records,
        }),
        Err(err) => AppError::from(err).into_response(),
    }
}

pub async fn update_metadata(
    State(state): State<AppState>,
    Path(word_id): Path<String>,
    body: Bytes,
) -> Response {
    let update: WordMetadataUpdate = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "invalid request body")
                .into_response()
        }
    };

    match words::update_word_metadata(state.store(), &word_id, update).await {
        Ok(word) => ok(word),
        Err(err) => AppError::from(err).into_response(),
    }
}
