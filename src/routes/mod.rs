mod health;
mod records;
mod tasks;
mod words;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;

use crate::response::json_error;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .route(
            "/api/words",
            get(words::list_words).post(words::add_words).fallback(fallback_handler),
        )
        .route(
            "/api/words/:word_id",
            get(words::get_word).delete(words::delete_word).fallback(fallback_handler),
        )
        .route(
            "/api/words/:word_id/metadata",
            put(words::update_metadata).fallback(fallback_handler),
        )
        .route(
            "/api/users/:user_id/records/init",
            post(records::init_records).fallback(fallback_handler),
        )
        .route(
            "/api/users/:user_id/records/:word_id",
            get(records::get_record).fallback(fallback_handler),
        )
        .route(
            "/api/users/:user_id/due",
            get(records::due_words).fallback(fallback_handler),
        )
        .route(
            "/api/users/:user_id/tasks/today",
            post(tasks::today).fallback(fallback_handler),
        )
        .route(
            "/api/users/:user_id/tasks/:task_id",
            get(tasks::get_task).fallback(fallback_handler),
        )
        .route(
            "/api/users/:user_id/feedback",
            post(tasks::submit_feedback).fallback(fallback_handler),
        )
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "route not found").into_response()
}
