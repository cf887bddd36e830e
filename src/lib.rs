//! Spaced-repetition review scheduling for vocabulary learners: memory
//! scoring, due-word selection, daily task planning and an HTTP surface
//! over a SQLite store.

pub mod config;
pub mod db;
pub mod logging;
pub mod response;
pub mod routes;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod workers;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

pub fn create_app(state: AppState) -> axum::Router {
    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
