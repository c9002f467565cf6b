pub mod api;
pub mod errors;
pub mod store;
pub mod websocket;

use axum::routing::{get, put};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use errors::{ApiError, ServerError};
pub use store::{ChangeBatch, TaskRepository};

pub const DEFAULT_FEED_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub repo: TaskRepository,
    /// Events queued per subscriber before it is considered too slow.
    pub feed_buffer: usize,
}

impl AppState {
    pub fn new(repo: TaskRepository) -> Self {
        Self {
            repo,
            feed_buffer: DEFAULT_FEED_BUFFER,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/tasks",
            get(api::list_tasks)
                .post(api::create_task)
                .delete(api::delete_all_tasks),
        )
        .route("/tasks/changes", get(websocket::changes_handler))
        .route(
            "/tasks/:id",
            put(api::update_task)
                .get(api::get_task)
                .delete(api::delete_task),
        )
        .route("/health", get(api::health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(Arc::new(state))
}
