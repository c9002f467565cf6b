use crate::{errors::ApiError, AppState};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tasksync_core::{SyncError, Task, TaskId};

type ApiResult<T> = Result<T, ApiError>;

fn body(payload: Result<Json<Task>, JsonRejection>) -> ApiResult<Task> {
    payload
        .map(|Json(task)| task)
        .map_err(|rejection| ApiError(SyncError::Serialization(rejection.body_text())))
}

pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<Task>> {
    Json(state.repo.list().await)
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Task>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let created = state.repo.create(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.repo.get(&TaskId::new(id)).await?))
}

pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<Task>, JsonRejection>,
) -> ApiResult<Json<Task>> {
    let updated = state.repo.update(&TaskId::new(id), body(payload)?).await?;
    Ok(Json(updated))
}

pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.repo.delete(&TaskId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_all_tasks(State(state): State<Arc<AppState>>) -> StatusCode {
    state.repo.delete_all().await;
    StatusCode::NO_CONTENT
}

pub async fn health() -> &'static str {
    "OK"
}
