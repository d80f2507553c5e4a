use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Request, State},
    http::{request::Parts, StatusCode},
    response::Json,
};
use serde_json::{json, Value};
use shared::{parse_payload, CreateTaskRequest, FromPayload, Task, UpdateTaskRequest, ValidationErrors};

use crate::error::ApiError;
use crate::service::TaskService;

/// A request body validated into `T`, rejected with 422 otherwise.
pub struct TaskPayload<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for TaskPayload<T>
where
    S: Send + Sync,
    T: FromPayload,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(request, state)
            .await
            .map_err(|rejection| ValidationErrors::single("body", rejection.body_text()))?;
        Ok(Self(parse_payload(&body)?))
    }
}

/// The `:id` path segment. A segment axum cannot decode names no task, so
/// it is rejected as not found.
pub struct TaskPath(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for TaskPath
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                tracing::debug!(%rejection, "undecodable task id");
                ApiError::NotFound
            })?;
        Ok(Self(id))
    }
}

pub async fn list_tasks(State(service): State<TaskService>) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(service.list_tasks().await?))
}

pub async fn create_task(
    State(service): State<TaskService>,
    TaskPayload(request): TaskPayload<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let task = service.create_task(request).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    TaskPath(id): TaskPath,
    State(service): State<TaskService>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(service.get_task(&id).await?))
}

pub async fn update_task(
    TaskPath(id): TaskPath,
    State(service): State<TaskService>,
    TaskPayload(changes): TaskPayload<UpdateTaskRequest>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(service.update_task(&id, changes).await?))
}

pub async fn delete_task(
    TaskPath(id): TaskPath,
    State(service): State<TaskService>,
) -> Result<Json<Value>, ApiError> {
    service.delete_task(&id).await?;
    Ok(Json(json!({"message": "Task deleted successfully."})))
}

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn fallback() -> ApiError {
    ApiError::NotFound
}
