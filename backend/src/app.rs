use std::any::Any;
use std::sync::Arc;

use axum::{
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer, cors::CorsLayer, map_response_body::MapResponseBodyLayer,
    trace::TraceLayer,
};

use crate::error::{render_errors, ApiError, ErrorRendering};
use crate::handlers::{
    create_task, delete_task, fallback, get_task, health, list_tasks, update_task,
};
use crate::rate_limit::{throttle, RateLimiter};
use crate::service::TaskService;

/// Assembles the HTTP surface. Task routes live under `/api` and are
/// throttled; every error response passes through [`render_errors`].
pub fn router(service: TaskService, limiter: RateLimiter, debug: bool) -> Router {
    let mut tasks = Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/:id",
            get(get_task)
                .put(update_task)
                .patch(update_task)
                .delete(delete_task),
        );
    if limiter.is_enabled() {
        tasks = tasks.layer(middleware::from_fn_with_state(Arc::new(limiter), throttle));
    }

    Router::new()
        .route("/up", get(health))
        .nest("/api", tasks)
        .fallback(fallback)
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                // Cors needs a `Default` response body; Trace's wrapper isn't one.
                .layer(MapResponseBodyLayer::new(axum::body::Body::new))
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn_with_state(
                    ErrorRendering { debug },
                    render_errors,
                ))
                .layer(CatchPanicLayer::custom(handle_panic)),
        )
        .with_state(service)
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "handler panicked".to_string()
    };
    ApiError::Internal(detail).into_response()
}
