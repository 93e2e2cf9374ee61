mod handlers;
pub mod types;

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection, StringRejection};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use warden_storage::{RelationshipStore, SchemaStore};

use crate::error::{ApiError, ErrorCode};
use crate::metrics::Metrics;
use crate::service::PermissionService;

use types::{ErrorBody, ErrorDetail};

const MAX_REQUEST_BODY_SIZE: usize = 4 * 1024 * 1024;

pub struct AppState<S: RelationshipStore + SchemaStore> {
    pub service: Arc<PermissionService<S>>,
    pub metrics: Arc<Metrics>,
}

impl<S: RelationshipStore + SchemaStore> AppState<S> {
    /// Shares the service's metrics with the HTTP layer.
    pub fn new(service: Arc<PermissionService<S>>) -> Self {
        let metrics = Arc::clone(service.metrics());
        Self { service, metrics }
    }
}

impl<S: RelationshipStore + SchemaStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidArgument | ErrorCode::UnknownPermission => StatusCode::BAD_REQUEST,
        ErrorCode::SchemaValidation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::DepthExceeded => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.as_str(),
                message: self.public_message(),
                retryable: code.is_retryable(),
            },
        };
        (status_for(code), Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidArgument(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidArgument(rejection.body_text())
    }
}

impl From<StringRejection> for ApiError {
    fn from(rejection: StringRejection) -> Self {
        ApiError::InvalidArgument(rejection.body_text())
    }
}

fn operation_name(method: &Method, path: &str) -> Option<&'static str> {
    match (method, path) {
        (_, "/v1/check") => Some("check"),
        (_, "/v1/relationships/write") => Some("write_relationships"),
        (_, "/v1/relationships/delete") => Some("delete_relationships"),
        (_, "/v1/relationships") => Some("list_relationships"),
        (_, "/v1/lookup-resources") => Some("lookup_resources"),
        (&Method::PUT, "/v1/schema") => Some("write_schema"),
        (&Method::GET, "/v1/schema") => Some("read_schema"),
        _ => None,
    }
}

async fn metrics_middleware<S: RelationshipStore + SchemaStore>(
    State(state): State<AppState<S>>,
    request: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> Response {
    let operation = operation_name(request.method(), request.uri().path());
    if let Some(name) = operation {
        state.metrics.record_request();
        state.metrics.record_operation(name);
    }

    let response = next.run(request).await;

    if operation.is_some() {
        if response.status().is_success() {
            state.metrics.record_success();
        } else {
            state.metrics.record_error();
        }
    }
    response
}

pub fn create_router<S>(state: AppState<S>) -> Router
where
    S: RelationshipStore + SchemaStore + 'static,
{
    Router::new()
        .route("/v1/check", post(handlers::check))
        .route("/v1/relationships/write", post(handlers::write_relationships))
        .route(
            "/v1/relationships/delete",
            post(handlers::delete_relationships),
        )
        .route("/v1/relationships", get(handlers::list_relationships))
        .route("/v1/lookup-resources", post(handlers::lookup_resources))
        .route(
            "/v1/schema",
            get(handlers::read_schema).put(handlers::write_schema),
        )
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .with_state(state)
}
