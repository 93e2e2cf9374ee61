use std::time::Duration;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection, StringRejection};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use warden_core::tuple::TupleFilter;
use warden_storage::{Page, RelationshipStore, SchemaStore};

use crate::error::ApiError;
use crate::service::{CheckInput, LookupInput, RelationshipQuery};

use super::AppState;
use super::types::*;

fn timeout_from_millis(millis: u64) -> Result<Duration, ApiError> {
    if millis == 0 {
        return Err(ApiError::InvalidArgument(
            "timeout_ms must be positive".to_string(),
        ));
    }
    Ok(Duration::from_millis(millis))
}

pub async fn check<S>(
    State(state): State<AppState<S>>,
    payload: Result<Json<CheckRequestBody>, JsonRejection>,
) -> Result<Json<CheckResponseBody>, ApiError>
where
    S: RelationshipStore + SchemaStore + 'static,
{
    let Json(req) = payload?;
    let mut input = CheckInput::new(req.subject.into(), req.permission, req.object.into());
    input.timeout = req.timeout_ms.map(timeout_from_millis).transpose()?;
    input.bypass_cache = req.bypass_cache;

    let result = state.service.check(input).await?;
    Ok(Json(CheckResponseBody {
        allowed: result.allowed,
        trace: result.trace.map(|t| t.to_string()),
    }))
}

pub async fn write_relationships<S>(
    State(state): State<AppState<S>>,
    payload: Result<Json<WriteRequestBody>, JsonRejection>,
) -> Result<Json<WriteResponseBody>, ApiError>
where
    S: RelationshipStore + SchemaStore + 'static,
{
    let Json(req) = payload?;
    let updates = req.into_updates();
    if updates.is_empty() {
        return Err(ApiError::InvalidArgument(
            "at least one update is required".to_string(),
        ));
    }

    let summary = state.service.write_relationships(&updates).await?;
    Ok(Json(WriteResponseBody {
        ok: true,
        written: summary.written,
        deleted: summary.deleted,
    }))
}

pub async fn delete_relationships<S>(
    State(state): State<AppState<S>>,
    payload: Result<Json<DeleteRequestBody>, JsonRejection>,
) -> Result<Json<DeleteResponseBody>, ApiError>
where
    S: RelationshipStore + SchemaStore + 'static,
{
    let Json(req) = payload?;
    let filter = TupleFilter::from(req);

    let deleted_count = state.service.delete_relationships(&filter).await?;
    Ok(Json(DeleteResponseBody { deleted_count }))
}

fn relationship_query(query: &ListQuery) -> Result<RelationshipQuery, ApiError> {
    match (&query.subject_type, &query.subject_id) {
        (Some(subject_type), Some(subject_id)) => {
            if query.object_id.is_some() || query.relation.is_some() {
                return Err(ApiError::InvalidArgument(
                    "object_id and relation cannot be combined with a subject".to_string(),
                ));
            }
            Ok(RelationshipQuery::BySubject {
                subject_type: subject_type.clone(),
                subject_id: subject_id.clone(),
                object_type: query.object_type.clone(),
            })
        }
        (None, None) => Ok(RelationshipQuery::ByObject(TupleFilter {
            object_type: query.object_type.clone(),
            object_id: query.object_id.clone(),
            relation: query.relation.clone(),
            ..Default::default()
        })),
        _ => Err(ApiError::InvalidArgument(
            "subject_type and subject_id must be given together".to_string(),
        )),
    }
}

pub async fn list_relationships<S>(
    State(state): State<AppState<S>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ListResponseBody>, ApiError>
where
    S: RelationshipStore + SchemaStore + 'static,
{
    let Query(query) = query?;
    let selection = relationship_query(&query)?;
    let page = Page {
        cursor: query.cursor,
        limit: query.limit.unwrap_or(0),
    };

    let result = state.service.list_relationships(&selection, &page).await?;
    Ok(Json(ListResponseBody {
        relationships: result.tuples.iter().map(RelationshipBody::from).collect(),
        next_cursor: result.next_cursor,
    }))
}

pub async fn lookup_resources<S>(
    State(state): State<AppState<S>>,
    payload: Result<Json<LookupRequestBody>, JsonRejection>,
) -> Result<Json<LookupResponseBody>, ApiError>
where
    S: RelationshipStore + SchemaStore + 'static,
{
    let Json(req) = payload?;
    let input = LookupInput {
        object_type: req.object_type,
        permission: req.permission,
        subject: req.subject.into(),
        cursor: req.cursor,
        limit: req.limit.unwrap_or(0),
    };

    let page = state.service.lookup_resources(&input).await?;
    Ok(Json(LookupResponseBody {
        object_ids: page.object_ids,
        next_cursor: page.next_cursor,
    }))
}

pub async fn write_schema<S>(
    State(state): State<AppState<S>>,
    body: Result<String, StringRejection>,
) -> Result<Json<SchemaWriteResponseBody>, ApiError>
where
    S: RelationshipStore + SchemaStore + 'static,
{
    let source = body?;
    let outcome = state.service.load_schema(&source).await?;
    Ok(Json(SchemaWriteResponseBody {
        version: outcome.active.version,
        breaking_changes: outcome
            .breaking_changes
            .iter()
            .map(ToString::to_string)
            .collect(),
    }))
}

pub async fn read_schema<S>(
    State(state): State<AppState<S>>,
) -> Result<Json<SchemaReadResponseBody>, ApiError>
where
    S: RelationshipStore + SchemaStore + 'static,
{
    let active = state
        .service
        .active_schema()
        .ok_or(ApiError::SchemaNotLoaded)?;
    Ok(Json(SchemaReadResponseBody {
        version: active.version,
        schema: active.source.clone(),
    }))
}

pub async fn healthz<S>(State(state): State<AppState<S>>) -> Json<HealthResponseBody>
where
    S: RelationshipStore + SchemaStore + 'static,
{
    Json(HealthResponseBody {
        status: "ok",
        schema_version: state.service.active_schema().map(|a| a.version),
    })
}

pub async fn metrics<S>(State(state): State<AppState<S>>) -> impl IntoResponse
where
    S: RelationshipStore + SchemaStore + 'static,
{
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}
