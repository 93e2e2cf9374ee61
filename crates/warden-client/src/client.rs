use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use warden_core::tuple::{ObjectRef, SubjectRef, Tuple, TupleFilter};

use crate::config::ClientOptions;
use crate::error::ClientError;
use crate::wire;

/// HTTP client for the warden query API.
#[derive(Debug, Clone)]
pub struct WardenClient {
    http: reqwest::Client,
    base_url: String,
}

impl WardenClient {
    pub fn new(base_url: &str, options: ClientOptions) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn check(&self, request: CheckRequest) -> Result<CheckResponse, ClientError> {
        let body = wire::CheckBody {
            subject: (&request.subject).into(),
            permission: request.permission,
            object: (&request.object).into(),
            timeout_ms: request
                .timeout
                .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
            bypass_cache: request.bypass_cache,
        };
        let reply: wire::CheckReply =
            send(self.http.post(self.url("/v1/check")).json(&body)).await?;
        Ok(CheckResponse {
            allowed: reply.allowed,
            trace: reply.trace,
        })
    }

    /// Fail-closed check: any error counts as "not allowed".
    pub async fn is_allowed(
        &self,
        subject: &SubjectRef,
        permission: &str,
        object: &ObjectRef,
    ) -> bool {
        let request = CheckRequest::new(subject.clone(), permission, object.clone());
        match self.check(request).await {
            Ok(response) => response.allowed,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    %subject,
                    permission,
                    %object,
                    "check failed, denying"
                );
                false
            }
        }
    }

    pub async fn write(
        &self,
        updates: &[RelationshipUpdate],
    ) -> Result<WriteResponse, ClientError> {
        let body = wire::WriteBody {
            updates: updates
                .iter()
                .map(|u| wire::UpdateBody {
                    operation: match u.operation {
                        UpdateOperation::Touch => "touch",
                        UpdateOperation::Delete => "delete",
                    },
                    relationship: (&u.tuple).into(),
                })
                .collect(),
        };
        let reply: wire::WriteReply =
            send(self.http.post(self.url("/v1/relationships/write")).json(&body)).await?;
        Ok(WriteResponse {
            written: reply.written,
            deleted: reply.deleted,
        })
    }

    /// Deletes every tuple matching `filter` and returns how many went.
    pub async fn delete(&self, filter: &TupleFilter) -> Result<usize, ClientError> {
        let body = wire::DeleteBody {
            object_type: filter.object_type.clone(),
            object_id: filter.object_id.clone(),
            relation: filter.relation.clone(),
            subject_type: filter.subject_type.clone(),
            subject_id: filter.subject_id.clone(),
            subject_relation: filter
                .subject_relation
                .as_ref()
                .map(|r| r.clone().unwrap_or_default()),
        };
        let reply: wire::DeleteReply =
            send(self.http.post(self.url("/v1/relationships/delete")).json(&body)).await?;
        Ok(reply.deleted_count)
    }

    pub async fn list_relationships(
        &self,
        query: &RelationshipQuery,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<RelationshipPage, ClientError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        match query {
            RelationshipQuery::ByObject {
                object_type,
                object_id,
                relation,
            } => {
                params.push(("object_type", object_type.clone()));
                if let Some(id) = object_id {
                    params.push(("object_id", id.clone()));
                }
                if let Some(relation) = relation {
                    params.push(("relation", relation.clone()));
                }
            }
            RelationshipQuery::BySubject {
                subject_type,
                subject_id,
                object_type,
            } => {
                params.push(("subject_type", subject_type.clone()));
                params.push(("subject_id", subject_id.clone()));
                if let Some(object_type) = object_type {
                    params.push(("object_type", object_type.clone()));
                }
            }
        }
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        if let Some(limit) = limit {
            params.push(("limit", limit.to_string()));
        }

        let reply: wire::ListReply =
            send(self.http.get(self.url("/v1/relationships")).query(&params)).await?;
        Ok(RelationshipPage {
            tuples: reply.relationships.into_iter().map(Tuple::from).collect(),
            next_cursor: reply.next_cursor,
        })
    }

    pub async fn lookup_resources(
        &self,
        object_type: &str,
        permission: &str,
        subject: &SubjectRef,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<LookupPage, ClientError> {
        let body = wire::LookupBody {
            object_type: object_type.to_string(),
            permission: permission.to_string(),
            subject: subject.into(),
            cursor: cursor.map(str::to_string),
            limit,
        };
        let reply: wire::LookupReply =
            send(self.http.post(self.url("/v1/lookup-resources")).json(&body)).await?;
        Ok(LookupPage {
            object_ids: reply.object_ids,
            next_cursor: reply.next_cursor,
        })
    }

    /// Returns the new version and any breaking changes the server reported.
    pub async fn write_schema(&self, source: &str) -> Result<(u64, Vec<String>), ClientError> {
        let request = self
            .http
            .put(self.url("/v1/schema"))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(source.to_string());
        let reply: wire::SchemaWriteReply = send(request).await?;
        Ok((reply.version, reply.breaking_changes))
    }

    /// `None` when the server has no schema yet.
    pub async fn read_schema(&self) -> Result<Option<SchemaVersion>, ClientError> {
        match send::<wire::SchemaReadReply>(self.http.get(self.url("/v1/schema"))).await {
            Ok(reply) => Ok(Some(SchemaVersion {
                version: reply.version,
                source: reply.schema,
            })),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    Err(error_from_response(status, response.text().await?))
}

fn error_from_response(status: StatusCode, body: String) -> ClientError {
    match serde_json::from_str::<wire::ErrorReply>(&body) {
        Ok(reply) => {
            ClientError::from_code(status.as_u16(), &reply.error.code, reply.error.message)
        }
        Err(_) => ClientError::Status {
            status: status.as_u16(),
            message: body,
        },
    }
}

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub subject: SubjectRef,
    pub permission: String,
    pub object: ObjectRef,
    pub timeout: Option<Duration>,
    pub bypass_cache: bool,
}

impl CheckRequest {
    pub fn new(subject: SubjectRef, permission: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            subject,
            permission: permission.into(),
            object,
            timeout: None,
            bypass_cache: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResponse {
    pub allowed: bool,
    pub trace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperation {
    Touch,
    Delete,
}

#[derive(Debug, Clone)]
pub struct RelationshipUpdate {
    pub operation: UpdateOperation,
    pub tuple: Tuple,
}

impl RelationshipUpdate {
    pub fn touch(tuple: Tuple) -> Self {
        Self {
            operation: UpdateOperation::Touch,
            tuple,
        }
    }

    pub fn delete(tuple: Tuple) -> Self {
        Self {
            operation: UpdateOperation::Delete,
            tuple,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResponse {
    pub written: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone)]
pub enum RelationshipQuery {
    ByObject {
        object_type: String,
        object_id: Option<String>,
        relation: Option<String>,
    },
    BySubject {
        subject_type: String,
        subject_id: String,
        object_type: Option<String>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipPage {
    pub tuples: Vec<Tuple>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupPage {
    pub object_ids: Vec<String>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersion {
    pub version: u64,
    pub source: String,
}
