use serde::{Deserialize, Serialize};

use warden_core::tuple::{ObjectRef, SubjectRef, Tuple, TupleFilter};

use crate::service::{RelationshipUpdate, UpdateOperation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectBody {
    #[serde(rename = "type")]
    pub object_type: String,
    pub id: String,
}

impl From<ObjectBody> for ObjectRef {
    fn from(body: ObjectBody) -> Self {
        ObjectRef::new(body.object_type, body.id)
    }
}

impl From<&ObjectRef> for ObjectBody {
    fn from(object: &ObjectRef) -> Self {
        Self {
            object_type: object.object_type.clone(),
            id: object.object_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectBody {
    #[serde(rename = "type")]
    pub subject_type: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

impl From<SubjectBody> for SubjectRef {
    fn from(body: SubjectBody) -> Self {
        match body.relation {
            Some(relation) => SubjectRef::set(body.subject_type, body.id, relation),
            None => SubjectRef::direct(body.subject_type, body.id),
        }
    }
}

impl From<&SubjectRef> for SubjectBody {
    fn from(subject: &SubjectRef) -> Self {
        Self {
            subject_type: subject.subject_type().to_string(),
            id: subject.subject_id().to_string(),
            relation: subject.relation().map(str::to_string),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckRequestBody {
    pub subject: SubjectBody,
    pub permission: String,
    pub object: ObjectBody,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub bypass_cache: bool,
}

#[derive(Debug, Serialize)]
pub struct CheckResponseBody {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipBody {
    pub object: ObjectBody,
    pub relation: String,
    pub subject: SubjectBody,
}

impl From<RelationshipBody> for Tuple {
    fn from(body: RelationshipBody) -> Self {
        Tuple::new(body.object.into(), body.relation, body.subject.into())
    }
}

impl From<&Tuple> for RelationshipBody {
    fn from(tuple: &Tuple) -> Self {
        Self {
            object: (&tuple.object).into(),
            relation: tuple.relation.clone(),
            subject: (&tuple.subject).into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationBody {
    Touch,
    Delete,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    pub operation: OperationBody,
    #[serde(flatten)]
    pub relationship: RelationshipBody,
}

impl From<UpdateBody> for RelationshipUpdate {
    fn from(body: UpdateBody) -> Self {
        let operation = match body.operation {
            OperationBody::Touch => UpdateOperation::Touch,
            OperationBody::Delete => UpdateOperation::Delete,
        };
        RelationshipUpdate {
            operation,
            tuple: body.relationship.into(),
        }
    }
}

/// Either a batch of updates or one relationship to touch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WriteRequestBody {
    Batch { updates: Vec<UpdateBody> },
    Single(RelationshipBody),
}

impl WriteRequestBody {
    pub fn into_updates(self) -> Vec<RelationshipUpdate> {
        match self {
            Self::Batch { updates } => updates.into_iter().map(Into::into).collect(),
            Self::Single(relationship) => vec![RelationshipUpdate::touch(relationship.into())],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WriteResponseBody {
    pub ok: bool,
    pub written: usize,
    pub deleted: usize,
}

/// An absent `subject_relation` matches any subject; `""` matches direct
/// subjects only.
#[derive(Debug, Default, Deserialize)]
pub struct DeleteRequestBody {
    pub object_type: Option<String>,
    pub object_id: Option<String>,
    pub relation: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub subject_relation: Option<String>,
}

impl From<DeleteRequestBody> for TupleFilter {
    fn from(body: DeleteRequestBody) -> Self {
        TupleFilter {
            object_type: body.object_type,
            object_id: body.object_id,
            relation: body.relation,
            subject_type: body.subject_type,
            subject_id: body.subject_id,
            subject_relation: body
                .subject_relation
                .map(|r| if r.is_empty() { None } else { Some(r) }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponseBody {
    pub deleted_count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub object_type: Option<String>,
    pub object_id: Option<String>,
    pub relation: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ListResponseBody {
    pub relationships: Vec<RelationshipBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LookupRequestBody {
    pub object_type: String,
    pub permission: String,
    pub subject: SubjectBody,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LookupResponseBody {
    pub object_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SchemaWriteResponseBody {
    pub version: u64,
    pub breaking_changes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SchemaReadResponseBody {
    pub version: u64,
    pub schema: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponseBody {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}
