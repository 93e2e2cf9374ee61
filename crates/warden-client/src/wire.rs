//! JSON bodies exchanged with the server.

use serde::{Deserialize, Serialize};

use warden_core::tuple::{ObjectRef, SubjectRef, Tuple};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectBody {
    #[serde(rename = "type")]
    pub object_type: String,
    pub id: String,
}

impl From<&ObjectRef> for ObjectBody {
    fn from(object: &ObjectRef) -> Self {
        Self {
            object_type: object.object_type.clone(),
            id: object.object_id.clone(),
        }
    }
}

impl From<ObjectBody> for ObjectRef {
    fn from(body: ObjectBody) -> Self {
        ObjectRef::new(body.object_type, body.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectBody {
    #[serde(rename = "type")]
    pub subject_type: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
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

impl From<SubjectBody> for SubjectRef {
    fn from(body: SubjectBody) -> Self {
        match body.relation {
            Some(relation) => SubjectRef::set(body.subject_type, body.id, relation),
            None => SubjectRef::direct(body.subject_type, body.id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipBody {
    pub object: ObjectBody,
    pub relation: String,
    pub subject: SubjectBody,
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

impl From<RelationshipBody> for Tuple {
    fn from(body: RelationshipBody) -> Self {
        Tuple::new(body.object.into(), body.relation, body.subject.into())
    }
}

#[derive(Debug, Serialize)]
pub struct CheckBody {
    pub subject: SubjectBody,
    pub permission: String,
    pub object: ObjectBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub bypass_cache: bool,
}

#[derive(Debug, Deserialize)]
pub struct CheckReply {
    pub allowed: bool,
    #[serde(default)]
    pub trace: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateBody {
    pub operation: &'static str,
    #[serde(flatten)]
    pub relationship: RelationshipBody,
}

#[derive(Debug, Serialize)]
pub struct WriteBody {
    pub updates: Vec<UpdateBody>,
}

#[derive(Debug, Deserialize)]
pub struct WriteReply {
    pub written: usize,
    pub deleted: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_relation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteReply {
    pub deleted_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ListReply {
    pub relationships: Vec<RelationshipBody>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LookupBody {
    pub object_type: String,
    pub permission: String,
    pub subject: SubjectBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct LookupReply {
    pub object_ids: Vec<String>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SchemaWriteReply {
    pub version: u64,
    pub breaking_changes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SchemaReadReply {
    pub version: u64,
    pub schema: String,
}

#[derive(Debug, Deserialize)]
pub struct ErrorReply {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}
