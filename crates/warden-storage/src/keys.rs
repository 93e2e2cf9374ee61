//! Index keys and the opaque pagination cursors built from them.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde::de::DeserializeOwned;

use warden_core::tuple::{ObjectRef, SubjectRef, Tuple};

use crate::traits::StorageError;

/// Primary index order. Direct subjects store an empty `subject_relation`.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct TupleKey {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub subject_type: String,
    pub subject_id: String,
    pub subject_relation: String,
}

/// Secondary (by-subject) index order.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct SubjectKey {
    pub subject_type: String,
    pub subject_id: String,
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub subject_relation: String,
}

impl TupleKey {
    pub fn from_tuple(tuple: &Tuple) -> Self {
        Self {
            object_type: tuple.object.object_type.clone(),
            object_id: tuple.object.object_id.clone(),
            relation: tuple.relation.clone(),
            subject_type: tuple.subject.subject_type().to_string(),
            subject_id: tuple.subject.subject_id().to_string(),
            subject_relation: tuple.subject.relation().unwrap_or_default().to_string(),
        }
    }

    pub fn to_tuple(&self) -> Tuple {
        Tuple::new(
            ObjectRef::new(&self.object_type, &self.object_id),
            &self.relation,
            subject_ref(&self.subject_type, &self.subject_id, &self.subject_relation),
        )
    }

    /// Smallest key of the object's range, optionally narrowed to a relation.
    pub fn lower_bound(object_type: &str, object_id: &str, relation: Option<&str>) -> Self {
        Self {
            object_type: object_type.to_string(),
            object_id: object_id.to_string(),
            relation: relation.unwrap_or_default().to_string(),
            subject_type: String::new(),
            subject_id: String::new(),
            subject_relation: String::new(),
        }
    }

    pub fn to_subject_key(&self) -> SubjectKey {
        SubjectKey {
            subject_type: self.subject_type.clone(),
            subject_id: self.subject_id.clone(),
            object_type: self.object_type.clone(),
            object_id: self.object_id.clone(),
            relation: self.relation.clone(),
            subject_relation: self.subject_relation.clone(),
        }
    }
}

impl SubjectKey {
    pub fn lower_bound(subject_type: &str, subject_id: &str, object_type: Option<&str>) -> Self {
        Self {
            subject_type: subject_type.to_string(),
            subject_id: subject_id.to_string(),
            object_type: object_type.unwrap_or_default().to_string(),
            object_id: String::new(),
            relation: String::new(),
            subject_relation: String::new(),
        }
    }

    pub fn to_tuple(&self) -> Tuple {
        Tuple::new(
            ObjectRef::new(&self.object_type, &self.object_id),
            &self.relation,
            subject_ref(&self.subject_type, &self.subject_id, &self.subject_relation),
        )
    }
}

pub(crate) fn subject_ref(subject_type: &str, subject_id: &str, relation: &str) -> SubjectRef {
    if relation.is_empty() {
        SubjectRef::direct(subject_type, subject_id)
    } else {
        SubjectRef::set(subject_type, subject_id, relation)
    }
}

pub fn encode_cursor<K: Serialize>(key: &K) -> String {
    // Serialising plain string structs cannot fail.
    let json = serde_json::to_vec(key).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

pub fn decode_cursor<K: DeserializeOwned>(cursor: &str) -> Result<K, StorageError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| StorageError::InvalidCursor)?;
    serde_json::from_slice(&bytes).map_err(|_| StorageError::InvalidCursor)
}
