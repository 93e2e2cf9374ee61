use std::future::Future;

use warden_core::tuple::{Tuple, TupleFilter};

pub const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("delete filter must have at least one field set")]
    EmptyDeleteFilter,
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid pagination cursor")]
    InvalidCursor,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// A page request. `cursor` is the opaque `next_cursor` of a previous page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub cursor: Option<String>,
    pub limit: usize,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Self {
            cursor: None,
            limit,
        }
    }

    pub fn after(cursor: impl Into<String>, limit: usize) -> Self {
        Self {
            cursor: Some(cursor.into()),
            limit,
        }
    }

    /// 0 and anything above the maximum mean "as many as allowed".
    pub fn effective_limit(&self) -> usize {
        clamp_limit(self.limit)
    }
}

pub fn clamp_limit(limit: usize) -> usize {
    if limit == 0 || limit > MAX_PAGE_SIZE {
        MAX_PAGE_SIZE
    } else {
        limit
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TuplePage {
    pub tuples: Vec<Tuple>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSchema {
    pub version: u64,
    pub definition: String,
}

pub trait RelationshipStore: Send + Sync {
    /// Applies `deletes` then `writes` as one atomic batch. Writes are
    /// upserts; `written` counts tuples that did not exist before.
    fn write(
        &self,
        writes: &[Tuple],
        deletes: &[TupleFilter],
    ) -> impl Future<Output = Result<WriteSummary, StorageError>> + Send;

    /// Tuples matching `filter` in primary key order.
    fn read(
        &self,
        filter: &TupleFilter,
        page: &Page,
    ) -> impl Future<Output = Result<TuplePage, StorageError>> + Send;

    /// Tuples whose subject is `subject_type:subject_id` (any subject
    /// relation), in subject index order.
    fn read_by_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
        object_type: Option<&str>,
        page: &Page,
    ) -> impl Future<Output = Result<TuplePage, StorageError>> + Send;

    /// Distinct object ids of `object_type` greater than `after`, ascending.
    fn list_object_ids(
        &self,
        object_type: &str,
        after: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<String>, StorageError>> + Send;
}

pub trait SchemaStore: Send + Sync {
    /// Stores a new version and makes it active.
    fn write_schema(
        &self,
        definition: &str,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    fn read_schema(
        &self,
    ) -> impl Future<Output = Result<Option<StoredSchema>, StorageError>> + Send;
}

pub(crate) fn validate_delete_filters(deletes: &[TupleFilter]) -> Result<(), StorageError> {
    for filter in deletes {
        if filter.is_empty() {
            return Err(StorageError::EmptyDeleteFilter);
        }
        validate_filter(filter)?;
    }
    Ok(())
}

pub(crate) fn validate_filter(filter: &TupleFilter) -> Result<(), StorageError> {
    filter
        .validate()
        .map_err(|e| StorageError::InvalidFilter(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(clamp_limit(0), MAX_PAGE_SIZE);
        assert_eq!(clamp_limit(5000), MAX_PAGE_SIZE);
        assert_eq!(clamp_limit(50), 50);
        assert_eq!(Page::first(0).effective_limit(), MAX_PAGE_SIZE);
    }

    #[test]
    fn empty_delete_filter_rejected() {
        assert_eq!(
            validate_delete_filters(&[TupleFilter::default()]),
            Err(StorageError::EmptyDeleteFilter)
        );
    }

    #[test]
    fn malformed_delete_filter_rejected() {
        let filter = TupleFilter {
            subject_id: Some("bob".to_string()),
            ..Default::default()
        };

        assert!(matches!(
            validate_delete_filters(&[filter]),
            Err(StorageError::InvalidFilter(_))
        ));
    }
}
