use std::sync::Arc;

use warden_core::engine::{CheckError, TupleReader};
use warden_core::tuple::{Tuple, TupleFilter};
use warden_storage::{MAX_PAGE_SIZE, Page, RelationshipStore};

/// Feeds the check engine from a `RelationshipStore`, draining every page.
pub struct StoreTupleReader<S: RelationshipStore> {
    store: Arc<S>,
}

impl<S: RelationshipStore> StoreTupleReader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: RelationshipStore> TupleReader for StoreTupleReader<S> {
    async fn read_tuples(&self, filter: &TupleFilter) -> Result<Vec<Tuple>, CheckError> {
        let mut tuples = Vec::new();
        let mut page = Page::first(MAX_PAGE_SIZE);
        loop {
            let result = self
                .store
                .read(filter, &page)
                .await
                .map_err(|e| CheckError::StorageError(e.to_string()))?;
            tuples.extend(result.tuples);
            match result.next_cursor {
                Some(cursor) => page = Page::after(cursor, MAX_PAGE_SIZE),
                None => return Ok(tuples),
            }
        }
    }
}
