pub mod migrations;
mod queries;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use warden_core::tuple::{Tuple, TupleFilter};

use crate::keys::{SubjectKey, TupleKey, decode_cursor, encode_cursor};
use crate::traits::{
    Page, RelationshipStore, SchemaStore, StorageError, StoredSchema, TuplePage, WriteSummary,
    clamp_limit, validate_delete_filters, validate_filter,
};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        tracing::info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        migrations::run_migrations(&self.pool).await?;
        Ok(())
    }
}

fn split_page<K: serde::Serialize>(mut keys: Vec<K>, limit: usize) -> (Vec<K>, Option<String>) {
    if keys.len() > limit {
        keys.truncate(limit);
        let cursor = keys.last().map(encode_cursor);
        (keys, cursor)
    } else {
        (keys, None)
    }
}

impl RelationshipStore for PostgresStore {
    async fn write(
        &self,
        writes: &[Tuple],
        deletes: &[TupleFilter],
    ) -> Result<WriteSummary, StorageError> {
        validate_delete_filters(deletes)?;

        let mut tx = self.pool.begin().await?;
        let mut summary = WriteSummary::default();

        for filter in deletes {
            let removed = queries::delete_matching_tuples(&mut *tx, filter).await?;
            summary.deleted += usize::try_from(removed).unwrap_or(usize::MAX);
        }
        for tuple in writes {
            if queries::insert_tuple(&mut *tx, tuple).await? {
                summary.written += 1;
            }
        }

        tx.commit().await?;
        Ok(summary)
    }

    async fn read(&self, filter: &TupleFilter, page: &Page) -> Result<TuplePage, StorageError> {
        validate_filter(filter)?;
        let limit = page.effective_limit();
        let after: Option<TupleKey> = page.cursor.as_deref().map(decode_cursor).transpose()?;

        let keys = queries::read_tuples(&self.pool, filter, after.as_ref(), limit + 1).await?;
        let (keys, next_cursor) = split_page(keys, limit);
        Ok(TuplePage {
            tuples: keys.iter().map(TupleKey::to_tuple).collect(),
            next_cursor,
        })
    }

    async fn read_by_subject(
        &self,
        subject_type: &str,
        subject_id: &str,
        object_type: Option<&str>,
        page: &Page,
    ) -> Result<TuplePage, StorageError> {
        let limit = page.effective_limit();
        let after: Option<SubjectKey> = page.cursor.as_deref().map(decode_cursor).transpose()?;

        let keys = queries::read_by_subject(
            &self.pool,
            subject_type,
            subject_id,
            object_type,
            after.as_ref(),
            limit + 1,
        )
        .await?;
        let (keys, next_cursor) = split_page(keys, limit);
        Ok(TuplePage {
            tuples: keys.iter().map(SubjectKey::to_tuple).collect(),
            next_cursor,
        })
    }

    async fn list_object_ids(
        &self,
        object_type: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        queries::list_object_ids(&self.pool, object_type, after, clamp_limit(limit)).await
    }
}

impl SchemaStore for PostgresStore {
    async fn write_schema(&self, definition: &str) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;
        let version = queries::insert_schema_version(&mut *tx, definition).await?;
        queries::set_active_schema(&mut *tx, version).await?;
        tx.commit().await?;
        Ok(u64::try_from(version).unwrap_or_default())
    }

    async fn read_schema(&self) -> Result<Option<StoredSchema>, StorageError> {
        queries::read_active_schema(&self.pool).await
    }
}
