use warden_core::tuple::{Tuple, TupleFilter};

use crate::keys::{SubjectKey, TupleKey};
use crate::traits::{StorageError, StoredSchema};

type TupleRow = (String, String, String, String, String, String);

const PRIMARY_ORDER: &str =
    "object_type, object_id, relation, subject_type, subject_id, subject_relation";
const SUBJECT_ORDER: &str =
    "subject_type, subject_id, object_type, object_id, relation, subject_relation";

/// `WHERE` fragments for a filter, numbering placeholders from `bind_idx`.
fn filter_conditions<'a>(
    filter: &'a TupleFilter,
    bind_idx: &mut usize,
) -> (Vec<String>, Vec<&'a str>) {
    let mut conditions = Vec::new();
    let mut binds: Vec<&str> = Vec::new();

    let columns = [
        ("object_type", filter.object_type.as_deref()),
        ("object_id", filter.object_id.as_deref()),
        ("relation", filter.relation.as_deref()),
        ("subject_type", filter.subject_type.as_deref()),
        ("subject_id", filter.subject_id.as_deref()),
    ];
    for (column, value) in columns {
        if let Some(value) = value {
            conditions.push(format!("{column} = ${bind_idx}"));
            binds.push(value);
            *bind_idx += 1;
        }
    }
    if let Some(ref sr) = filter.subject_relation {
        conditions.push(format!("subject_relation = ${bind_idx}"));
        binds.push(sr.as_deref().unwrap_or_default());
        *bind_idx += 1;
    }

    (conditions, binds)
}

fn row_comparison(columns: &str, bind_idx: &mut usize) -> String {
    let placeholders: Vec<String> = (0..6).map(|i| format!("${}", *bind_idx + i)).collect();
    *bind_idx += 6;
    format!("({columns}) > ({})", placeholders.join(", "))
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

pub async fn delete_matching_tuples<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    filter: &TupleFilter,
) -> Result<u64, StorageError> {
    let mut bind_idx = 1;
    let (conditions, binds) = filter_conditions(filter, &mut bind_idx);
    let query = format!("DELETE FROM relation_tuples{}", where_clause(&conditions));

    let mut q = sqlx::query(&query);
    for bind in binds {
        q = q.bind(bind);
    }
    let result = q.execute(executor).await?;
    Ok(result.rows_affected())
}

/// Returns whether the row was new.
pub async fn insert_tuple<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    tuple: &Tuple,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        r#"
        INSERT INTO relation_tuples
            (object_type, object_id, relation, subject_type, subject_id, subject_relation)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(&tuple.object.object_type)
    .bind(&tuple.object.object_id)
    .bind(&tuple.relation)
    .bind(tuple.subject.subject_type())
    .bind(tuple.subject.subject_id())
    .bind(tuple.subject.relation().unwrap_or_default())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Reads up to `limit` rows after `after`. Callers pass `limit + 1` to learn
/// whether another page exists.
pub async fn read_tuples<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    filter: &TupleFilter,
    after: Option<&TupleKey>,
    limit: usize,
) -> Result<Vec<TupleKey>, StorageError> {
    let mut bind_idx = 1;
    let (mut conditions, binds) = filter_conditions(filter, &mut bind_idx);
    if after.is_some() {
        conditions.push(row_comparison(PRIMARY_ORDER, &mut bind_idx));
    }

    let query = format!(
        "SELECT {PRIMARY_ORDER} FROM relation_tuples{} ORDER BY {PRIMARY_ORDER} LIMIT {limit}",
        where_clause(&conditions)
    );

    let mut q = sqlx::query_as::<_, TupleRow>(&query);
    for bind in binds {
        q = q.bind(bind);
    }
    if let Some(key) = after {
        q = q
            .bind(&key.object_type)
            .bind(&key.object_id)
            .bind(&key.relation)
            .bind(&key.subject_type)
            .bind(&key.subject_id)
            .bind(&key.subject_relation);
    }

    let rows = q.fetch_all(executor).await?;
    Ok(rows
        .into_iter()
        .map(
            |(object_type, object_id, relation, subject_type, subject_id, subject_relation)| {
                TupleKey {
                    object_type,
                    object_id,
                    relation,
                    subject_type,
                    subject_id,
                    subject_relation,
                }
            },
        )
        .collect())
}

pub async fn read_by_subject<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    subject_type: &str,
    subject_id: &str,
    object_type: Option<&str>,
    after: Option<&SubjectKey>,
    limit: usize,
) -> Result<Vec<SubjectKey>, StorageError> {
    let mut conditions = vec![
        "subject_type = $1".to_string(),
        "subject_id = $2".to_string(),
    ];
    let mut bind_idx = 3;
    if object_type.is_some() {
        conditions.push(format!("object_type = ${bind_idx}"));
        bind_idx += 1;
    }
    if after.is_some() {
        conditions.push(row_comparison(SUBJECT_ORDER, &mut bind_idx));
    }

    let query = format!(
        "SELECT {SUBJECT_ORDER} FROM relation_tuples{} ORDER BY {SUBJECT_ORDER} LIMIT {limit}",
        where_clause(&conditions)
    );

    let mut q = sqlx::query_as::<_, TupleRow>(&query)
        .bind(subject_type)
        .bind(subject_id);
    if let Some(ot) = object_type {
        q = q.bind(ot);
    }
    if let Some(key) = after {
        q = q
            .bind(&key.subject_type)
            .bind(&key.subject_id)
            .bind(&key.object_type)
            .bind(&key.object_id)
            .bind(&key.relation)
            .bind(&key.subject_relation);
    }

    let rows = q.fetch_all(executor).await?;
    Ok(rows
        .into_iter()
        .map(
            |(subject_type, subject_id, object_type, object_id, relation, subject_relation)| {
                SubjectKey {
                    subject_type,
                    subject_id,
                    object_type,
                    object_id,
                    relation,
                    subject_relation,
                }
            },
        )
        .collect())
}

pub async fn list_object_ids<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    object_type: &str,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<String>, StorageError> {
    let cursor_clause = if after.is_some() { " AND object_id > $2" } else { "" };
    let query = format!(
        "SELECT DISTINCT object_id FROM relation_tuples \
         WHERE object_type = $1{cursor_clause} ORDER BY object_id LIMIT {limit}"
    );

    let mut q = sqlx::query_as::<_, (String,)>(&query).bind(object_type);
    if let Some(after) = after {
        q = q.bind(after);
    }
    let rows = q.fetch_all(executor).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn insert_schema_version<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    definition: &str,
) -> Result<i64, StorageError> {
    let (version,): (i64,) =
        sqlx::query_as("INSERT INTO schema_versions (definition) VALUES ($1) RETURNING version")
            .bind(definition)
            .fetch_one(executor)
            .await?;
    Ok(version)
}

pub async fn set_active_schema<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    version: i64,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO schema_active (id, version) VALUES (1, $1)
        ON CONFLICT (id) DO UPDATE SET version = EXCLUDED.version
        "#,
    )
    .bind(version)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn read_active_schema<'e>(
    executor: impl sqlx::PgExecutor<'e>,
) -> Result<Option<StoredSchema>, StorageError> {
    let row: Option<(i64, String)> = sqlx::query_as(
        r#"
        SELECT v.version, v.definition
        FROM schema_active a
        JOIN schema_versions v ON v.version = a.version
        WHERE a.id = 1
        "#,
    )
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(version, definition)| StoredSchema {
        version: u64::try_from(version).unwrap_or_default(),
        definition,
    }))
}
