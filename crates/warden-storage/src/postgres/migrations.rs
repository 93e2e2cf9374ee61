use sqlx::PgPool;

/// Creates the tuple and schema tables. Safe to re-run.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS relation_tuples (
            object_type      TEXT NOT NULL,
            object_id        TEXT NOT NULL,
            relation         TEXT NOT NULL,
            subject_type     TEXT NOT NULL,
            subject_id       TEXT NOT NULL,
            subject_relation TEXT NOT NULL DEFAULT '',
            created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (object_type, object_id, relation, subject_type, subject_id,
                         subject_relation)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_tuples_by_subject
        ON relation_tuples
            (subject_type, subject_id, object_type, object_id, relation, subject_relation)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_versions (
            version     BIGSERIAL PRIMARY KEY,
            definition  TEXT NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_active (
            id       SMALLINT PRIMARY KEY CHECK (id = 1),
            version  BIGINT NOT NULL REFERENCES schema_versions(version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
