//! Table and index registration.
//!
//! Tables are required; a failure to create one aborts initialization. Index
//! structures are best-effort and only logged when they cannot be built.

use sqlx::SqlitePool;

/// Collection name used by the flat, pre-project storage layout.
pub const LEGACY_VERSIONS_TABLE: &str = "versions";

const INDEXES: &[(&str, &str)] = &[
    (
        "idx_projects_name",
        "CREATE INDEX IF NOT EXISTS idx_projects_name ON projects(name)",
    ),
    (
        "idx_users_username",
        "CREATE INDEX IF NOT EXISTS idx_users_username ON users(username)",
    ),
    (
        "idx_users_role",
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
    ),
];

/// Create the project and user tables, then their indexes.
pub async fn register(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Versions are embedded in their project as a JSON array.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            git_repository TEXT,
            versions TEXT NOT NULL DEFAULT '[]'
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            password TEXT NOT NULL,
            role INTEGER NOT NULL DEFAULT 1 CHECK (role BETWEEN 0 AND 4),
            register_date TEXT NOT NULL,
            versions_in_page INTEGER NOT NULL DEFAULT 2,
            properties_in_page INTEGER NOT NULL DEFAULT 3
        );
        "#,
    )
    .execute(pool)
    .await?;

    for (name, sql) in INDEXES {
        if let Err(e) = sqlx::query(sql).execute(pool).await {
            tracing::warn!(index = %name, "Failed to build index: {}", e);
        }
    }

    Ok(())
}

/// Names of all tables currently in the store.
pub async fn list_tables(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .fetch_all(pool)
        .await
}
