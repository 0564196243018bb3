//! Upgrade from the flat storage layout.
//!
//! Older installations kept every version as a row of a standalone `versions`
//! table. On startup those rows are appended to the "UNNAMED" project and the
//! legacy table is emptied. The whole fold runs in one transaction: on any
//! failure nothing is written and the legacy rows stay where they are.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::models::{validate_versions, Property, Version, UNNAMED_PROJECT};

use super::repository::append_versions;
use super::schema::{list_tables, LEGACY_VERSIONS_TABLE};
use super::StepOutcome;

/// Detect the legacy table and fold its rows into the "UNNAMED" project.
pub async fn run(pool: &SqlitePool) -> StepOutcome {
    let tables = match list_tables(pool).await {
        Ok(tables) => tables,
        Err(e) => {
            tracing::warn!("Failed to list tables, skipping legacy upgrade: {}", e);
            return StepOutcome::from(&AppError::from(e));
        }
    };

    if !tables.iter().any(|name| name == LEGACY_VERSIONS_TABLE) {
        return StepOutcome::Skipped;
    }

    tracing::info!("Legacy '{}' table detected, upgrading", LEGACY_VERSIONS_TABLE);

    match fold_legacy_versions(pool).await {
        Ok(count) => {
            tracing::info!(
                "Moved {} legacy versions into project {}",
                count,
                UNNAMED_PROJECT
            );
            StepOutcome::Applied { count }
        }
        Err(e) => {
            let err = AppError::Migration(format!(
                "Legacy upgrade rolled back, '{}' left intact: {}",
                LEGACY_VERSIONS_TABLE,
                e.message()
            ));
            tracing::error!("{}", err);
            StepOutcome::from(&err)
        }
    }
}

async fn fold_legacy_versions(pool: &SqlitePool) -> Result<usize, AppError> {
    let mut tx = pool.begin().await?;

    // Being a write, this also holds the write lock for the rest of the fold.
    sqlx::query(
        "INSERT INTO projects (id, name, git_repository, versions) SELECT ?, ?, NULL, '[]' WHERE NOT EXISTS (SELECT 1 FROM projects WHERE name = ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(UNNAMED_PROJECT)
    .bind(UNNAMED_PROJECT)
    .execute(&mut *tx)
    .await?;

    let rows = sqlx::query("SELECT * FROM versions ORDER BY rowid")
        .fetch_all(&mut *tx)
        .await?;
    let legacy = rows
        .iter()
        .map(legacy_version_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    validate_versions(&legacy)?;

    let target: String =
        sqlx::query_scalar("SELECT id FROM projects WHERE name = ? ORDER BY rowid LIMIT 1")
            .bind(UNNAMED_PROJECT)
            .fetch_one(&mut *tx)
            .await?;
    append_versions(&mut tx, &target, &legacy).await?;

    let cleared = sqlx::query("DELETE FROM versions").execute(&mut *tx).await?;
    tracing::debug!("Cleared {} legacy rows", cleared.rows_affected());

    tx.commit().await?;
    Ok(legacy.len())
}

/// Map one legacy row onto a version. Only the two labels are mandatory;
/// absent or NULL optional columns fall back to their defaults, while a value
/// that cannot be decoded fails the row.
fn legacy_version_from_row(row: &SqliteRow) -> Result<Version, AppError> {
    let properties = match optional::<String>(row, "properties")? {
        Some(json) if !json.trim().is_empty() => serde_json::from_str::<Vec<Property>>(&json)?,
        _ => Vec::new(),
    };

    Ok(Version {
        version: row.try_get("version")?,
        prev_version: row.try_get("prev_version")?,
        is_beta: optional::<bool>(row, "is_beta")?.unwrap_or(false),
        details: optional(row, "details")?,
        downloader: optional(row, "downloader")?,
        release_date: optional::<DateTime<Utc>>(row, "release_date")?.unwrap_or_else(Utc::now),
        known_issues: optional(row, "known_issues")?,
        properties,
    })
}

fn optional<T>(row: &SqliteRow, column: &str) -> Result<Option<T>, sqlx::Error>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    match row.try_get::<Option<T>, _>(column) {
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        other => other,
    }
}
