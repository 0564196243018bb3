//! Collection handles for projects and users.
//!
//! A project row carries its versions as one JSON document, so every change to
//! a project's versions is a single-row write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::auth::CredentialHasher;
use crate::errors::AppError;
use crate::models::{
    validate_name, validate_versions, NewProject, NewUser, PersonalSettings, Project, Role,
    UpdateProject, User, Version,
};
use crate::search::UserIndex;

const PROJECT_COLUMNS: &str = "id, name, git_repository, versions";
const USER_COLUMNS: &str =
    "id, username, password, role, register_date, versions_in_page, properties_in_page";

// ==================== PROJECTS ====================

/// Handle to the project collection.
#[derive(Clone)]
pub struct ProjectsModel {
    pool: SqlitePool,
}

impl ProjectsModel {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// List all projects in insertion order.
    pub async fn list(&self) -> Result<Vec<Project>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM projects ORDER BY rowid",
            PROJECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(project_from_row).collect()
    }

    pub async fn count(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Get a project by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Project>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE id = ?",
            PROJECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(project_from_row).transpose()
    }

    /// All projects carrying `name`, oldest first. Names are not unique.
    pub async fn find_by_name(&self, name: &str) -> Result<Vec<Project>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE name = ? ORDER BY rowid",
            PROJECT_COLUMNS
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(project_from_row).collect()
    }

    /// The oldest project carrying `name`.
    pub async fn find_first_by_name(&self, name: &str) -> Result<Option<Project>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE name = ? ORDER BY rowid LIMIT 1",
            PROJECT_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(project_from_row).transpose()
    }

    /// Create a new project.
    pub async fn create(&self, request: &NewProject) -> Result<Project, AppError> {
        request.validate()?;

        let project = project_from_request(request);
        let versions_json = serde_json::to_string(&project.versions)?;

        sqlx::query("INSERT INTO projects (id, name, git_repository, versions) VALUES (?, ?, ?, ?)")
            .bind(&project.id)
            .bind(&project.name)
            .bind(&project.git_repository)
            .bind(&versions_json)
            .execute(&self.pool)
            .await?;

        Ok(project)
    }

    /// Create a project only if the collection is empty. Check and insert are
    /// one statement, so concurrent callers cannot both succeed.
    pub async fn create_if_none(&self, request: &NewProject) -> Result<Option<Project>, AppError> {
        request.validate()?;

        let project = project_from_request(request);
        let versions_json = serde_json::to_string(&project.versions)?;

        let result = sqlx::query(
            "INSERT INTO projects (id, name, git_repository, versions) SELECT ?, ?, ?, ? WHERE NOT EXISTS (SELECT 1 FROM projects)",
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.git_repository)
        .bind(&versions_json)
        .execute(&self.pool)
        .await?;

        Ok((result.rows_affected() == 1).then_some(project))
    }

    /// Update a project's name and repository link.
    pub async fn update_details(
        &self,
        id: &str,
        request: &UpdateProject,
    ) -> Result<Project, AppError> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {} not found", id)))?;

        let name = request.name.clone().unwrap_or(existing.name);
        validate_name(&name)?;
        let git_repository = match &request.git_repository {
            Some(link) => link.clone(),
            None => existing.git_repository,
        };

        sqlx::query("UPDATE projects SET name = ?, git_repository = ? WHERE id = ?")
            .bind(&name)
            .bind(&git_repository)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(Project {
            id: id.to_string(),
            name,
            git_repository,
            versions: existing.versions,
        })
    }

    /// Append versions to the end of a project's version list in one write.
    pub async fn push_versions(&self, id: &str, versions: &[Version]) -> Result<Project, AppError> {
        validate_versions(versions)?;

        let mut tx = self.pool.begin().await?;
        append_versions(&mut tx, id, versions).await?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE id = ?",
            PROJECT_COLUMNS
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        project_from_row(&row)
    }

    /// Replace a project's whole version list.
    pub async fn replace_versions(
        &self,
        id: &str,
        versions: Vec<Version>,
    ) -> Result<Project, AppError> {
        validate_versions(&versions)?;
        let versions_json = serde_json::to_string(&versions)?;

        let result = sqlx::query("UPDATE projects SET versions = ? WHERE id = ?")
            .bind(&versions_json)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Project {} not found", id)));
        }

        self.get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {} not found", id)))
    }

    /// Delete a project together with its embedded versions.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Project {} not found", id)));
        }
        Ok(())
    }
}

/// Append `versions` to the project `id` on an open transaction.
pub(crate) async fn append_versions(
    conn: &mut SqliteConnection,
    id: &str,
    versions: &[Version],
) -> Result<usize, AppError> {
    // Take the write lock before reading so the read-modify-write cannot
    // interleave with another writer.
    let touched = sqlx::query("UPDATE projects SET name = name WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if touched.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Project {} not found", id)));
    }

    let stored: String = sqlx::query_scalar("SELECT versions FROM projects WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    let mut current: Vec<Version> = serde_json::from_str(&stored)?;
    current.extend_from_slice(versions);

    sqlx::query("UPDATE projects SET versions = ? WHERE id = ?")
        .bind(serde_json::to_string(&current)?)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(current.len())
}

// ==================== USERS ====================

/// Handle to the user collection.
#[derive(Clone)]
pub struct UsersModel {
    pool: SqlitePool,
    index: Option<Arc<UserIndex>>,
    hasher: Arc<dyn CredentialHasher>,
}

impl UsersModel {
    pub fn new(
        pool: SqlitePool,
        index: Option<Arc<UserIndex>>,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Self {
        Self {
            pool,
            index,
            hasher,
        }
    }

    /// List all users in registration order.
    pub async fn list(&self) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query(&format!("SELECT {} FROM users ORDER BY rowid", USER_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(user_from_row).collect()
    }

    pub async fn count(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Get a user by ID.
    pub async fn get(&self, id: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// The oldest user registered under `username`.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE username = ? ORDER BY rowid LIMIT 1",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Create a user from an already hashed password.
    pub async fn create(&self, request: &NewUser) -> Result<User, AppError> {
        request.validate()?;

        let user = user_from_request(request);
        self.insert(&user, false).await?;
        self.reindex(&user).await;
        Ok(user)
    }

    /// Create a user only if the collection is empty, in a single statement.
    pub async fn create_if_none(&self, request: &NewUser) -> Result<Option<User>, AppError> {
        request.validate()?;

        let user = user_from_request(request);
        if !self.insert(&user, true).await? {
            return Ok(None);
        }
        self.reindex(&user).await;
        Ok(Some(user))
    }

    /// Hash `password` off the async executor.
    pub async fn hash_password(&self, password: &str) -> Result<String, AppError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AppError::Internal(format!("Hashing task failed: {}", e)))?
    }

    /// Look up `username` and check `password` against its stored hash.
    /// Banned users never verify.
    pub async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, AppError> {
        let Some(user) = self.find_by_username(username).await? else {
            return Ok(None);
        };
        if user.role == Role::Banned {
            return Ok(None);
        }

        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        let stored = user.password.clone();
        let matches = tokio::task::spawn_blocking(move || hasher.verify(&password, &stored))
            .await
            .map_err(|e| AppError::Internal(format!("Verification task failed: {}", e)))??;

        Ok(matches.then_some(user))
    }

    /// Change a user's role.
    pub async fn set_role(&self, id: &str, role: Role) -> Result<User, AppError> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role.as_i64())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }

        let user = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;
        self.reindex(&user).await;
        Ok(user)
    }

    /// Replace a user's paging preferences.
    pub async fn update_settings(
        &self,
        id: &str,
        settings: PersonalSettings,
    ) -> Result<User, AppError> {
        if settings.versions_in_page < 1 || settings.properties_in_page < 1 {
            return Err(AppError::Validation(
                "Page sizes must be at least 1".to_string(),
            ));
        }

        let result = sqlx::query(
            "UPDATE users SET versions_in_page = ?, properties_in_page = ? WHERE id = ?",
        )
        .bind(settings.versions_in_page)
        .bind(settings.properties_in_page)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }

        self.get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))
    }

    /// Delete a user.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }

        if let Some(index) = &self.index {
            if let Err(e) = index.remove_user(id).await {
                tracing::warn!("Failed to remove user from index: {}", e);
            }
        }
        Ok(())
    }

    /// Full-text search over usernames and roles, best match first.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<User>, AppError> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| AppError::Search("User index is unavailable".to_string()))?;

        let mut users = Vec::new();
        for hit in index.search(query, limit)? {
            if let Some(user) = self.get(&hit.user_id).await? {
                users.push(user);
            }
        }
        Ok(users)
    }

    /// Rebuild the search index from the table.
    pub(crate) async fn rebuild_index(&self) -> Result<(), AppError> {
        if let Some(index) = &self.index {
            let users = self.list().await?;
            index.rebuild(&users).await?;
        }
        Ok(())
    }

    async fn insert(&self, user: &User, only_if_empty: bool) -> Result<bool, AppError> {
        let sql = if only_if_empty {
            "INSERT INTO users (id, username, password, role, register_date, versions_in_page, properties_in_page) SELECT ?, ?, ?, ?, ?, ?, ? WHERE NOT EXISTS (SELECT 1 FROM users)"
        } else {
            "INSERT INTO users (id, username, password, role, register_date, versions_in_page, properties_in_page) VALUES (?, ?, ?, ?, ?, ?, ?)"
        };

        let result = sqlx::query(sql)
            .bind(&user.id)
            .bind(&user.username)
            .bind(&user.password)
            .bind(user.role.as_i64())
            .bind(user.register_date)
            .bind(user.personal_settings.versions_in_page)
            .bind(user.personal_settings.properties_in_page)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reindex(&self, user: &User) {
        if let Some(index) = &self.index {
            if let Err(e) = index.index_user(user).await {
                tracing::warn!("Failed to index user {}: {}", user.id, e);
            }
        }
    }
}

// Helper functions for row conversion

fn project_from_request(request: &NewProject) -> Project {
    Project {
        id: uuid::Uuid::new_v4().to_string(),
        name: request.name.clone(),
        git_repository: request.git_repository.clone(),
        versions: request.versions.clone(),
    }
}

fn user_from_request(request: &NewUser) -> User {
    User {
        id: uuid::Uuid::new_v4().to_string(),
        username: request.username.clone(),
        password: request.password.clone(),
        role: request.role,
        register_date: Utc::now(),
        personal_settings: PersonalSettings::default(),
    }
}

fn project_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Project, AppError> {
    let versions: String = row.try_get("versions")?;
    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        git_repository: row.try_get("git_repository")?,
        versions: serde_json::from_str(&versions)?,
    })
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<User, AppError> {
    let role: i64 = row.try_get("role")?;
    let register_date: DateTime<Utc> = row.try_get("register_date")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        role: Role::try_from(role)?,
        register_date,
        personal_settings: PersonalSettings {
            versions_in_page: row.try_get("versions_in_page")?,
            properties_in_page: row.try_get("properties_in_page")?,
        },
    })
}
