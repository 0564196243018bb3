//! Database module for SQLite persistence.
//!
//! [`Database::init`] is the single entry point: it opens the store, registers
//! the schema and hands back the collection accessors together with a
//! [`Startup`] handle for the background seeding and legacy upgrade.

pub mod bootstrap;
pub mod migration;
mod repository;
pub mod schema;

pub use repository::*;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::task::JoinHandle;

use crate::auth::{Argon2Hasher, CredentialHasher};
use crate::config::Config;
use crate::errors::AppError;
use crate::models::{Project, UNNAMED_PROJECT};
use crate::search::UserIndex;

/// Store paths already initialized by this process.
static INITIALIZED_STORES: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();

fn initialized_stores() -> MutexGuard<'static, HashSet<PathBuf>> {
    INITIALIZED_STORES
        .get_or_init(|| Mutex::new(HashSet::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Canonical location of the store file, so that every spelling of the same
/// path yields the same key.
async fn store_key(db_path: &Path) -> Result<PathBuf, AppError> {
    let parent = match db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = db_path
        .file_name()
        .ok_or_else(|| AppError::Internal(format!("Database path {:?} has no file name", db_path)))?;

    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create {:?}: {}", parent, e)))?;
    let parent = tokio::fs::canonicalize(parent)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to resolve {:?}: {}", parent, e)))?;

    Ok(parent.join(file_name))
}

/// Open the database connection pool and register the schema.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    schema::register(&pool).await?;

    Ok(pool)
}

/// Result of one startup step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The step changed the store; `count` records were written or moved.
    Applied { count: usize },
    /// Nothing to do.
    Skipped,
    /// The step failed and was abandoned.
    Failed { code: String, message: String },
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

impl From<&AppError> for StepOutcome {
    fn from(err: &AppError) -> Self {
        StepOutcome::Failed {
            code: err.error_code().to_string(),
            message: err.message(),
        }
    }
}

/// Outcome of the background startup work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub project_seed: StepOutcome,
    pub admin_seed: StepOutcome,
    pub legacy_upgrade: StepOutcome,
}

impl StartupReport {
    pub fn is_healthy(&self) -> bool {
        !(self.project_seed.is_failed()
            || self.admin_seed.is_failed()
            || self.legacy_upgrade.is_failed())
    }
}

/// Completion signal for the seeding and legacy upgrade started by
/// [`Database::init`].
pub struct Startup {
    handle: JoinHandle<StartupReport>,
}

impl Startup {
    /// Wait for the startup work to finish.
    pub async fn wait(self) -> StartupReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                let failed =
                    StepOutcome::from(&AppError::Internal(format!("Startup task aborted: {}", e)));
                StartupReport {
                    project_seed: failed.clone(),
                    admin_seed: failed.clone(),
                    legacy_upgrade: failed,
                }
            }
        }
    }
}

/// Initialized store handle.
#[derive(Clone)]
pub struct Database {
    projects: ProjectsModel,
    users: UsersModel,
}

impl Database {
    /// Initialize the store described by `config` with Argon2id password
    /// hashing.
    pub async fn init(config: &Config) -> Result<(Self, Startup), AppError> {
        Self::init_with_hasher(config, Arc::new(Argon2Hasher)).await
    }

    /// Initialize the store with a specific password hasher.
    ///
    /// # Panics
    ///
    /// Panics if the same store was already initialized by this process.
    pub async fn init_with_hasher(
        config: &Config,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Result<(Self, Startup), AppError> {
        let key = store_key(&config.db_path).await?;
        let first = initialized_stores().insert(key.clone());
        assert!(first, "A try to initialize an initialized DB detected.");

        let pool = match init_database(&config.db_path).await {
            Ok(pool) => pool,
            Err(e) => {
                // A store that never opened may be initialized again.
                initialized_stores().remove(&key);
                return Err(e.into());
            }
        };
        tracing::info!("Database opened at {:?}", config.db_path);

        let index = match UserIndex::open(&config.index_path) {
            Ok(index) => Some(Arc::new(index)),
            Err(e) => {
                tracing::warn!("User search index unavailable: {}", e);
                None
            }
        };

        let projects = ProjectsModel::new(pool.clone());
        let users = UsersModel::new(pool.clone(), index, hasher);

        if let Err(e) = users.rebuild_index().await {
            tracing::warn!("Failed to rebuild user index: {}", e);
        }

        let handle = tokio::spawn(run_startup(pool, projects.clone(), users.clone()));

        Ok((Self { projects, users }, Startup { handle }))
    }

    /// Handle to the project collection.
    pub fn projects_model(&self) -> &ProjectsModel {
        &self.projects
    }

    /// Look up a project by name, defaulting to "UNNAMED". When several
    /// projects share the name the oldest one is returned.
    pub async fn versions_model(&self, system_name: Option<&str>) -> Result<Project, AppError> {
        self.projects
            .find_first_by_name(system_name.unwrap_or(UNNAMED_PROJECT))
            .await?
            .ok_or_else(AppError::system_not_found)
    }

    /// Handle to the user collection.
    pub fn users_model(&self) -> &UsersModel {
        &self.users
    }
}

// Seeding runs before the upgrade so both never race over "UNNAMED".
async fn run_startup(pool: SqlitePool, projects: ProjectsModel, users: UsersModel) -> StartupReport {
    let project_seed = bootstrap::seed_default_project(&projects).await;
    let admin_seed = bootstrap::seed_admin_user(&users).await;
    let legacy_upgrade = migration::run(&pool).await;

    let report = StartupReport {
        project_seed,
        admin_seed,
        legacy_upgrade,
    };
    if report.is_healthy() {
        tracing::info!("Startup tasks finished: {:?}", report);
    } else {
        tracing::warn!("Startup tasks finished with failures: {:?}", report);
    }
    report
}


#[cfg(test)]
mod tests {
    use super::test_support::{init_test_db, test_config, PlainHasher};
    use super::*;
    use crate::models::{NewProject, NewUser, Role, Version};
    use tempfile::TempDir;

    async fn create_legacy_table(dir: &Path, labels: &[(&str, &str)]) {
        let pool = init_database(&test_config(dir).db_path).await.unwrap();
        sqlx::query(
            "CREATE TABLE versions (version TEXT NOT NULL, prev_version TEXT NOT NULL, is_beta INTEGER, properties TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        for (version, prev_version) in labels {
            sqlx::query("INSERT INTO versions (version, prev_version, is_beta, properties) VALUES (?, ?, 0, '[]')")
                .bind(version)
                .bind(prev_version)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;
    }

    fn panic_message(err: tokio::task::JoinError) -> String {
        let payload = err.into_panic();
        payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default()
    }

    async fn open_side_pool(dir: &Path) -> SqlitePool {
        init_database(&test_config(dir).db_path).await.unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_on_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let (db, startup) = init_test_db(temp_dir.path()).await;

        let report = startup.wait().await;
        assert_eq!(report.project_seed, StepOutcome::Applied { count: 1 });
        assert_eq!(report.admin_seed, StepOutcome::Applied { count: 1 });
        assert_eq!(report.legacy_upgrade, StepOutcome::Skipped);
        assert!(report.is_healthy());

        let projects = db.projects_model().list().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "UNNAMED");
        assert!(projects[0].versions.is_empty());

        let users = db.users_model().list().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "admin");
        assert_eq!(users[0].role, Role::Admin);
        assert_ne!(users[0].password, "admin");
        assert!(db
            .users_model()
            .verify_password("admin", "admin")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_second_init_of_same_store_panics() {
        let temp_dir = TempDir::new().unwrap();
        let (db, startup) = init_test_db(temp_dir.path()).await;
        startup.wait().await;

        let config = test_config(temp_dir.path());
        let second = tokio::spawn(async move {
            Database::init_with_hasher(&config, Arc::new(PlainHasher))
                .await
                .map(|_| ())
        })
        .await;
        assert_eq!(
            panic_message(second.unwrap_err()),
            "A try to initialize an initialized DB detected."
        );

        // The first handle keeps working.
        assert_eq!(db.projects_model().count().await.unwrap(), 1);
        assert_eq!(db.versions_model(None).await.unwrap().name, "UNNAMED");
    }

    #[tokio::test]
    async fn test_aliased_path_is_the_same_store() {
        let temp_dir = TempDir::new().unwrap();
        let (db, startup) = init_test_db(temp_dir.path()).await;
        startup.wait().await;

        std::fs::create_dir(temp_dir.path().join("sub")).unwrap();
        let mut config = test_config(temp_dir.path());
        config.db_path = temp_dir.path().join("sub").join("..").join("test.sqlite");
        config.index_path = temp_dir.path().join("other-index");

        let second = tokio::spawn(async move {
            Database::init_with_hasher(&config, Arc::new(PlainHasher))
                .await
                .map(|_| ())
        })
        .await;
        assert_eq!(
            panic_message(second.unwrap_err()),
            "A try to initialize an initialized DB detected."
        );
        assert_eq!(db.projects_model().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_init_can_be_retried() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());

        // A directory where the database file should be cannot be opened.
        std::fs::create_dir(&config.db_path).unwrap();
        assert!(Database::init_with_hasher(&config, Arc::new(PlainHasher))
            .await
            .is_err());

        std::fs::remove_dir(&config.db_path).unwrap();
        let (db, startup) = Database::init_with_hasher(&config, Arc::new(PlainHasher))
            .await
            .unwrap();
        assert!(startup.wait().await.is_healthy());
        assert_eq!(db.versions_model(None).await.unwrap().name, "UNNAMED");
    }

    #[tokio::test]
    async fn test_existing_data_skips_seeding() {
        let temp_dir = TempDir::new().unwrap();
        {
            let pool = open_side_pool(temp_dir.path()).await;
            ProjectsModel::new(pool.clone())
                .create(&NewProject::named("Core"))
                .await
                .unwrap();
            UsersModel::new(pool.clone(), None, Arc::new(PlainHasher))
                .create(&NewUser {
                    username: "owner".to_string(),
                    password: "plain$pw".to_string(),
                    role: Role::Admin,
                })
                .await
                .unwrap();
            pool.close().await;
        }

        let (db, startup) = init_test_db(temp_dir.path()).await;
        let report = startup.wait().await;
        assert_eq!(report.project_seed, StepOutcome::Skipped);
        assert_eq!(report.admin_seed, StepOutcome::Skipped);

        let projects = db.projects_model().list().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "Core");

        let users = db.users_model().list().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "owner");

        // Seeded users from before this process are searchable too.
        assert_eq!(db.users_model().search("owner", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_legacy_versions_fold_into_new_unnamed_project() {
        let temp_dir = TempDir::new().unwrap();
        create_legacy_table(temp_dir.path(), &[("1.0", "0.9"), ("1.1", "1.0")]).await;

        let (db, startup) = init_test_db(temp_dir.path()).await;
        let report = startup.wait().await;
        assert_eq!(report.legacy_upgrade, StepOutcome::Applied { count: 2 });

        let unnamed = db.projects_model().find_by_name("UNNAMED").await.unwrap();
        assert_eq!(unnamed.len(), 1);
        let labels: Vec<&str> = unnamed[0]
            .versions
            .iter()
            .map(|v| v.version.as_str())
            .collect();
        assert_eq!(labels, vec!["1.0", "1.1"]);
        assert_eq!(unnamed[0].versions[1].prev_version, "1.0");

        let pool = open_side_pool(temp_dir.path()).await;
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM versions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_legacy_versions_append_to_existing_unnamed_project() {
        let temp_dir = TempDir::new().unwrap();
        {
            let pool = open_side_pool(temp_dir.path()).await;
            ProjectsModel::new(pool.clone())
                .create(&NewProject {
                    name: "UNNAMED".to_string(),
                    git_repository: None,
                    versions: vec![Version::new("0.9", "0.8")],
                })
                .await
                .unwrap();
            pool.close().await;
        }
        create_legacy_table(temp_dir.path(), &[("1.0", "0.9"), ("1.1", "1.0")]).await;

        let (db, startup) = init_test_db(temp_dir.path()).await;
        let report = startup.wait().await;
        assert_eq!(report.project_seed, StepOutcome::Skipped);
        assert_eq!(report.legacy_upgrade, StepOutcome::Applied { count: 2 });

        let project = db.versions_model(Some("UNNAMED")).await.unwrap();
        let labels: Vec<&str> = project.versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(labels, vec!["0.9", "1.0", "1.1"]);
        assert_eq!(db.projects_model().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_versions_model_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let (db, startup) = init_test_db(temp_dir.path()).await;
        startup.wait().await;

        let core = db
            .projects_model()
            .create(&NewProject::named("Core"))
            .await
            .unwrap();
        assert_eq!(db.versions_model(Some("Core")).await.unwrap().id, core.id);

        let err = db.versions_model(Some("NoSuchSystem")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(err.message(), "System not found.");

        let by_default = db.versions_model(None).await.unwrap();
        let by_name = db.versions_model(Some("UNNAMED")).await.unwrap();
        assert_eq!(by_default, by_name);
    }
}
