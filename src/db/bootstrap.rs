//! First-run seeding: a default project and a default admin account.

use crate::errors::AppError;
use crate::models::{NewProject, NewUser, Role, UNNAMED_PROJECT};

use super::{ProjectsModel, StepOutcome, UsersModel};

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// Insert the "UNNAMED" project if the project collection is empty.
pub async fn seed_default_project(projects: &ProjectsModel) -> StepOutcome {
    match projects
        .create_if_none(&NewProject::named(UNNAMED_PROJECT))
        .await
    {
        Ok(Some(project)) => {
            tracing::info!(project_id = %project.id, "Seeded default project {}", UNNAMED_PROJECT);
            StepOutcome::Applied { count: 1 }
        }
        Ok(None) => StepOutcome::Skipped,
        Err(e) => {
            tracing::warn!("Default project seeding failed: {}", e);
            StepOutcome::from(&e)
        }
    }
}

/// Insert the default admin user if the user collection is empty.
pub async fn seed_admin_user(users: &UsersModel) -> StepOutcome {
    match try_seed_admin_user(users).await {
        Ok(true) => {
            tracing::info!("Seeded default admin user '{}'", DEFAULT_ADMIN_USERNAME);
            StepOutcome::Applied { count: 1 }
        }
        Ok(false) => StepOutcome::Skipped,
        Err(e) => {
            tracing::warn!("Default admin seeding failed: {}", e);
            StepOutcome::from(&e)
        }
    }
}

async fn try_seed_admin_user(users: &UsersModel) -> Result<bool, AppError> {
    // Skip the hashing cost on every start after the first.
    if users.count().await? > 0 {
        return Ok(false);
    }

    let password = users.hash_password(DEFAULT_ADMIN_PASSWORD).await?;
    let seeded = users
        .create_if_none(&NewUser {
            username: DEFAULT_ADMIN_USERNAME.to_string(),
            password,
            role: Role::Admin,
        })
        .await?;

    Ok(seeded.is_some())
}
