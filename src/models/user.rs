//! User model and the fixed role ladder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Access level of a user. The numeric values are persisted and never
/// reinterpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Role {
    /// No access at all.
    Banned = 0,
    /// Read-only access.
    #[default]
    Guest = 1,
    /// Read access plus commenting on versions.
    User = 2,
    /// Create, modify and delete versions and properties.
    Manager = 3,
    /// Full access including the admin panel.
    Admin = 4,
}

impl Role {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Banned => "Banned",
            Role::Guest => "Guest",
            Role::User => "User",
            Role::Manager => "Manager",
            Role::Admin => "Admin",
        }
    }

    pub fn can_view(self) -> bool {
        self >= Role::Guest
    }

    pub fn can_comment(self) -> bool {
        self >= Role::User
    }

    pub fn can_manage_versions(self) -> bool {
        self >= Role::Manager
    }

    pub fn can_access_admin_panel(self) -> bool {
        self == Role::Admin
    }
}

impl TryFrom<i64> for Role {
    type Error = AppError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Role::Banned),
            1 => Ok(Role::Guest),
            2 => Ok(Role::User),
            3 => Ok(Role::Manager),
            4 => Ok(Role::Admin),
            other => Err(AppError::Validation(format!(
                "Role must be between 0 and 4, got {}",
                other
            ))),
        }
    }
}

impl From<Role> for i64 {
    fn from(role: Role) -> Self {
        role.as_i64()
    }
}

/// Per-user paging preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalSettings {
    #[serde(default = "default_versions_in_page")]
    pub versions_in_page: i64,
    #[serde(default = "default_properties_in_page")]
    pub properties_in_page: i64,
}

fn default_versions_in_page() -> i64 {
    2
}

fn default_properties_in_page() -> i64 {
    3
}

impl Default for PersonalSettings {
    fn default() -> Self {
        Self {
            versions_in_page: default_versions_in_page(),
            properties_in_page: default_properties_in_page(),
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    /// Precomputed password hash; never serialized outwards.
    #[serde(skip_serializing, default)]
    pub password: String,
    pub role: Role,
    pub register_date: DateTime<Utc>,
    pub personal_settings: PersonalSettings,
}

/// Input for creating a new user. `password` must already be hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub role: Role,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.username.trim().is_empty() {
            return Err(AppError::Validation("Username is required".to_string()));
        }
        if self.password.is_empty() {
            return Err(AppError::Validation("Password is required".to_string()));
        }
        Ok(())
    }
}
