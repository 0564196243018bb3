//! Project model: a tracked system owning its release versions.
//!
//! Versions and their properties are embedded documents. They are persisted as
//! a single JSON column on the owning project row and have no identity outside
//! of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;

/// Name of the project that holds versions not assigned to any other system.
pub const UNNAMED_PROJECT: &str = "UNNAMED";

/// Kind of changelog entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum PropertyType {
    #[default]
    Feature,
    #[serde(rename = "Fix Bug")]
    FixBug,
    Change,
    Deprecated,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Feature => "Feature",
            PropertyType::FixBug => "Fix Bug",
            PropertyType::Change => "Change",
            PropertyType::Deprecated => "Deprecated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Feature" => Some(PropertyType::Feature),
            "Fix Bug" => Some(PropertyType::FixBug),
            "Change" => Some(PropertyType::Change),
            "Deprecated" => Some(PropertyType::Deprecated),
            _ => None,
        }
    }
}

/// How much of a change is covered by tests.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TestsScope {
    None,
    #[default]
    Partial,
    Large,
    Full,
}

impl TestsScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestsScope::None => "None",
            TestsScope::Partial => "Partial",
            TestsScope::Large => "Large",
            TestsScope::Full => "Full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "None" => Some(TestsScope::None),
            "Partial" => Some(TestsScope::Partial),
            "Large" => Some(TestsScope::Large),
            "Full" => Some(TestsScope::Full),
            _ => None,
        }
    }
}

/// A single changelog entry within a version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Property {
    /// Assigned when the property is created; stored entries without one get
    /// a fresh id when decoded.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(rename = "type", default)]
    pub kind: PropertyType,
    pub description: String,
    #[serde(default)]
    pub tests_scope: TestsScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_issues: Option<String>,
}

impl Property {
    pub fn new(kind: PropertyType, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            description: description.into(),
            tests_scope: TestsScope::default(),
            tests_details: None,
            known_issues: None,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.description.trim().is_empty() {
            return Err(AppError::Validation(
                "Property description is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// A labeled release of a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Version {
    pub version: String,
    pub prev_version: String,
    #[serde(default)]
    pub is_beta: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloader: Option<String>,
    #[serde(default = "Utc::now")]
    pub release_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_issues: Option<String>,
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl Version {
    pub fn new(version: impl Into<String>, prev_version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            prev_version: prev_version.into(),
            is_beta: false,
            details: None,
            downloader: None,
            release_date: Utc::now(),
            known_issues: None,
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.version.trim().is_empty() {
            return Err(AppError::Validation("Version label is required".to_string()));
        }
        if self.prev_version.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Previous version is required for version {}",
                self.version
            )));
        }
        self.properties.iter().try_for_each(Property::validate)
    }
}

/// A tracked software system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_repository: Option<String>,
    pub versions: Vec<Version>,
}

impl Project {
    /// Find a version by its label.
    pub fn version(&self, label: &str) -> Option<&Version> {
        self.versions.iter().find(|v| v.version == label)
    }
}

/// Input for creating a new project.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub git_repository: Option<String>,
    #[serde(default)]
    pub versions: Vec<Version>,
}

impl NewProject {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            git_repository: None,
            versions: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        validate_name(&self.name)?;
        validate_versions(&self.versions)
    }
}

/// Changes to a project's own fields; `None` keeps the stored value.
///
/// `git_repository` distinguishes an absent field (keep) from an explicit
/// `null` (clear).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProject {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub git_repository: Option<Option<String>>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

pub(crate) fn validate_name(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("Project name is required".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_versions(versions: &[Version]) -> Result<(), AppError> {
    versions.iter().try_for_each(Version::validate)
}
