//! Data models for the versions-track backend.
//!
//! Projects own their versions, versions own their properties. Users carry a
//! fixed numeric role.

mod project;
mod user;

pub use project::*;
pub use user::*;
