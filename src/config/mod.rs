//! Configuration module for the versions-track backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to the user search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let db_path = env::var("VT_DB_PATH")
            .unwrap_or_else(|_| "./data/versions_track.sqlite".to_string())
            .into();

        let index_path = env::var("VT_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_addr = env::var("VT_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:5000".to_string())
            .parse()
            .expect("Invalid VT_BIND_ADDR format");

        let log_level = env::var("VT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Self {
            db_path,
            index_path,
            bind_addr,
            log_level,
        }
    }
}
