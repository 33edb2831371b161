// ⚙️ Configuration - JSON file + environment overrides

use crate::species::SynonymTable;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Path of the JSON config file
pub const CONFIG_ENV: &str = "BEE_PROFILE_CONFIG";

/// Overrides `database_path`
pub const DATABASE_ENV: &str = "BEE_PROFILE_DB";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub synonyms_path: Option<PathBuf>,
    /// EnvFilter directive used when RUST_LOG is unset
    pub log_filter: String,
    pub server_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from("bee_profiles.db"),
            synonyms_path: None,
            log_filter: "info".to_string(),
            server_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file; missing keys take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        serde_json::from_str(&content).context("Failed to parse config JSON")
    }

    /// Defaults, then `BEE_PROFILE_CONFIG`, then `BEE_PROFILE_DB`
    pub fn load() -> Result<Self> {
        AppConfig::resolve(env::var(CONFIG_ENV).ok(), env::var(DATABASE_ENV).ok())
    }

    fn resolve(config_path: Option<String>, database_override: Option<String>) -> Result<Self> {
        let mut config = match config_path.filter(|p| !p.trim().is_empty()) {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::default(),
        };

        if let Some(db) = database_override.filter(|p| !p.trim().is_empty()) {
            config.database_path = PathBuf::from(db);
        }

        Ok(config)
    }

    /// Builder pattern: CLI flag override
    pub fn with_database_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.database_path = path;
        }
        self
    }

    /// Builder pattern: CLI flag override
    pub fn with_synonyms_path(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.synonyms_path = path;
        }
        self
    }

    /// Load the configured synonym table, or an empty one
    pub fn load_synonyms(&self) -> Result<SynonymTable> {
        let path = match &self.synonyms_path {
            Some(path) => path,
            None => return Ok(SynonymTable::new()),
        };

        let table = SynonymTable::from_file(path)
            .with_context(|| format!("Failed to load synonym table: {:?}", path))?;

        info!(path = %path.display(), synonyms = table.len(), "loaded synonym table");
        Ok(table)
    }
}
