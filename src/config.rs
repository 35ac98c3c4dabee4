use crate::{error::LineageError, viz::VizOptions};
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
};

pub const DEFAULT_CONFIG_FILE: &str = "lineage.toml";
pub const DATABASE_URL_ENV: &str = "LINEAGE_DATABASE_URL";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:file_tracking.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineageConfig {
    pub database_url: String,
    pub viz: VizOptions,
}

impl Default for LineageConfig {
    fn default() -> Self {
        LineageConfig {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            viz: VizOptions::default(),
        }
    }
}

impl LineageConfig {
    /// Applies `LINEAGE_DATABASE_URL` on top of whatever was loaded.
    pub fn with_env(mut self) -> Self {
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            if !url.trim().is_empty() {
                tracing::debug!("Database url taken from {}", DATABASE_URL_ENV);
                self.database_url = url;
            }
        }
        self
    }
}

pub trait ConfigProvider: Send + Sync {
    fn get_config(&self) -> Result<LineageConfig, LineageError>;
    fn set_config(&self, config: &LineageConfig) -> Result<(), LineageError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get_config(&self) -> Result<LineageConfig, LineageError> {
        tracing::debug!("Attempting to read config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(LineageConfig::default());
        }
        let content = read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }

    fn set_config(&self, config: &LineageConfig) -> Result<(), LineageError> {
        tracing::debug!("Attempting to write config to: {:?}", &self.path);
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}
