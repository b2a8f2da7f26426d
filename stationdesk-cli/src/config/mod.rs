//! Backend selection and mirror connection settings
//!
//! Stored as `db-config.json` in the data root. A missing file is replaced by
//! a file-only default; the active value sits behind an `ArcSwap` so it can be
//! reloaded while readers hold the previous one.

pub mod paths;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use paths::Paths;

/// Backend that serves reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadFrom {
    #[default]
    Excel,
    #[serde(alias = "mongodb")]
    Database,
}

/// Backends that receive writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteTo {
    #[default]
    Excel,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    /// Connection URL; empty means `mirror.db` in the data root
    pub url: String,
    pub min_pool_size: u32,
    pub max_pool_size: u32,
    pub server_selection_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: String::new(),
            min_pool_size: 1,
            max_pool_size: 5,
            server_selection_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub read_from: ReadFrom,
    pub write_to: WriteTo,
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Read the config file, writing the default first when it is missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = AppConfig::default();
            config.save(path)?;
            log::info!("Created default config at {}", path.display());
            return Ok(config);
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Whether any operation will touch the mirror
    pub fn needs_mirror(&self) -> bool {
        self.read_from == ReadFrom::Database || self.write_to == WriteTo::Both
    }

    /// Mirror URL, defaulting to a SQLite file in the data root
    pub fn mirror_url(&self, paths: &Paths) -> String {
        let url = self.database.url.trim();
        if url.is_empty() {
            format!("sqlite://{}", paths.mirror_db().display())
        } else {
            url.to_string()
        }
    }
}

/// Shared, reloadable configuration
#[derive(Debug)]
pub struct ConfigHandle {
    path: Option<PathBuf>,
    current: ArcSwap<AppConfig>,
}

impl ConfigHandle {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = AppConfig::load_or_create(&path)?;
        Ok(ConfigHandle {
            path: Some(path),
            current: ArcSwap::from_pointee(config),
        })
    }

    /// A handle with no backing file; `reload` keeps the value
    pub fn fixed(config: AppConfig) -> Self {
        ConfigHandle {
            path: None,
            current: ArcSwap::from_pointee(config),
        }
    }

    pub fn get(&self) -> Arc<AppConfig> {
        self.current.load_full()
    }

    pub fn set(&self, config: AppConfig) {
        self.current.store(Arc::new(config));
    }

    /// Re-read the config file
    pub fn reload(&self) -> Result<Arc<AppConfig>> {
        if let Some(path) = &self.path {
            let config = AppConfig::load_or_create(path)?;
            log::info!(
                "Reloaded config: read from {:?}, write to {:?}",
                config.read_from,
                config.write_to
            );
            self.set(config);
        }
        Ok(self.get())
    }
}
