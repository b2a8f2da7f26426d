//! Where the file store lives on disk

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Relocates the whole file-store tree
pub const DATA_DIR_ENV: &str = "STATIONDESK_DATA_DIR";
/// Seed workbook copied when the lookup workbook is missing
pub const LOOKUP_TEMPLATE_ENV: &str = "STATIONDESK_LOOKUP_TEMPLATE";

const APP_DIR: &str = "stationdesk";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
    pub lookup_template: PathBuf,
}

fn non_empty_env(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

impl Paths {
    /// Resolve from the environment, falling back to the user data directory
    pub fn from_env() -> Result<Self> {
        let root = match non_empty_env(DATA_DIR_ENV) {
            Some(root) => root,
            None => dirs::data_dir()
                .context("Could not determine the user data directory")?
                .join(APP_DIR),
        };
        let mut paths = Paths::at(root);
        if let Some(template) = non_empty_env(LOOKUP_TEMPLATE_ENV) {
            paths.lookup_template = template;
        }
        log::debug!("Data root: {}", paths.root.display());
        Ok(paths)
    }

    /// Everything under an explicit root
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Paths {
            lookup_template: root.join("templates").join("lookups.xlsx"),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lookups_file(&self) -> PathBuf {
        self.root.join("lookups.xlsx")
    }

    pub fn stations_dir(&self) -> PathBuf {
        self.root.join("stations")
    }

    pub fn repairs_dir(&self) -> PathBuf {
        self.root.join("repairs")
    }

    pub fn users_file(&self) -> PathBuf {
        self.root.join("users.xlsx")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("db-config.json")
    }

    /// Default location of the document mirror database
    pub fn mirror_db(&self) -> PathBuf {
        self.root.join("mirror.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_root() {
        let paths = Paths::at("/srv/data");
        assert_eq!(paths.lookups_file(), PathBuf::from("/srv/data/lookups.xlsx"));
        assert_eq!(paths.stations_dir(), PathBuf::from("/srv/data/stations"));
        assert_eq!(paths.repairs_dir(), PathBuf::from("/srv/data/repairs"));
        assert_eq!(paths.config_file(), PathBuf::from("/srv/data/db-config.json"));
        assert_eq!(
            paths.lookup_template,
            PathBuf::from("/srv/data/templates/lookups.xlsx")
        );
    }
}
