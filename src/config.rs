//! Runtime configuration resolved from the environment.
//!
//! Everything lives beneath `~/.equipment-manager/` unless overridden:
//!
//! - `EQUIPMENT_MANAGER_DB`: path of the SQLite file
//! - `EQUIPMENT_MANAGER_LOG_DIR`: directory for `equipment-manager.log`
//! - `EQUIPMENT_MANAGER_BACKUP_DIR`: directory that receives backups

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use directories::BaseDirs;

/// Folder name used beneath the user's home directory for application data.
const DATA_DIR_NAME: &str = ".equipment-manager";
/// SQLite file name stored inside the application data directory.
const DB_FILE_NAME: &str = "equipment.sqlite";

pub const DB_ENV: &str = "EQUIPMENT_MANAGER_DB";
pub const LOG_DIR_ENV: &str = "EQUIPMENT_MANAGER_LOG_DIR";
pub const BACKUP_DIR_ENV: &str = "EQUIPMENT_MANAGER_BACKUP_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl AppConfig {
    /// Resolve paths from the process environment, falling back to the home
    /// directory layout.
    pub fn from_env() -> Result<Self> {
        let base_dirs = BaseDirs::new().ok_or_else(|| anyhow!("could not locate home directory"))?;
        let data_dir = base_dirs.home_dir().join(DATA_DIR_NAME);
        Ok(Self::resolve(data_dir, |key| env::var(key).ok()))
    }

    /// Apply overrides from `lookup` on top of the defaults rooted at
    /// `data_dir`. Blank overrides are ignored.
    pub fn resolve<F>(data_dir: PathBuf, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_path = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        };

        Self {
            db_path: env_path(DB_ENV).unwrap_or_else(|| data_dir.join(DB_FILE_NAME)),
            log_dir: env_path(LOG_DIR_ENV).unwrap_or_else(|| data_dir.clone()),
            backup_dir: env_path(BACKUP_DIR_ENV).unwrap_or_else(|| data_dir.join("backups")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_live_under_data_dir() {
        let config = AppConfig::resolve(PathBuf::from("/home/band/.equipment-manager"), |_| None);
        assert_eq!(
            config.db_path,
            PathBuf::from("/home/band/.equipment-manager/equipment.sqlite")
        );
        assert_eq!(config.log_dir, PathBuf::from("/home/band/.equipment-manager"));
        assert_eq!(
            config.backup_dir,
            PathBuf::from("/home/band/.equipment-manager/backups")
        );
    }

    #[test]
    fn overrides_replace_defaults_and_blank_is_ignored() {
        let config = AppConfig::resolve(PathBuf::from("/data"), |key| match key {
            DB_ENV => Some("/srv/inventory.sqlite".to_string()),
            LOG_DIR_ENV => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(config.db_path, PathBuf::from("/srv/inventory.sqlite"));
        assert_eq!(config.log_dir, PathBuf::from("/data"));
    }
}
