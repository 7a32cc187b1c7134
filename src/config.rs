//! Configuration for the queue and the store.
//!
//! Every section and field is optional; missing values fall back to defaults.
//!
//! ```toml
//! [queue]
//! page_size = 250
//! auto_commit = true
//!
//! [store]
//! path = "./tournaments.db"  # absent = temporary database
//! temporary = false
//! flush_on_commit = false
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::result::DbResult;

/// Default number of operations per page.
pub const DEFAULT_PAGE_SIZE: usize = 250;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub store: StoreConfig,
}

impl Config {
    pub fn from_toml(source: &str) -> DbResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }
}

/// Paging behavior of an operation queue.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    /// Operations per page. Values below 1 are treated as 1.
    pub page_size: usize,
    /// Flush automatically once a page is full.
    pub auto_commit: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            auto_commit: true,
        }
    }
}

impl QueueConfig {
    pub fn new(page_size: usize, auto_commit: bool) -> Self {
        Self {
            page_size,
            auto_commit,
        }
    }
}

/// Location and durability of the sled store.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Database directory. A temporary database is used when unset.
    pub path: Option<PathBuf>,
    /// Remove the database when the store is dropped.
    pub temporary: bool,
    /// Flush to disk after every committed page.
    pub flush_on_commit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::TinyBatchError;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.queue.page_size, DEFAULT_PAGE_SIZE);
        assert!(config.queue.auto_commit);
        assert!(config.store.path.is_none());
    }

    #[test]
    fn partial_sections() {
        let config = Config::from_toml(
            r#"
            [queue]
            page_size = 50

            [store]
            path = "./tournaments.db"
            flush_on_commit = true
            "#,
        )
        .unwrap();

        assert_eq!(config.queue, QueueConfig::new(50, true));
        assert_eq!(config.store.path, Some(PathBuf::from("./tournaments.db")));
        assert!(config.store.flush_on_commit);
        assert!(!config.store.temporary);
    }

    #[test]
    fn invalid_toml() {
        assert!(matches!(
            Config::from_toml("[queue]\npage_size = \"many\""),
            Err(TinyBatchError::Config(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tinybatch.toml");
        std::fs::write(&path, "[queue]\nauto_commit = false\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.queue, QueueConfig::new(DEFAULT_PAGE_SIZE, false));

        assert!(matches!(
            Config::load(dir.path().join("missing.toml")),
            Err(TinyBatchError::Io(_))
        ));
    }
}
