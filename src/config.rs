// Configuration loaded from YAML, with CLI overrides applied on top

use crate::storage::{FileStorage, MemoryStorage, SqliteStorage, Storage};
use crate::store::STORAGE_KEY;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const APP_DIR: &str = "tasklist";
const CONFIG_FILE: &str = "config.yaml";
const SQLITE_FILE: &str = "tasklist.db";

/// Which storage backend holds the task list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One JSON file per key in the data directory
    #[default]
    File,
    /// Key-value table in `tasklist.db`
    Sqlite,
    /// Nothing is saved
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub storage_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            data_dir: default_data_dir(),
            storage_key: STORAGE_KEY.to_string(),
        }
    }
}

impl Config {
    /// Default config file location, e.g. `~/.config/tasklist/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load config from `path`, or from the default location when `None`
    ///
    /// A missing file yields defaults; an unreadable or invalid one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!(path = ?path, "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).with_context(|| format!("Failed to read config {:?}", path))?;
        let config = Self::from_yaml(&content).with_context(|| format!("Invalid config {:?}", path))?;
        debug!(path = ?path, ?config, "Loaded config");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config = serde_yaml::from_str(content).context("Failed to parse config YAML")?;
        Ok(config)
    }

    /// Apply command-line overrides; `None` keeps the configured value
    pub fn with_overrides(mut self, backend: Option<Backend>, data_dir: Option<PathBuf>) -> Self {
        if let Some(backend) = backend {
            self.backend = backend;
        }
        if let Some(data_dir) = data_dir {
            self.data_dir = data_dir;
        }
        self
    }

    /// Open the configured storage backend
    pub fn open_storage(&self) -> Result<Box<dyn Storage>> {
        let storage: Box<dyn Storage> = match self.backend {
            Backend::File => Box::new(FileStorage::open(&self.data_dir)?),
            Backend::Sqlite => Box::new(SqliteStorage::open(self.data_dir.join(SQLITE_FILE))?),
            Backend::Memory => Box::new(MemoryStorage::new()),
        };
        debug!(backend = ?self.backend, data_dir = ?self.data_dir, "Opened storage");
        Ok(storage)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".").join(format!(".{}", APP_DIR)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend, Backend::File);
        assert_eq!(config.storage_key, "todo-storage");
        assert!(config.data_dir.to_string_lossy().contains("tasklist"));
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = Config::from_yaml("backend: sqlite\n").unwrap();
        assert_eq!(config.backend, Backend::Sqlite);
        assert_eq!(config.storage_key, "todo-storage");

        let config = Config::from_yaml("data_dir: /tmp/tasks\nstorage_key: work\n").unwrap();
        assert_eq!(config.backend, Backend::File);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tasks"));
        assert_eq!(config.storage_key, "work");
    }

    #[test]
    fn test_from_yaml_empty_and_invalid() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
        assert!(Config::from_yaml("backend: cloud\n").is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = Config::load(Some(temp.path().join("absent.yaml").as_path())).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        fs::write(&path, "backend: memory\n").unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.backend, Backend::Memory);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let config = Config::from_yaml("backend: sqlite\ndata_dir: /from/file\n")
            .unwrap()
            .with_overrides(Some(Backend::File), Some(PathBuf::from("/from/cli")));
        assert_eq!(config.backend, Backend::File);
        assert_eq!(config.data_dir, PathBuf::from("/from/cli"));

        let config = Config::from_yaml("backend: sqlite\n").unwrap().with_overrides(None, None);
        assert_eq!(config.backend, Backend::Sqlite);
    }

    #[test]
    fn test_open_storage_backends() {
        let temp = TempDir::new().unwrap();
        for backend in [Backend::File, Backend::Sqlite, Backend::Memory] {
            let config = Config::default().with_overrides(Some(backend), Some(temp.path().join("data")));
            let mut storage = config.open_storage().unwrap();
            storage.set("k", "v").unwrap();
            assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
        }
        assert!(temp.path().join("data/tasklist.db").exists());
        assert!(temp.path().join("data/k.json").exists());
    }
}
