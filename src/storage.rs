// Key-value storage backends for persisting the task list

use eyre::{Context, Result, eyre};
use fs2::FileExt;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A string key-value store the task list is saved into
pub trait Storage {
    /// Read the value stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; returns whether a value was present
    fn remove(&mut self, key: &str) -> Result<bool>;
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        (**self).remove(key)
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Volatile storage; nothing survives the process
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}

// ============================================================================
// Directory of JSON files
// ============================================================================

/// One `{key}.json` file per key inside a directory
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).context("Failed to create storage directory")?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }

    /// Lock file serializing writers across processes
    fn lock(&self, key: &str) -> Result<File> {
        let lock_path = self.dir.join(format!(".{}.lock", key));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context("Failed to open storage lock file")?;
        file.lock_exclusive().context("Failed to acquire file lock")?;
        Ok(file)
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let value = fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
        Ok(Some(value))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp_path = self.dir.join(format!(".{}.json.tmp", key));

        // Lock is released when dropped
        let _lock = self.lock(key)?;

        if let Err(e) = replace_file(&tmp_path, &path, value) {
            if tmp_path.exists() {
                if let Err(cleanup) = fs::remove_file(&tmp_path) {
                    warn!(path = ?tmp_path, error = ?cleanup, "Failed to remove temporary storage file");
                }
            }
            return Err(e);
        }

        debug!(key, path = ?path, bytes = value.len(), "FileStorage::set: wrote value");
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        let _lock = self.lock(key)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).context("Failed to remove storage file")?;
        Ok(true)
    }
}

/// Write `value` to `tmp_path`, fsync it, then move it over `path`
fn replace_file(tmp_path: &Path, path: &Path, value: &str) -> Result<()> {
    let mut tmp = File::create(tmp_path).context("Failed to create temporary storage file")?;
    tmp.write_all(value.as_bytes())?;
    tmp.sync_all()?;
    fs::rename(tmp_path, path).context("Failed to replace storage file")?;
    Ok(())
}

// ============================================================================
// SQLite
// ============================================================================

/// Key-value table in a SQLite database
pub struct SqliteStorage {
    db: Connection,
}

impl SqliteStorage {
    /// Open or create a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("Failed to create storage directory")?;
        }
        let db = Connection::open(path.as_ref()).context("Failed to open SQLite database")?;
        Self::with_connection(db)
    }

    /// Database that lives only as long as this value
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::with_connection(db)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        let storage = Self { db };
        storage.create_schema()?;
        Ok(storage)
    }

    fn create_schema(&self) -> Result<()> {
        debug!("Creating kv schema");

        self.db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        let value = self
            .db
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.db.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, value, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let deleted = self.db.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(deleted > 0)
    }
}

/// Keys double as file names, so keep them to a safe alphabet
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(eyre!("Storage key cannot be empty"));
    }
    if key.len() > 64 {
        return Err(eyre!("Storage key too long: {} (max 64 chars)", key));
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(eyre!("Invalid storage key: {} (must be alphanumeric with _/-)", key));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise_contract(storage: &mut dyn Storage) {
        assert_eq!(storage.get("todo-storage").unwrap(), None);

        storage.set("todo-storage", "first").unwrap();
        assert_eq!(storage.get("todo-storage").unwrap().as_deref(), Some("first"));

        storage.set("todo-storage", "second").unwrap();
        assert_eq!(storage.get("todo-storage").unwrap().as_deref(), Some("second"));

        assert!(storage.remove("todo-storage").unwrap());
        assert!(!storage.remove("todo-storage").unwrap());
        assert_eq!(storage.get("todo-storage").unwrap(), None);
    }

    #[test]
    fn test_memory_storage_contract() {
        exercise_contract(&mut MemoryStorage::new());
    }

    #[test]
    fn test_file_storage_contract() {
        let temp = TempDir::new().unwrap();
        let mut storage = FileStorage::open(temp.path().join("data")).unwrap();
        exercise_contract(&mut storage);
    }

    #[test]
    fn test_sqlite_storage_contract() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        exercise_contract(&mut storage);
    }

    #[test]
    fn test_file_storage_persists_across_open() {
        let temp = TempDir::new().unwrap();
        {
            let mut storage = FileStorage::open(temp.path()).unwrap();
            storage.set("todo-storage", "{\"a\":1}").unwrap();
        }

        let storage = FileStorage::open(temp.path()).unwrap();
        assert_eq!(storage.get("todo-storage").unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(temp.path().join("todo-storage.json").exists());
        assert!(!temp.path().join(".todo-storage.json.tmp").exists());
    }

    #[test]
    fn test_sqlite_storage_persists_across_open() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("nested/tasklist.db");
        {
            let mut storage = SqliteStorage::open(&db_path).unwrap();
            storage.set("todo-storage", "value").unwrap();
        }

        let storage = SqliteStorage::open(&db_path).unwrap();
        assert_eq!(storage.get("todo-storage").unwrap().as_deref(), Some("value"));
    }

    #[test]
    fn test_file_storage_rejects_bad_keys() {
        let temp = TempDir::new().unwrap();
        let mut storage = FileStorage::open(temp.path()).unwrap();
        assert!(storage.set("../escape", "x").is_err());
        assert!(storage.get("").is_err());
    }

    #[test]
    fn test_sqlite_storage_rejects_bad_keys() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        assert!(storage.set("a/b", "x").is_err());
        assert!(storage.get("a/b").is_err());
        assert!(storage.remove("").is_err());
    }

    #[test]
    fn test_file_storage_failed_write_removes_temp_file() {
        let temp = TempDir::new().unwrap();
        let mut storage = FileStorage::open(temp.path()).unwrap();

        // A non-empty directory at the target path makes the rename fail
        let target = temp.path().join("todo-storage.json");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("occupied"), "x").unwrap();

        assert!(storage.set("todo-storage", "value").is_err());
        assert!(!temp.path().join(".todo-storage.json.tmp").exists());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("todo-storage").is_ok());
        assert!(validate_key("todo_storage2").is_ok());

        assert!(validate_key("").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_boxed_storage_delegates() {
        let mut storage: Box<dyn Storage> = Box::new(MemoryStorage::new());
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
    }
}
