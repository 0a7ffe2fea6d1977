//! On-disk layout for the local record service
//!
//! ```text
//! <root>/
//!   .taskpool.toml            # Configuration (optional)
//!   .taskpool/
//!     pool.json               # Templates, assignments and balances
//!     pool.lock               # Advisory lock guarding pool.json
//!     journal.jsonl           # Acknowledged transitions, append-only
//! ```

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};

/// Name of the pool state directory
pub const POOL_DIR: &str = ".taskpool";

/// Name of the configuration file at the pool root
pub const CONFIG_FILE: &str = ".taskpool.toml";

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    lock_timeout_ms: u64,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn pool_dir(&self) -> PathBuf {
        self.root.join(POOL_DIR)
    }

    pub fn pool_file(&self) -> PathBuf {
        self.pool_dir().join("pool.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.pool_dir().join("pool.lock")
    }

    pub fn journal_file(&self) -> PathBuf {
        self.pool_dir().join("journal.jsonl")
    }

    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.pool_dir())?;
        Ok(())
    }

    /// Acquire the pool lock.
    pub fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(self.lock_file(), self.lock_timeout_ms)
    }

    /// Load `path`, run `f` on it and write it back, all under the pool lock.
    ///
    /// Nothing is written when `f` fails.
    pub fn update_json<S, T, F>(&self, path: &Path, f: F) -> Result<T>
    where
        S: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut S) -> Result<T>,
    {
        let _lock = self.lock()?;
        let mut state: S = if path.exists() {
            self.read_json(path)?
        } else {
            S::default()
        };
        let result = f(&mut state)?;
        self.write_json(path, &state)?;
        Ok(result)
    }

    /// Read `path` under the pool lock, defaulting when it does not exist.
    pub fn read_json_locked<S>(&self, path: &Path) -> Result<S>
    where
        S: DeserializeOwned + Default,
    {
        let _lock = self.lock()?;
        if !path.exists() {
            return Ok(S::default());
        }
        self.read_json(path)
    }

    /// Write JSON data atomically (write to temp, then rename)
    pub fn write_json<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        lock::write_atomic(path, json.as_bytes())
    }

    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        let data: T = serde_json::from_str(&content)?;
        Ok(data)
    }

    /// Append a line to a JSONL file.
    ///
    /// Not atomic on its own; callers hold the pool lock.
    pub fn append_jsonl<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(record)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        writeln!(file, "{}", json)?;
        file.sync_all()?;

        Ok(())
    }

    pub fn read_jsonl<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: T = serde_json::from_str(&line)?;
            records.push(record);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn update_json_persists_on_success_only() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        let path = storage.pool_file();

        storage
            .update_json(&path, |map: &mut BTreeMap<String, u32>| {
                map.insert("kid-a".to_string(), 3);
                Ok(())
            })
            .unwrap();

        let failed = storage.update_json(&path, |map: &mut BTreeMap<String, u32>| {
            map.insert("kid-b".to_string(), 9);
            Err::<(), _>(crate::error::Error::InvalidArgument("nope".to_string()))
        });
        assert!(failed.is_err());

        let map: BTreeMap<String, u32> = storage.read_json_locked(&path).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("kid-a"), Some(&3));
    }

    #[test]
    fn jsonl_round_trip_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        let path = storage.journal_file();

        storage.append_jsonl(&path, &serde_json::json!({"n": 1})).unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"\n")
            .unwrap();
        storage.append_jsonl(&path, &serde_json::json!({"n": 2})).unwrap();

        let rows: Vec<serde_json::Value> = storage.read_jsonl(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["n"], 2);
    }
}
