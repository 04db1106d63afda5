//! Cache stores for session bundles

use crate::{HarnessError, HarnessResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Key-value store the session cache persists into
pub trait CacheStore: Send + Sync {
    /// Get the value stored under `key`
    fn get(&self, key: &str) -> HarnessResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &[u8]) -> HarnessResult<()>;

    /// Remove `key`; missing keys are not an error
    fn remove(&self, key: &str) -> HarnessResult<()>;
}

/// Gzip-compressed files under one directory, one file per key.
///
/// Writes go through a temporary file in the same directory followed by a
/// rename, so readers never observe a partially written entry.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// Store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> HarnessResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(HarnessError::CacheIo(format!("Invalid cache key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.bin.gz", key)))
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, key: &str) -> HarnessResult<Option<Vec<u8>>> {
        let path = self.entry_path(key)?;
        let compressed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut value = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut value)
            .map_err(|e| HarnessError::CorruptCache {
                key: key.to_string(),
                reason: format!("gzip: {}", e),
            })?;

        debug!(
            "Read cache entry {} ({} bytes, {} compressed)",
            path.display(),
            value.len(),
            compressed.len()
        );
        Ok(Some(value))
    }

    fn set(&self, key: &str, value: &[u8]) -> HarnessResult<()> {
        let path = self.entry_path(key)?;
        fs::create_dir_all(&self.dir)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(value)?;
        let compressed = encoder.finish()?;

        let tmp_path = self
            .dir
            .join(format!(".{}.{}.tmp", key, std::process::id()));
        fs::write(&tmp_path, &compressed)?;
        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!(
            "Wrote cache entry {} ({} bytes, {} compressed)",
            path.display(),
            value.len(),
            compressed.len()
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> HarnessResult<()> {
        match fs::remove_file(self.entry_path(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store; entries live as long as the store
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCacheStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> HarnessResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> HarnessResult<()> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> HarnessResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
