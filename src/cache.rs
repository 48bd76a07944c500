//! Write-through local cache for warm starts.
//!
//! Entries are keyed JSON values kept in memory and flushed to a single file on
//! every write. The last write for a key wins. Signing out clears everything.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CacheError;

pub const KEY_NAME: &str = "name";
pub const KEY_METRICS: &str = "metrics";
pub const KEY_WORKOUT: &str = "workout";
pub const KEY_MACROS: &str = "macros";
pub const KEY_LAST_SESSION_KCAL: &str = "last_session_kcal";

pub struct LocalCache {
    path: PathBuf,
    entries: BTreeMap<String, Value>,
}

impl LocalCache {
    /// Opens the cache file. A missing or corrupt file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "Discarding corrupt cache");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        Self { path, entries }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.entries.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(err) => {
                debug!(key, error = %err, "Cached value has unexpected shape");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), serde_json::to_value(value)?);
        self.flush()
    }

    pub fn remove(&mut self, key: &str) -> Result<(), CacheError> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    /// Drops every entry, in memory and on disk.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn flush(&self) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::PhysiologicalProfile;
    use tempfile::TempDir;

    #[test]
    fn test_write_through_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = LocalCache::open(&path);
        cache.set(KEY_NAME, &"Alex").unwrap();
        cache.set(KEY_METRICS, &PhysiologicalProfile::default()).unwrap();

        let reopened = LocalCache::open(&path);
        assert_eq!(reopened.get::<String>(KEY_NAME).as_deref(), Some("Alex"));
        assert_eq!(reopened.get::<PhysiologicalProfile>(KEY_METRICS), Some(PhysiologicalProfile::default()));
    }

    #[test]
    fn test_last_writer_wins() {
        let dir = TempDir::new().unwrap();
        let mut cache = LocalCache::open(dir.path().join("cache.json"));
        cache.set(KEY_LAST_SESSION_KCAL, &10.0).unwrap();
        cache.set(KEY_LAST_SESSION_KCAL, &42.5).unwrap();
        assert_eq!(cache.get::<f64>(KEY_LAST_SESSION_KCAL), Some(42.5));
    }

    #[test]
    fn test_clear_on_sign_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let mut cache = LocalCache::open(&path);
        cache.set(KEY_WORKOUT, &serde_json::json!({ "title": "Push" })).unwrap();

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert!(!path.exists());
        assert!(LocalCache::open(&path).is_empty());

        // Clearing twice is fine.
        cache.clear().unwrap();
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(LocalCache::open(&path).is_empty());
    }
}
