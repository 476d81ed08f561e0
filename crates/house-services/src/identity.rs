//! Identity persistence: recovering a device's identifier across restarts.
//!
//! The store is a flat string map. On disk it is UTF-8 text, one `key=value`
//! pair per line.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use house_core::identity::{is_reserved, random_identifier};
use house_core::HouseIdentifier;

/// Cache key the identifier is stored under.
pub const IDENTIFIER_KEY: &str = "houseIdentifier";

pub trait KeyValueStore: Send + Sync {
    fn retrieve(&self, key: &str) -> Option<String>;
    fn store(&self, key: &str, value: &str) -> Result<(), CacheError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to read cache {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to write cache {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
}

/// Key-value store backed by a text file. Every `store` rewrites the file
/// through a temporary sibling and a rename, so readers never see half a file.
pub struct FileCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileCache {
    /// Open `path`. A missing file is an empty cache.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => parse(&path, &text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(CacheError::ReadFailed(path, e)),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), CacheError> {
        let write_err = |e: std::io::Error| CacheError::WriteFailed(self.path.clone(), e);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let mut text = String::new();
        for (key, value) in entries {
            text.push_str(key);
            text.push('=');
            text.push_str(value);
            text.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)
    }
}

fn parse(path: &Path, text: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                entries.insert(key.to_string(), value.to_string());
            }
            _ => {
                tracing::warn!(path = %path.display(), line = n + 1, "skipping corrupt cache line")
            }
        }
    }
    entries
}

impl KeyValueStore for FileCache {
    fn retrieve(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn store(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }
}

/// In-process store, for tests and devices without storage.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryCache {
    fn retrieve(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn store(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Work out this device's identifier.
///
/// An explicitly configured identifier wins. Otherwise the cached one is
/// reused, and on first run a fresh random identifier is minted and cached.
/// A cached value that is unparseable or reserved is replaced.
pub fn resolve_identifier(
    store: &dyn KeyValueStore,
    explicit: Option<HouseIdentifier>,
) -> Result<HouseIdentifier, CacheError> {
    if let Some(identifier) = explicit {
        return Ok(identifier);
    }

    if let Some(cached) = store.retrieve(IDENTIFIER_KEY) {
        match cached.trim().parse::<HouseIdentifier>() {
            Ok(identifier) if !is_reserved(identifier) => return Ok(identifier),
            _ => tracing::warn!(%cached, "cached identifier unusable, minting a new one"),
        }
    }

    let identifier = random_identifier();
    store.store(IDENTIFIER_KEY, &identifier.to_string())?;
    tracing::info!(identifier, "minted new house identifier");
    Ok(identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("house-cache-test-{}-{}", std::process::id(), name))
            .join("cache")
    }

    #[test]
    fn explicit_identifier_wins() {
        let store = MemoryCache::new();
        store.store(IDENTIFIER_KEY, "55").unwrap();
        assert_eq!(resolve_identifier(&store, Some(99)).unwrap(), 99);
    }

    #[test]
    fn first_run_mints_and_caches() {
        let store = MemoryCache::new();
        let minted = resolve_identifier(&store, None).unwrap();
        assert!(!is_reserved(minted));
        assert_eq!(store.retrieve(IDENTIFIER_KEY), Some(minted.to_string()));
        assert_eq!(resolve_identifier(&store, None).unwrap(), minted);
    }

    #[test]
    fn reserved_or_garbage_cached_value_is_replaced() {
        for bad in ["1", "0", "not-a-number"] {
            let store = MemoryCache::new();
            store.store(IDENTIFIER_KEY, bad).unwrap();
            let identifier = resolve_identifier(&store, None).unwrap();
            assert!(!is_reserved(identifier));
            assert_ne!(store.retrieve(IDENTIFIER_KEY).as_deref(), Some(bad));
        }
    }

    #[test]
    fn file_cache_persists_across_reopen() {
        let path = temp_path("reopen");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());

        let cache = FileCache::open(&path).unwrap();
        assert!(cache.retrieve(IDENTIFIER_KEY).is_none());
        let minted = resolve_identifier(&cache, None).unwrap();
        drop(cache);

        let reopened = FileCache::open(&path).unwrap();
        assert_eq!(resolve_identifier(&reopened, None).unwrap(), minted);
        assert!(!path.with_extension("tmp").exists());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let path = temp_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "garbage\n=nokey\nhouseIdentifier=4242\nother=a=b\n").unwrap();

        let cache = FileCache::open(&path).unwrap();
        assert_eq!(cache.retrieve(IDENTIFIER_KEY).as_deref(), Some("4242"));
        assert_eq!(cache.retrieve("other").as_deref(), Some("a=b"));
        assert!(cache.retrieve("garbage").is_none());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
