//! Key/value substrate under the session store.
//!
//! The browser keeps the session in window-level storage so it survives an
//! OAuth redirect. Here that is a `KvStore`: memory for tests and embedding,
//! one JSON file per key for native hosts.
//!
//! | Backend | Durability | Atomic write |
//! |---------|------------|--------------|
//! | `MemoryKv` | process | yes (single lock) |
//! | `FileKv` | disk | temp file + rename |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::keys::env;
use crate::core::{WalletError, WalletResult};

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> WalletResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> WalletResult<()>;
    fn remove(&self, key: &str) -> WalletResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self { Self::default() }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> WalletResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| WalletError::Storage("kv lock".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> WalletResult<()> {
        let mut entries = self.entries.lock().map_err(|_| WalletError::Storage("kv lock".into()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> WalletResult<()> {
        let mut entries = self.entries.lock().map_err(|_| WalletError::Storage("kv lock".into()))?;
        entries.remove(key);
        Ok(())
    }
}

/// One `<key>.json` per entry under `dir`.
#[derive(Debug, Clone)]
pub struct FileKv {
    dir: PathBuf,
}

impl FileKv {
    /// Open under `$WALLETSYNC_ROOT/<app>/data`, else the platform data dir.
    pub fn open(app: &str) -> WalletResult<Self> {
        Self::at(data_dir(app))
    }

    pub fn at(dir: impl Into<PathBuf>) -> WalletResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| WalletError::Storage(format!("kv mkdir {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    fn path(&self, key: &str) -> PathBuf { self.dir.join(format!("{key}.json")) }
}

impl KvStore for FileKv {
    fn get(&self, key: &str) -> WalletResult<Option<String>> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WalletError::Storage(format!("kv read {key}: {e}"))),
        }
    }

    fn set(&self, key: &str, value: &str) -> WalletResult<()> {
        let target = self.path(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        std::fs::write(&tmp, value).map_err(|e| WalletError::Storage(format!("kv write {key}: {e}")))?;
        std::fs::rename(&tmp, &target).map_err(|e| WalletError::Storage(format!("kv rename {key}: {e}")))
    }

    fn remove(&self, key: &str) -> WalletResult<()> {
        match std::fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WalletError::Storage(format!("kv remove {key}: {e}"))),
        }
    }
}

pub fn data_dir(app: &str) -> PathBuf {
    let root = std::env::var(env::ROOT)
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")));
    root.join(app).join("data")
}
