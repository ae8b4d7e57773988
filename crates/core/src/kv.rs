use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// On-device key-value persistence. A `set` replaces the whole value atomically.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One file per key under `dir`, written to a temp file and renamed into place.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        write_atomic(self.path_for(key), value.as_bytes().to_vec()).await
    }
}

/// Writes `bytes` to a temp file next to `target` and renames it into place.
pub(crate) async fn write_atomic(target: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| CoreError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(CoreError::storage)?
}

#[cfg(feature = "cache")]
pub use sled_store::SledStore;

#[cfg(feature = "cache")]
mod sled_store {
    use super::*;

    pub struct SledStore {
        db: sled::Db,
    }

    impl SledStore {
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let db = sled::open(path).map_err(CoreError::storage)?;
            Ok(Self { db })
        }
    }

    #[async_trait]
    impl KeyValueStore for SledStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            let Some(raw) = self.db.get(key).map_err(CoreError::storage)? else {
                return Ok(None);
            };
            String::from_utf8(raw.to_vec())
                .map(Some)
                .map_err(CoreError::storage)
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.db
                .insert(key, value.as_bytes())
                .map_err(CoreError::storage)?;
            self.db.flush_async().await.map_err(CoreError::storage)?;
            Ok(())
        }
    }
}
