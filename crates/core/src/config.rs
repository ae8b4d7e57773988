use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{CoreError, Result};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_SCHEME_PREFIX: &str =
    "content://com.android.externalstorage.documents/tree/primary%3A";
pub const DEFAULT_DIRECTORIES_BUDGET: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub page_size: usize,
    pub scheme_prefix: String,
    pub storage_root: PathBuf,
    /// Directory (relative to `storage_root`) offered to the permission dialog
    /// and probed to check that a stored grant still works. When it does not
    /// exist on this host, `storage_root` itself is probed.
    pub root_hint: String,
    pub directories_budget: usize,
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            scheme_prefix: DEFAULT_SCHEME_PREFIX.to_string(),
            storage_root: PathBuf::from("/storage/emulated/0"),
            root_hint: "Android/media".to_string(),
            directories_budget: DEFAULT_DIRECTORIES_BUDGET,
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    match dirs::data_dir() {
        Some(mut path) => {
            path.push("catview");
            path
        }
        None => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".catview"),
    }
}

impl EngineConfig {
    /// Defaults, then the optional JSON file, then `CATVIEW_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str::<EngineConfig>(&raw)?
            }
            None => EngineConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.check()?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = var("CATVIEW_PAGE_SIZE") {
            match raw.parse::<usize>() {
                Ok(n) => self.page_size = n,
                Err(_) => warn!(value = %raw, "ignoring invalid CATVIEW_PAGE_SIZE"),
            }
        }
        if let Some(raw) = var("CATVIEW_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(raw);
        }
        if let Some(raw) = var("CATVIEW_DATA_DIR") {
            self.data_dir = PathBuf::from(raw);
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(CoreError::Config("page_size must be at least 1".into()));
        }
        if self.scheme_prefix.is_empty() {
            return Err(CoreError::Config("scheme_prefix must not be empty".into()));
        }
        Ok(())
    }
}
