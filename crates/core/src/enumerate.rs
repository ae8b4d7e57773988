use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::EnumerationError;
use crate::resolver::AddressScheme;

/// A single entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub resource_uri: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Platform I/O seam: lists the direct children of a scoped directory address.
#[async_trait]
pub trait Enumerator: Send + Sync {
    async fn list(&self, resource_uri: &str) -> Result<Vec<DirEntry>, EnumerationError>;
}

/// Lists scoped addresses by mapping them back onto the local filesystem.
#[derive(Debug, Clone)]
pub struct FsEnumerator {
    scheme: AddressScheme,
}

impl FsEnumerator {
    pub fn new(scheme: AddressScheme) -> Self {
        Self { scheme }
    }
}

#[async_trait]
impl Enumerator for FsEnumerator {
    async fn list(&self, resource_uri: &str) -> Result<Vec<DirEntry>, EnumerationError> {
        let fail = |message: String| EnumerationError {
            resource_uri: resource_uri.to_string(),
            message,
        };
        let dir = self
            .scheme
            .resolve_inverse(resource_uri)
            .ok_or_else(|| fail("not a scoped address".to_string()))?;
        let mut read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| fail(e.to_string()))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| fail(e.to_string()))? {
            let path = entry.path();
            // Follow symlinks so linked files are listed like regular ones
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(md) => md,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let path = path.to_string_lossy().into_owned();
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                resource_uri: self.scheme.resolve(&path),
                path,
                is_dir: metadata.is_dir(),
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        Ok(entries)
    }
}
