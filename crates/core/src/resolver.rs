use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::enumerate::{DirEntry, Enumerator};
use crate::error::{CoreError, EnumerationError, Result};
use crate::kv::KeyValueStore;
use crate::model::{DirectoryHandle, HandleKind};

const SEPARATOR: &str = "%2F";
pub const GRANT_KEY: &str = "permission.grant";

/// Pure mapping between filesystem paths and scoped directory addresses.
///
/// A path under `storage_root` becomes `prefix` followed by its percent-encoded
/// segments joined with an encoded `/`. Paths outside the root keep a leading
/// encoded separator so they can be mapped back unambiguously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressScheme {
    prefix: String,
    storage_root: PathBuf,
}

impl AddressScheme {
    pub fn new(prefix: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            storage_root: storage_root.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.scheme_prefix.clone(), config.storage_root.clone())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_scoped(&self, s: &str) -> bool {
        s.starts_with(&self.prefix)
    }

    /// Never touches the filesystem. Scoped addresses are returned unchanged.
    pub fn resolve(&self, path: &str) -> String {
        if self.is_scoped(path) {
            return path.to_string();
        }
        let path = Path::new(path);
        let (relative, absolute) = if path.is_absolute() {
            match path.strip_prefix(&self.storage_root) {
                Ok(rel) => (rel, false),
                Err(_) => (path, true),
            }
        } else {
            (path, false)
        };

        let mut segments: Vec<String> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(seg) => {
                    segments.push(urlencoding::encode(&seg.to_string_lossy()).into_owned())
                }
                Component::ParentDir => {
                    segments.pop();
                }
                _ => {}
            }
        }

        let lead = if absolute { SEPARATOR } else { "" };
        format!("{}{}{}", self.prefix, lead, segments.join(SEPARATOR))
    }

    /// Maps a scoped address back to a filesystem path. `None` for foreign or
    /// malformed addresses.
    pub fn resolve_inverse(&self, resource_uri: &str) -> Option<PathBuf> {
        let rest = resource_uri.strip_prefix(&self.prefix)?;
        let (mut path, rest) = match rest.strip_prefix(SEPARATOR) {
            Some(rest) => (PathBuf::from("/"), rest),
            None => (self.storage_root.clone(), rest),
        };
        if rest.is_empty() {
            return Some(path);
        }
        for segment in rest.split(SEPARATOR) {
            let decoded = urlencoding::decode(segment).ok()?;
            if decoded.is_empty() || decoded == "." || decoded == ".." || decoded.contains('/') {
                return None;
            }
            path.push(decoded.as_ref());
        }
        Some(path)
    }

    /// Human-readable last segment of a path or scoped address.
    pub fn display_name(&self, path_or_uri: &str) -> String {
        let tail = match path_or_uri.strip_prefix(&self.prefix) {
            Some(rest) => rest
                .rsplit(SEPARATOR)
                .next()
                .and_then(|seg| urlencoding::decode(seg).ok())
                .map(|seg| seg.into_owned())
                .unwrap_or_default(),
            None => Path::new(path_or_uri)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        if tail.is_empty() {
            path_or_uri.to_string()
        } else {
            tail
        }
    }
}

/// Record of a successful permission grant, persisted in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub token: String,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantResponse {
    pub granted: bool,
    pub grant_token: String,
}

/// Asks the user for access to a directory tree.
#[async_trait]
pub trait PermissionDialog: Send + Sync {
    async fn request_directory_grant(&self, root_hint: &str) -> Result<GrantResponse>;
}

/// Answers every prompt the same way. Used for headless runs.
#[derive(Debug, Clone)]
pub struct StaticDialog {
    pub granted: bool,
}

#[async_trait]
impl PermissionDialog for StaticDialog {
    async fn request_directory_grant(&self, root_hint: &str) -> Result<GrantResponse> {
        Ok(GrantResponse {
            granted: self.granted,
            grant_token: format!("static:{root_hint}"),
        })
    }
}

/// Turns user-chosen paths into [`DirectoryHandle`]s and keeps the access grant alive.
#[derive(Clone)]
pub struct DirectoryResolver {
    scheme: AddressScheme,
    root_hint: String,
    enumerator: Arc<dyn Enumerator>,
    dialog: Arc<dyn PermissionDialog>,
    kv: Arc<dyn KeyValueStore>,
}

impl DirectoryResolver {
    pub fn new(
        scheme: AddressScheme,
        root_hint: impl Into<String>,
        enumerator: Arc<dyn Enumerator>,
        dialog: Arc<dyn PermissionDialog>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            scheme,
            root_hint: root_hint.into(),
            enumerator,
            dialog,
            kv,
        }
    }

    pub fn scheme(&self) -> &AddressScheme {
        &self.scheme
    }

    pub fn resolve(&self, path: &str) -> String {
        self.scheme.resolve(path)
    }

    pub fn resolve_inverse(&self, resource_uri: &str) -> Option<PathBuf> {
        self.scheme.resolve_inverse(resource_uri)
    }

    pub fn handle(&self, path: &str, kind: HandleKind) -> DirectoryHandle {
        DirectoryHandle {
            display_name: self.scheme.display_name(path),
            source_path: path.to_string(),
            resource_uri: self.resolve(path),
            kind,
            validated: true,
        }
    }

    pub async fn stored_grant(&self) -> Result<Option<Grant>> {
        let Some(raw) = self.kv.get(GRANT_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Grant>(&raw) {
            Ok(grant) => Ok(Some(grant)),
            Err(e) => {
                warn!(error = %e, "discarding unreadable permission grant");
                Ok(None)
            }
        }
    }

    /// Reuses the stored grant while the root can still be listed, otherwise
    /// prompts the user and persists the new grant.
    pub async fn ensure_permission(&self) -> Result<Grant> {
        if let Some(grant) = self.stored_grant().await? {
            if self.probe_root().await {
                debug!(granted_at = %grant.granted_at, "stored grant still valid");
                return Ok(grant);
            }
            info!("stored grant no longer valid, asking again");
        }

        let response = self.dialog.request_directory_grant(&self.root_hint).await?;
        if !response.granted {
            warn!(root = %self.root_hint, "directory access declined");
            return Err(CoreError::PermissionDenied {
                reason: format!("access to '{}' was declined", self.root_hint),
            });
        }

        let grant = Grant {
            token: response.grant_token,
            granted_at: Utc::now(),
        };
        self.kv
            .set(GRANT_KEY, &serde_json::to_string(&grant)?)
            .await?;
        info!(root = %self.root_hint, "directory access granted");
        Ok(grant)
    }

    async fn probe_root(&self) -> bool {
        let hint = self.resolve(&self.root_hint);
        if self.enumerator.list(&hint).await.is_ok() {
            return true;
        }
        // Hosts without the hint directory probe the storage root instead
        let hint_missing = match self.scheme.resolve_inverse(&hint) {
            Some(path) => matches!(tokio::fs::try_exists(&path).await, Ok(false)),
            None => false,
        };
        hint_missing && self.enumerator.list(&self.resolve("")).await.is_ok()
    }

    /// Lists the handle and records the outcome in `handle.validated`.
    pub async fn enumerate(
        &self,
        handle: &mut DirectoryHandle,
    ) -> std::result::Result<Vec<DirEntry>, EnumerationError> {
        let listed = self.enumerator.list(&handle.resource_uri).await;
        handle.validated = listed.is_ok();
        listed
    }

    /// Records whether the handle can be enumerated in `handle.validated`, but
    /// always reports it usable: listing a directory can fail on platforms
    /// that still allow reading the files inside it.
    pub async fn validate(&self, handle: &mut DirectoryHandle) -> bool {
        if let Err(e) = self.enumerate(handle).await {
            warn!(uri = %handle.resource_uri, error = %e, "directory not enumerable, keeping it");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerate::FsEnumerator;
    use crate::kv::MemoryStore;
    use parking_lot::Mutex;

    const PREFIX: &str = "content://tree/primary%3A";

    fn scheme() -> AddressScheme {
        AddressScheme::new(PREFIX, "/storage/emulated/0")
    }

    #[test]
    fn resolve_encodes_each_segment() {
        let uri = scheme().resolve("/storage/emulated/0/Android/media/com.whatsapp/WhatsApp Images");
        assert_eq!(
            uri,
            "content://tree/primary%3AAndroid%2Fmedia%2Fcom.whatsapp%2FWhatsApp%20Images"
        );
    }

    #[test]
    fn resolve_is_identity_on_scoped_addresses() {
        let uri = format!("{PREFIX}Download%2Fx");
        assert_eq!(scheme().resolve(&uri), uri);
    }

    #[test]
    fn resolve_normalises_dots_and_slashes() {
        let s = scheme();
        assert_eq!(
            s.resolve("/storage/emulated/0/DCIM/./Camera/"),
            s.resolve("/storage/emulated/0/DCIM/Other/../Camera")
        );
    }

    #[test]
    fn inverse_roundtrips() {
        let s = scheme();
        for path in [
            "/storage/emulated/0/Pictures/Screenshots",
            "/storage/emulated/0/a%2Fb/c d",
            "/mnt/usb/Movies",
            "/storage/emulated/0",
        ] {
            let uri = s.resolve(path);
            let back = s.resolve_inverse(&uri).unwrap();
            assert_eq!(back, PathBuf::from(path), "{uri}");
            assert_eq!(s.resolve(&back.to_string_lossy()), uri);
        }
    }

    #[test]
    fn inverse_rejects_foreign_and_traversal() {
        let s = scheme();
        assert!(s.resolve_inverse("file:///etc").is_none());
        assert!(s.resolve_inverse(&format!("{PREFIX}a%2F..%2Fb")).is_none());
    }

    #[test]
    fn display_name_uses_last_segment() {
        let s = scheme();
        assert_eq!(s.display_name("/storage/emulated/0/DCIM/Camera"), "Camera");
        assert_eq!(s.display_name(&s.resolve("Telegram/Telegram Video")), "Telegram Video");
    }

    struct ScriptedDialog {
        answer: bool,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl PermissionDialog for ScriptedDialog {
        async fn request_directory_grant(&self, _root_hint: &str) -> Result<GrantResponse> {
            *self.calls.lock() += 1;
            Ok(GrantResponse {
                granted: self.answer,
                grant_token: "tok-1".into(),
            })
        }
    }

    fn resolver_in(root: &Path, answer: bool) -> (DirectoryResolver, Arc<ScriptedDialog>, Arc<MemoryStore>) {
        let scheme = AddressScheme::new("scoped://", root);
        let dialog = Arc::new(ScriptedDialog {
            answer,
            calls: Mutex::new(0),
        });
        let kv = Arc::new(MemoryStore::new());
        let resolver = DirectoryResolver::new(
            scheme.clone(),
            "Android/media",
            Arc::new(FsEnumerator::new(scheme)),
            dialog.clone(),
            kv.clone(),
        );
        (resolver, dialog, kv)
    }

    #[tokio::test]
    async fn grant_is_persisted_and_reused() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("Android/media")).unwrap();
        let (resolver, dialog, kv) = resolver_in(root.path(), true);

        let first = resolver.ensure_permission().await.unwrap();
        assert_eq!(first.token, "tok-1");
        assert!(kv.get(GRANT_KEY).await.unwrap().is_some());

        let second = resolver.ensure_permission().await.unwrap();
        assert_eq!(second, first);
        assert_eq!(*dialog.calls.lock(), 1);
    }

    #[tokio::test]
    async fn stale_grant_prompts_again() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, dialog, kv) = resolver_in(&dir.path().join("unmounted"), true);
        let old = Grant {
            token: "old".into(),
            granted_at: Utc::now(),
        };
        kv.set(GRANT_KEY, &serde_json::to_string(&old).unwrap())
            .await
            .unwrap();

        // Neither the hint nor the storage root can be listed
        let grant = resolver.ensure_permission().await.unwrap();
        assert_eq!(grant.token, "tok-1");
        assert_eq!(*dialog.calls.lock(), 1);
    }

    #[tokio::test]
    async fn missing_hint_directory_falls_back_to_storage_root() {
        let root = tempfile::tempdir().unwrap();
        let (resolver, dialog, _) = resolver_in(root.path(), true);

        resolver.ensure_permission().await.unwrap();
        resolver.ensure_permission().await.unwrap();
        assert_eq!(*dialog.calls.lock(), 1);
    }

    #[tokio::test]
    async fn declined_dialog_is_permission_denied() {
        let root = tempfile::tempdir().unwrap();
        let (resolver, _, kv) = resolver_in(root.path(), false);
        let err = resolver.ensure_permission().await.unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
        assert!(kv.get(GRANT_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn validate_keeps_unreachable_handles_usable() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("ok")).unwrap();
        let (resolver, _, _) = resolver_in(root.path(), true);

        let mut good = resolver.handle("ok", HandleKind::Custom);
        let mut gone = resolver.handle("gone", HandleKind::Custom);
        assert!(resolver.validate(&mut good).await);
        assert!(good.validated);
        assert!(resolver.validate(&mut gone).await);
        assert!(!gone.validated);
    }
}
