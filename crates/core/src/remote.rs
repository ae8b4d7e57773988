use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{Category, DirectoryHandle};

/// A category as stored remotely. `directories` is a JSON string whose length
/// is capped by the store's attribute size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDocument {
    /// Assigned by the store; `None` before creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub category_id: String,
    pub name: String,
    pub color: String,
    pub directories: String,
    #[serde(default = "default_checked")]
    pub checked: bool,
    /// Index of the category in the user's list; lists are read back in this order.
    #[serde(default)]
    pub position: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_checked() -> bool {
    true
}

impl CategoryDocument {
    /// Fails with the serialized length when `directories` does not fit in `budget`.
    pub fn encode(
        user_id: &str,
        category: &Category,
        budget: usize,
    ) -> std::result::Result<Self, usize> {
        let directories = serde_json::to_string(&category.directories).unwrap_or_default();
        let len = directories.chars().count();
        if len > budget {
            return Err(len);
        }
        Ok(Self {
            id: None,
            user_id: user_id.to_string(),
            category_id: category.id.clone(),
            name: category.name.clone(),
            color: category.color.clone(),
            directories,
            checked: category.checked,
            position: 0,
            created_at: category.created_at,
            updated_at: category.updated_at,
        })
    }

    pub fn decode(&self) -> Result<Category> {
        let directories: Vec<DirectoryHandle> = serde_json::from_str(&self.directories)?;
        Ok(Category {
            id: self.category_id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            directories,
            checked: self.checked,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPermissions {
    pub read: Vec<String>,
    pub write: Vec<String>,
}

impl DocumentPermissions {
    pub fn owner(user_id: &str) -> Self {
        let role = format!("user:{user_id}");
        Self {
            read: vec![role.clone()],
            write: vec![role],
        }
    }
}

/// The remote document store holding every user's categories.
#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<CategoryDocument>>;
    async fn create_document(
        &self,
        doc: &CategoryDocument,
        permissions: &DocumentPermissions,
    ) -> Result<String>;
    async fn delete_document(&self, id: &str) -> Result<()>;
}

/// How a full category list is written to the remote store.
#[async_trait]
pub trait PushStrategy: Send + Sync {
    async fn push_all(
        &self,
        remote: &dyn RemoteDocumentStore,
        user_id: &str,
        categories: &[Category],
    ) -> Result<()>;
}

/// Deletes every remote document of the user, then recreates them from the list.
///
/// Idempotent, but a second device writing at the same time gets overwritten.
#[derive(Debug, Clone)]
pub struct ReplaceAll {
    pub directories_budget: usize,
}

impl ReplaceAll {
    pub fn new(directories_budget: usize) -> Self {
        Self { directories_budget }
    }

    /// Encodes every category, or reports all of those that are too large.
    pub fn encode_all(&self, user_id: &str, categories: &[Category]) -> Result<Vec<CategoryDocument>> {
        let mut docs = Vec::with_capacity(categories.len());
        let mut oversized = Vec::new();
        for (position, category) in (0u32..).zip(categories) {
            match CategoryDocument::encode(user_id, category, self.directories_budget) {
                Ok(doc) => docs.push(CategoryDocument { position, ..doc }),
                Err(len) => {
                    debug!(id = %category.id, len, "directories exceed remote budget");
                    oversized.push(category.id.clone());
                }
            }
        }
        if !oversized.is_empty() {
            return Err(CoreError::PayloadTooLarge {
                category_ids: oversized,
                budget: self.directories_budget,
            });
        }
        Ok(docs)
    }
}

#[async_trait]
impl PushStrategy for ReplaceAll {
    async fn push_all(
        &self,
        remote: &dyn RemoteDocumentStore,
        user_id: &str,
        categories: &[Category],
    ) -> Result<()> {
        // Nothing remote is touched unless every category fits
        let docs = self.encode_all(user_id, categories)?;

        let existing = remote.list_by_user(user_id).await?;
        for doc in &existing {
            if let Some(id) = &doc.id {
                remote.delete_document(id).await?;
            }
        }

        let permissions = DocumentPermissions::owner(user_id);
        for doc in &docs {
            remote.create_document(doc, &permissions).await?;
        }
        info!(user_id, deleted = existing.len(), created = docs.len(), "pushed categories");
        Ok(())
    }
}

/// Deletes the remote documents of the given categories. Returns how many were removed.
pub async fn delete_remote_categories(
    remote: &dyn RemoteDocumentStore,
    user_id: &str,
    category_ids: &[String],
) -> Result<usize> {
    let wanted: HashSet<&str> = category_ids.iter().map(String::as_str).collect();
    let mut removed = 0;
    for doc in remote.list_by_user(user_id).await? {
        if !wanted.contains(doc.category_id.as_str()) {
            continue;
        }
        if let Some(id) = &doc.id {
            remote.delete_document(id).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// In-process store. Can be switched offline to simulate network failures.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    docs: Mutex<Vec<(CategoryDocument, DocumentPermissions)>>,
    offline: AtomicBool,
    next_id: AtomicU64,
    calls: Mutex<Vec<String>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Names of the operations called so far, e.g. `list:u1`, `delete:doc-3`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn documents(&self) -> Vec<CategoryDocument> {
        self.docs.lock().iter().map(|(d, _)| d.clone()).collect()
    }

    fn enter(&self, call: String) -> Result<()> {
        self.calls.lock().push(call);
        if self.offline.load(Ordering::SeqCst) {
            return Err(CoreError::remote("remote store is offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDocumentStore for MemoryRemote {
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<CategoryDocument>> {
        self.enter(format!("list:{user_id}"))?;
        let mut docs: Vec<_> = self
            .docs
            .lock()
            .iter()
            .filter(|(d, _)| d.user_id == user_id)
            .map(|(d, _)| d.clone())
            .collect();
        docs.sort_by_key(|d| d.position);
        Ok(docs)
    }

    async fn create_document(
        &self,
        doc: &CategoryDocument,
        permissions: &DocumentPermissions,
    ) -> Result<String> {
        self.enter(format!("create:{}", doc.category_id))?;
        let id = format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut stored = doc.clone();
        stored.id = Some(id.clone());
        self.docs.lock().push((stored, permissions.clone()));
        Ok(id)
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        self.enter(format!("delete:{id}"))?;
        self.docs
            .lock()
            .retain(|(d, _)| d.id.as_deref() != Some(id));
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    document: CategoryDocument,
    permissions: DocumentPermissions,
}

/// Documents kept as JSON files in a directory, e.g. a synced folder.
#[derive(Debug, Clone)]
pub struct DirRemote {
    dir: PathBuf,
}

impl DirRemote {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(id)))
    }
}

#[async_trait]
impl RemoteDocumentStore for DirRemote {
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<CategoryDocument>> {
        let mut read_dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(read_dir) => read_dir,
            // Nothing has been pushed yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CoreError::remote(format!("{}: {e}", self.dir.display())));
            }
        };
        let mut docs = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(CoreError::remote)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(CoreError::remote)?;
            let stored: StoredDocument = serde_json::from_str(&raw)?;
            if stored.document.user_id == user_id {
                docs.push(stored.document);
            }
        }
        docs.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(docs)
    }

    async fn create_document(
        &self,
        doc: &CategoryDocument,
        permissions: &DocumentPermissions,
    ) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(CoreError::remote)?;
        let id = Uuid::new_v4().to_string();
        let mut document = doc.clone();
        document.id = Some(id.clone());
        let stored = StoredDocument {
            document,
            permissions: permissions.clone(),
        };
        tokio::fs::write(self.path_for(&id), serde_json::to_vec_pretty(&stored)?)
            .await
            .map_err(CoreError::remote)?;
        Ok(id)
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::remote(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HandleKind;

    fn category(id: &str, dirs: usize) -> Category {
        let now = Utc::now();
        Category {
            id: id.to_string(),
            name: id.to_uppercase(),
            color: "#000".into(),
            directories: (0..dirs)
                .map(|i| DirectoryHandle {
                    display_name: format!("d{i}"),
                    source_path: format!("/storage/emulated/0/d{i}"),
                    resource_uri: format!("scoped://d{i}"),
                    kind: HandleKind::Custom,
                    validated: true,
                })
                .collect(),
            checked: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn document_roundtrip() {
        let cat = category("a", 2);
        let doc = CategoryDocument::encode("u1", &cat, 5000).unwrap();
        assert_eq!(doc.decode().unwrap(), cat);
    }

    #[tokio::test]
    async fn replace_all_is_idempotent() {
        let remote = MemoryRemote::new();
        let strategy = ReplaceAll::new(5000);
        let cats = vec![category("a", 1), category("b", 0)];

        strategy.push_all(&remote, "u1", &cats).await.unwrap();
        strategy.push_all(&remote, "u1", &cats).await.unwrap();

        let docs = remote.list_by_user("u1").await.unwrap();
        assert_eq!(docs.len(), 2);
        let decoded: Vec<_> = docs.iter().map(|d| d.decode().unwrap()).collect();
        assert_eq!(decoded, cats);
    }

    #[tokio::test]
    async fn replace_all_leaves_other_users_alone() {
        let remote = MemoryRemote::new();
        let strategy = ReplaceAll::new(5000);
        strategy.push_all(&remote, "u2", &[category("z", 0)]).await.unwrap();
        strategy.push_all(&remote, "u1", &[category("a", 0)]).await.unwrap();
        strategy.push_all(&remote, "u1", &[]).await.unwrap();
        assert!(remote.list_by_user("u1").await.unwrap().is_empty());
        assert_eq!(remote.list_by_user("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_category_fails_before_any_remote_call() {
        let remote = MemoryRemote::new();
        let strategy = ReplaceAll::new(200);
        let err = strategy
            .push_all(&remote, "u1", &[category("small", 0), category("big", 20)])
            .await
            .unwrap_err();
        match err {
            CoreError::PayloadTooLarge {
                category_ids,
                budget,
            } => {
                assert_eq!(category_ids, vec!["big".to_string()]);
                assert_eq!(budget, 200);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn offline_remote_reports_unavailable() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        let err = remote.list_by_user("u1").await.unwrap_err();
        assert!(matches!(err, CoreError::RemoteUnavailable { .. }));
    }

    #[tokio::test]
    async fn delete_selected_categories() {
        let remote = MemoryRemote::new();
        ReplaceAll::new(5000)
            .push_all(&remote, "u1", &[category("a", 0), category("b", 0)])
            .await
            .unwrap();
        let removed = delete_remote_categories(&remote, "u1", &["a".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let left: Vec<_> = remote
            .documents()
            .into_iter()
            .map(|d| d.category_id)
            .collect();
        assert_eq!(left, ["b"]);
    }

    #[tokio::test]
    async fn dir_remote_persists_documents() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DirRemote::new(dir.path().join("remote"));
        ReplaceAll::new(5000)
            .push_all(&remote, "u1", &[category("a", 1)])
            .await
            .unwrap();
        let docs = remote.list_by_user("u1").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].decode().unwrap().id, "a");
        assert!(remote.list_by_user("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dir_remote_keeps_list_order() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DirRemote::new(dir.path().join("remote"));
        // Same timestamps everywhere, so only the stored position can order them
        let now = Utc::now();
        let cats: Vec<_> = ["e", "d", "c", "b", "a", "f", "g", "h"]
            .into_iter()
            .map(|id| Category {
                created_at: now,
                updated_at: now,
                ..category(id, 0)
            })
            .collect();
        ReplaceAll::new(5000).push_all(&remote, "u1", &cats).await.unwrap();

        let ids: Vec<_> = remote
            .list_by_user("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.category_id)
            .collect();
        assert_eq!(ids, ["e", "d", "c", "b", "a", "f", "g", "h"]);
    }
}
