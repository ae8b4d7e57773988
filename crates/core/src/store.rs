use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::kv::KeyValueStore;
use crate::model::{Category, CategoryPatch, DirectoryHandle, SourceDirectory};

/// Local cache of a user's categories.
///
/// The whole list is the unit of persistence: every mutation loads it,
/// edits it in memory and writes it back with a single `set`.
#[derive(Clone)]
pub struct CategoryStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl CategoryStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    pub fn for_user(kv: Arc<dyn KeyValueStore>, user_id: &str) -> Self {
        Self::new(kv, format!("categories.{user_id}"))
    }

    pub async fn load(&self) -> Result<Vec<Category>> {
        match self.kv.get(&self.key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn replace_all(&self, categories: &[Category]) -> Result<()> {
        let raw = serde_json::to_string(categories)?;
        self.kv.set(&self.key, &raw).await?;
        debug!(key = %self.key, count = categories.len(), "category cache written");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Category> {
        self.load()
            .await?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found(id))
    }

    pub async fn create(
        &self,
        name: &str,
        color: &str,
        directories: Vec<DirectoryHandle>,
    ) -> Result<Category> {
        let mut categories = self.load().await?;
        let name = check_name(name)?;
        ensure_unique(&categories, &name, None)?;

        let now = Utc::now();
        let category = Category {
            id: Uuid::new_v4().to_string(),
            name,
            color: color.to_string(),
            directories: dedup_handles(directories),
            checked: true,
            created_at: now,
            updated_at: now,
        };
        categories.push(category.clone());
        self.replace_all(&categories).await?;
        Ok(category)
    }

    pub async fn update(&self, id: &str, patch: CategoryPatch) -> Result<Category> {
        let mut categories = self.load().await?;
        let index = position(&categories, id)?;

        let name = match &patch.name {
            Some(name) => {
                let name = check_name(name)?;
                ensure_unique(&categories, &name, Some(id))?;
                Some(name)
            }
            None => None,
        };
        if patch.is_empty() {
            return Ok(categories[index].clone());
        }

        let category = &mut categories[index];
        if let Some(name) = name {
            category.name = name;
        }
        if let Some(color) = patch.color {
            category.color = color;
        }
        if let Some(directories) = patch.directories {
            category.directories = dedup_handles(directories);
        }
        category.updated_at = next_timestamp(category.updated_at);
        let updated = category.clone();

        self.replace_all(&categories).await?;
        Ok(updated)
    }

    /// Removing an unknown id is not an error.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut categories = self.load().await?;
        let before = categories.len();
        categories.retain(|c| c.id != id);
        if categories.len() == before {
            debug!(id, "delete of unknown category ignored");
            return Ok(());
        }
        self.replace_all(&categories).await
    }

    /// Presentation state only: `updated_at` is left alone.
    pub async fn set_checked(&self, id: &str, checked: bool) -> Result<()> {
        let mut categories = self.load().await?;
        let index = position(&categories, id)?;
        if categories[index].checked == checked {
            return Ok(());
        }
        categories[index].checked = checked;
        self.replace_all(&categories).await
    }

    /// Adding a directory already in the category leaves it unchanged.
    pub async fn add_directory(&self, id: &str, handle: DirectoryHandle) -> Result<Category> {
        let mut categories = self.load().await?;
        let index = position(&categories, id)?;
        let category = &mut categories[index];
        if category
            .directories
            .iter()
            .any(|d| d.resource_uri == handle.resource_uri)
        {
            return Ok(category.clone());
        }
        category.directories.push(handle);
        category.updated_at = next_timestamp(category.updated_at);
        let updated = category.clone();
        self.replace_all(&categories).await?;
        Ok(updated)
    }

    pub async fn remove_directory(&self, id: &str, resource_uri: &str) -> Result<Category> {
        let mut categories = self.load().await?;
        let index = position(&categories, id)?;
        let category = &mut categories[index];
        let before = category.directories.len();
        category.directories.retain(|d| d.resource_uri != resource_uri);
        if category.directories.len() == before {
            return Ok(category.clone());
        }
        category.updated_at = next_timestamp(category.updated_at);
        let updated = category.clone();
        self.replace_all(&categories).await?;
        Ok(updated)
    }

    /// Directories of checked categories, in category order, as aggregation input.
    pub async fn checked_sources(&self) -> Result<Vec<SourceDirectory>> {
        Ok(checked_sources(&self.load().await?))
    }
}

pub fn checked_sources(categories: &[Category]) -> Vec<SourceDirectory> {
    categories
        .iter()
        .filter(|c| c.checked)
        .flat_map(|c| {
            c.directories.iter().map(|handle| SourceDirectory {
                owner_category_id: c.id.clone(),
                handle: handle.clone(),
            })
        })
        .collect()
}

fn not_found(id: &str) -> CoreError {
    CoreError::NotFound { id: id.to_string() }
}

fn position(categories: &[Category], id: &str) -> Result<usize> {
    categories
        .iter()
        .position(|c| c.id == id)
        .ok_or_else(|| not_found(id))
}

fn check_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::InvalidCategory {
            reason: "name must not be empty".into(),
        });
    }
    Ok(name.to_string())
}

fn ensure_unique(categories: &[Category], name: &str, except: Option<&str>) -> Result<()> {
    let taken = categories
        .iter()
        .filter(|c| Some(c.id.as_str()) != except)
        .any(|c| c.has_name(name));
    if taken {
        return Err(CoreError::DuplicateName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn dedup_handles(directories: Vec<DirectoryHandle>) -> Vec<DirectoryHandle> {
    let mut seen = HashSet::new();
    directories
        .into_iter()
        .filter(|d| seen.insert(d.resource_uri.clone()))
        .collect()
}

/// Strictly later than `previous`, even if the clock has not moved.
pub(crate) fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::model::HandleKind;

    fn store() -> CategoryStore {
        CategoryStore::for_user(Arc::new(MemoryStore::new()), "u1")
    }

    fn handle(uri: &str) -> DirectoryHandle {
        DirectoryHandle {
            display_name: uri.to_string(),
            source_path: uri.to_string(),
            resource_uri: uri.to_string(),
            kind: HandleKind::Custom,
            validated: true,
        }
    }

    #[tokio::test]
    async fn create_and_reload() {
        let store = store();
        let cat = store
            .create("  Work ", "#ff0000", vec![handle("a"), handle("a"), handle("b")])
            .await
            .unwrap();
        assert_eq!(cat.name, "Work");
        assert_eq!(cat.directories.len(), 2);
        assert_eq!(store.load().await.unwrap(), vec![cat.clone()]);
        assert_eq!(store.get(&cat.id).await.unwrap(), cat);
    }

    #[tokio::test]
    async fn duplicate_names_change_nothing() {
        let store = store();
        store.create("Photos", "#111", vec![]).await.unwrap();
        let other = store.create("Videos", "#222", vec![]).await.unwrap();
        let snapshot = store.load().await.unwrap();

        let err = store.create("PHOTOS", "#333", vec![]).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateName { .. }));

        let patch = CategoryPatch {
            name: Some("photos".into()),
            color: Some("#999".into()),
            ..Default::default()
        };
        let err = store.update(&other.id, patch).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateName { .. }));

        assert_eq!(store.load().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn renaming_to_own_name_in_other_case_is_allowed() {
        let store = store();
        let cat = store.create("music", "#111", vec![]).await.unwrap();
        let patch = CategoryPatch {
            name: Some("Music".into()),
            ..Default::default()
        };
        let updated = store.update(&cat.id, patch).await.unwrap();
        assert_eq!(updated.name, "Music");
        assert_eq!(updated.id, cat.id);
        assert!(updated.updated_at > cat.updated_at);
    }

    #[tokio::test]
    async fn updated_at_strictly_increases() {
        let store = store();
        let cat = store.create("Docs", "#111", vec![]).await.unwrap();
        let mut last = cat.updated_at;
        for color in ["#1", "#2", "#3"] {
            let patch = CategoryPatch {
                color: Some(color.into()),
                ..Default::default()
            };
            let updated = store.update(&cat.id, patch).await.unwrap();
            assert!(updated.updated_at > last);
            last = updated.updated_at;
        }
    }

    #[tokio::test]
    async fn unknown_ids() {
        let store = store();
        let err = store
            .update("nope", CategoryPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert!(matches!(
            store.set_checked("nope", false).await,
            Err(CoreError::NotFound { .. })
        ));
        store.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn checked_toggle_keeps_timestamp_and_filters_sources() {
        let store = store();
        let a = store.create("A", "#1", vec![handle("x"), handle("y")]).await.unwrap();
        let b = store.create("B", "#2", vec![handle("z")]).await.unwrap();

        store.set_checked(&b.id, false).await.unwrap();
        let reloaded = store.get(&b.id).await.unwrap();
        assert!(!reloaded.checked);
        assert_eq!(reloaded.updated_at, b.updated_at);

        let sources = store.checked_sources().await.unwrap();
        let uris: Vec<_> = sources.iter().map(|s| s.handle.resource_uri.as_str()).collect();
        assert_eq!(uris, ["x", "y"]);
        assert!(sources.iter().all(|s| s.owner_category_id == a.id));
    }

    #[tokio::test]
    async fn directory_membership() {
        let store = store();
        let cat = store.create("A", "#1", vec![]).await.unwrap();
        let added = store.add_directory(&cat.id, handle("x")).await.unwrap();
        assert_eq!(added.directories.len(), 1);
        let same = store.add_directory(&cat.id, handle("x")).await.unwrap();
        assert_eq!(same.updated_at, added.updated_at);
        let removed = store.remove_directory(&cat.id, "x").await.unwrap();
        assert!(removed.directories.is_empty());
        assert!(removed.updated_at > added.updated_at);
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = store();
        let a = store.create("A", "#1", vec![]).await.unwrap();
        store.create("B", "#2", vec![]).await.unwrap();
        store.delete(&a.id).await.unwrap();
        let names: Vec<_> = store.load().await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["B"]);
    }

    #[tokio::test]
    async fn empty_name_rejected() {
        let store = store();
        assert!(matches!(
            store.create("   ", "#1", vec![]).await,
            Err(CoreError::InvalidCategory { .. })
        ));
    }
}
