use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::defaults::default_categories;
use crate::error::{CoreError, Result};
use crate::manifest::{self, ConfigurationManifest};
use crate::model::Category;
use crate::remote::delete_remote_categories;
use crate::store::CategoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unloaded,
    LoadingRemote,
    RemoteLoaded,
    RemoteFailed,
    LoadingLocalFallback,
    Ready,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub categories: Vec<Category>,
    /// Set when the remote store could not be used; carries the reason.
    pub degraded: Option<String>,
    pub bootstrapped: bool,
}

impl LoadOutcome {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Keeps one user's local category cache and the remote store consistent.
///
/// Local storage is always written first; remote failures never undo it.
pub struct SyncCoordinator {
    ctx: Context,
    user_id: String,
    store: CategoryStore,
    state: SyncState,
    pending: Option<JoinHandle<Result<()>>>,
}

impl SyncCoordinator {
    pub fn new(ctx: Context, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let store = ctx.category_store(&user_id);
        Self {
            ctx,
            user_id,
            store,
            state: SyncState::Unloaded,
            pending: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn store(&self) -> &CategoryStore {
        &self.store
    }

    pub fn has_pending_push(&self) -> bool {
        self.pending.is_some()
    }

    fn transition(&mut self, next: SyncState) {
        debug!(user_id = %self.user_id, from = %self.state, to = %next, "sync state");
        self.state = next;
    }

    /// Remote first; local cache when the remote cannot be reached.
    pub async fn load_categories(&mut self) -> Result<LoadOutcome> {
        self.transition(SyncState::LoadingRemote);
        let listed = self.ctx.remote.list_by_user(&self.user_id).await;

        let mut docs = match listed {
            Ok(docs) => docs,
            Err(e) => return self.load_local_fallback(e, true).await,
        };
        self.transition(SyncState::RemoteLoaded);
        docs.sort_by_key(|d| d.position);

        let mut categories = Vec::with_capacity(docs.len());
        for doc in &docs {
            match doc.decode() {
                Ok(category) => categories.push(category),
                Err(e) => warn!(category_id = %doc.category_id, error = %e, "skipping unreadable remote category"),
            }
        }

        if categories.is_empty() && !docs.is_empty() {
            // Keep them: a push here would delete every remote document
            let cause = CoreError::remote(format!(
                "none of the {} remote categories could be read",
                docs.len()
            ));
            return self.load_local_fallback(cause, false).await;
        }

        if !categories.is_empty() {
            self.store.replace_all(&categories).await?;
            self.transition(SyncState::Ready);
            return Ok(LoadOutcome {
                categories,
                degraded: None,
                bootstrapped: false,
            });
        }

        let local = self.store.load().await?;
        let (categories, bootstrapped) = if local.is_empty() {
            let defaults = default_categories(&self.ctx.resolver());
            info!(user_id = %self.user_id, count = defaults.len(), "bootstrapping default categories");
            self.store.replace_all(&defaults).await?;
            (defaults, true)
        } else {
            info!(user_id = %self.user_id, count = local.len(), "remote empty, uploading local categories");
            (local, false)
        };

        let degraded = match self.push_now(&categories).await {
            Ok(()) => None,
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "initial upload failed");
                Some(e.to_string())
            }
        };
        self.transition(SyncState::Ready);
        Ok(LoadOutcome {
            categories,
            degraded,
            bootstrapped,
        })
    }

    async fn load_local_fallback(&mut self, cause: CoreError, push_local: bool) -> Result<LoadOutcome> {
        self.transition(SyncState::RemoteFailed);
        warn!(user_id = %self.user_id, error = %cause, "cloud sync unavailable, using local cache");
        self.transition(SyncState::LoadingLocalFallback);

        let categories = self.store.load().await?;
        if push_local && !categories.is_empty() {
            self.queue_push(categories.clone());
        }
        self.transition(SyncState::Ready);
        Ok(LoadOutcome {
            categories,
            degraded: Some(cause.to_string()),
            bootstrapped: false,
        })
    }

    /// Writes locally, then replaces the remote copy. A remote failure is
    /// returned but the local write stands.
    pub async fn save_categories(&mut self, categories: &[Category]) -> Result<()> {
        self.store.replace_all(categories).await?;
        self.push_now(categories).await
    }

    /// Removes the categories locally and from the remote store.
    ///
    /// A background push still waiting to run is replaced by one of the
    /// remaining list, so it cannot bring the deleted categories back.
    pub async fn delete_categories(&mut self, ids: &[String]) -> Result<()> {
        let queued = self.pending.take();
        if let Some(pending) = &queued {
            pending.abort();
        }
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut categories = self.store.load().await?;
        categories.retain(|c| !wanted.contains(c.id.as_str()));
        self.store.replace_all(&categories).await?;
        if queued.is_some() {
            self.queue_push(categories);
        }

        let removed = delete_remote_categories(self.ctx.remote.as_ref(), &self.user_id, ids).await?;
        debug!(user_id = %self.user_id, removed, "deleted remote categories");
        Ok(())
    }

    async fn push_now(&mut self, categories: &[Category]) -> Result<()> {
        // A queued push carries an older list and must not land after this one
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        self.ctx
            .push
            .push_all(self.ctx.remote.as_ref(), &self.user_id, categories)
            .await
    }

    fn queue_push(&mut self, categories: Vec<Category>) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        let remote = self.ctx.remote.clone();
        let push = self.ctx.push.clone();
        let user_id = self.user_id.clone();
        self.pending = Some(tokio::spawn(async move {
            let pushed = push.push_all(remote.as_ref(), &user_id, &categories).await;
            match &pushed {
                Ok(()) => info!(%user_id, count = categories.len(), "background push done"),
                Err(e) => warn!(%user_id, error = %e, "background push failed"),
            }
            pushed
        }));
    }

    /// Waits for the queued background push, if any. Not retried on failure.
    pub async fn flush_pending(&mut self) -> Option<Result<()>> {
        let pending = self.pending.take()?;
        Some(match pending.await {
            Ok(pushed) => pushed,
            Err(e) => Err(CoreError::remote(format!("background push aborted: {e}"))),
        })
    }

    pub async fn export_manifest(&self, path: &Path) -> Result<ConfigurationManifest> {
        let categories = self.store.load().await?;
        let settings = self.ctx.settings().await?;
        manifest::export_manifest(path, categories, settings).await
    }

    /// Reads and migrates a manifest without applying it.
    pub async fn import_manifest(&self, path: &Path) -> Result<ConfigurationManifest> {
        manifest::import_manifest(path, &self.ctx.migration_chain()).await
    }

    /// Makes an imported manifest the user's configuration, locally then remotely.
    pub async fn apply_manifest(&mut self, manifest: &ConfigurationManifest) -> Result<()> {
        self.ctx.save_settings(&manifest.settings).await?;
        self.save_categories(&manifest.categories).await
    }
}
