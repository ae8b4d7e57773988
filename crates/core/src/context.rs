use std::sync::Arc;

use crate::aggregate::{Aggregator, Page};
use crate::config::EngineConfig;
use crate::enumerate::{Enumerator, FsEnumerator};
use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::manifest::MigrationChain;
use crate::model::{Settings, SortKey, SourceDirectory};
use crate::remote::{PushStrategy, RemoteDocumentStore, ReplaceAll};
use crate::resolver::{AddressScheme, DirectoryResolver, PermissionDialog};
use crate::store::CategoryStore;

pub const SETTINGS_KEY: &str = "settings";

/// Everything the engine talks to, passed explicitly instead of living in globals.
///
/// Cloning is cheap and shares the same collaborators.
#[derive(Clone)]
pub struct Context {
    pub config: EngineConfig,
    pub kv: Arc<dyn KeyValueStore>,
    pub remote: Arc<dyn RemoteDocumentStore>,
    pub dialog: Arc<dyn PermissionDialog>,
    pub enumerator: Arc<dyn Enumerator>,
    pub push: Arc<dyn PushStrategy>,
}

impl Context {
    pub fn new(
        config: EngineConfig,
        kv: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteDocumentStore>,
        dialog: Arc<dyn PermissionDialog>,
    ) -> Self {
        let scheme = AddressScheme::from_config(&config);
        let push = Arc::new(ReplaceAll::new(config.directories_budget));
        Self {
            config,
            kv,
            remote,
            dialog,
            enumerator: Arc::new(FsEnumerator::new(scheme)),
            push,
        }
    }

    pub fn with_enumerator(mut self, enumerator: Arc<dyn Enumerator>) -> Self {
        self.enumerator = enumerator;
        self
    }

    pub fn with_push_strategy(mut self, push: Arc<dyn PushStrategy>) -> Self {
        self.push = push;
        self
    }

    pub fn scheme(&self) -> AddressScheme {
        AddressScheme::from_config(&self.config)
    }

    pub fn resolver(&self) -> DirectoryResolver {
        DirectoryResolver::new(
            self.scheme(),
            self.config.root_hint.clone(),
            self.enumerator.clone(),
            self.dialog.clone(),
            self.kv.clone(),
        )
    }

    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(self.resolver(), self.config.page_size)
    }

    pub fn category_store(&self, user_id: &str) -> CategoryStore {
        CategoryStore::for_user(self.kv.clone(), user_id)
    }

    pub fn migration_chain(&self) -> MigrationChain {
        MigrationChain::standard(self.scheme())
    }

    pub async fn list_files(&self, sources: &[SourceDirectory], page: u32, sort: SortKey) -> Page {
        self.aggregator().list_page(sources, page, sort).await
    }

    /// Stored settings, or defaults when none were saved yet.
    pub async fn settings(&self) -> Result<Settings> {
        match self.kv.get(SETTINGS_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Settings::default()),
        }
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.kv
            .set(SETTINGS_KEY, &serde_json::to_string(settings)?)
            .await
    }
}
