use std::path::Path;
use std::sync::Arc;

use catview_core::kv::{FileStore, MemoryStore};
use catview_core::remote::{DirRemote, MemoryRemote};
use catview_core::resolver::StaticDialog;
use catview_core::store::checked_sources;
use catview_core::{
    Context, CoreError, EngineConfig, HandleKind, SortKey, SyncCoordinator, SyncState,
};

fn config(storage_root: &Path, data_dir: &Path) -> EngineConfig {
    EngineConfig {
        scheme_prefix: "scoped://".into(),
        storage_root: storage_root.to_path_buf(),
        root_hint: String::new(),
        data_dir: data_dir.to_path_buf(),
        ..EngineConfig::default()
    }
}

fn device(storage_root: &Path, data_dir: &Path, remote_dir: &Path) -> Context {
    Context::new(
        config(storage_root, data_dir),
        Arc::new(FileStore::open(data_dir.join("store")).unwrap()),
        Arc::new(DirRemote::new(remote_dir)),
        Arc::new(StaticDialog { granted: true }),
    )
}

#[tokio::test]
async fn categories_flow_from_one_device_to_another() {
    let storage = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    let phone = tempfile::tempdir().unwrap();
    let tablet = tempfile::tempdir().unwrap();

    let media = storage.path().join("Pictures");
    std::fs::create_dir(&media).unwrap();
    for i in 0..25 {
        std::fs::write(media.join(format!("shot_{i:02}.png")), [0u8; 4]).unwrap();
    }

    let ctx = device(storage.path(), phone.path(), remote.path());
    ctx.resolver().ensure_permission().await.unwrap();
    let mut sync = SyncCoordinator::new(ctx.clone(), "alice");
    let first = sync.load_categories().await.unwrap();
    assert!(first.bootstrapped);

    let store = sync.store().clone();
    let handle = ctx.resolver().handle("Pictures", HandleKind::Custom);
    let shots = store.create("Shots", "#123456", vec![handle.clone()]).await.unwrap();
    let mirror = store.create("Mirror", "#654321", vec![handle]).await.unwrap();
    assert!(matches!(
        store.create(" shots ", "#000", vec![]).await,
        Err(CoreError::DuplicateName { .. })
    ));
    sync.save_categories(&store.load().await.unwrap()).await.unwrap();

    let tablet_ctx = device(storage.path(), tablet.path(), remote.path());
    let mut tablet_sync = SyncCoordinator::new(tablet_ctx.clone(), "alice");
    let loaded = tablet_sync.load_categories().await.unwrap();
    assert_eq!(tablet_sync.state(), SyncState::Ready);
    assert!(!loaded.is_degraded());
    assert!(loaded.categories.iter().any(|c| c.id == shots.id));
    assert!(loaded.categories.iter().any(|c| c.id == mirror.id));

    // Builtin directories do not exist here, so only the shared one yields files
    let sources = checked_sources(&loaded.categories);
    let page_one = tablet_ctx.list_files(&sources, 1, SortKey::default()).await;
    let page_two = tablet_ctx.list_files(&sources, 2, SortKey::default()).await;
    assert_eq!(page_one.total, 25);
    assert_eq!(page_one.files.len(), 20);
    assert_eq!(page_two.files.len(), 5);
    assert!(!page_two.has_more);
    assert!(page_one.failures().count() > 0);
}

#[tokio::test]
async fn offline_start_serves_local_categories() {
    let remote = Arc::new(MemoryRemote::new());
    let ctx = Context::new(
        EngineConfig::default(),
        Arc::new(MemoryStore::new()),
        remote.clone(),
        Arc::new(StaticDialog { granted: true }),
    );
    let store = ctx.category_store("bob");
    for name in ["Work", "Family", "Memes"] {
        store.create(name, "#000000", vec![]).await.unwrap();
    }
    remote.set_offline(true);

    let mut sync = SyncCoordinator::new(ctx, "bob");
    let outcome = sync.load_categories().await.unwrap();
    assert_eq!(outcome.categories.len(), 3);
    assert!(outcome.is_degraded());
    assert!(!outcome.bootstrapped);
}

#[tokio::test]
async fn exported_manifest_restores_on_a_fresh_device() {
    let storage = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    let phone = tempfile::tempdir().unwrap();
    let fresh = tempfile::tempdir().unwrap();
    let manifest_path = phone.path().join("backup.json");

    let ctx = device(storage.path(), phone.path(), remote.path());
    let mut settings = ctx.settings().await.unwrap();
    settings.sort_by = catview_core::SortField::Size;
    ctx.save_settings(&settings).await.unwrap();
    let sync = SyncCoordinator::new(ctx.clone(), "carol");
    sync.store().create("Docs", "#fff", vec![]).await.unwrap();
    let exported = sync.export_manifest(&manifest_path).await.unwrap();

    let fresh_ctx = device(storage.path(), fresh.path(), remote.path());
    let mut fresh_sync = SyncCoordinator::new(fresh_ctx.clone(), "carol");
    let imported = fresh_sync.import_manifest(&manifest_path).await.unwrap();
    assert_eq!(imported.categories, exported.categories);
    fresh_sync.apply_manifest(&imported).await.unwrap();

    assert_eq!(fresh_sync.store().load().await.unwrap(), exported.categories);
    assert_eq!(fresh_ctx.settings().await.unwrap(), settings);
}

#[tokio::test]
async fn import_rejects_unknown_future_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.json");
    std::fs::write(
        &path,
        r#"{"version":"9.0","categories":[],"settings":{},"timestamp":"2024-01-01T00:00:00Z"}"#,
    )
    .unwrap();
    let ctx = device(dir.path(), dir.path(), &dir.path().join("remote"));
    let sync = SyncCoordinator::new(ctx, "dave");
    assert!(matches!(
        sync.import_manifest(&path).await,
        Err(CoreError::UnknownSchemaVersion(_))
    ));
}

#[tokio::test]
async fn category_order_survives_a_remote_round_trip() {
    let storage = tempfile::tempdir().unwrap();
    let remote = tempfile::tempdir().unwrap();
    let phone = tempfile::tempdir().unwrap();

    let mut sync = SyncCoordinator::new(device(storage.path(), phone.path(), remote.path()), "erin");
    let bootstrapped = sync.load_categories().await.unwrap();
    assert!(bootstrapped.bootstrapped);
    let expected: Vec<_> = bootstrapped.categories.iter().map(|c| c.id.clone()).collect();

    for _ in 0..4 {
        let fresh = tempfile::tempdir().unwrap();
        let mut other = SyncCoordinator::new(device(storage.path(), fresh.path(), remote.path()), "erin");
        let loaded = other.load_categories().await.unwrap();
        let ids: Vec<_> = loaded.categories.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, expected);
    }
}
