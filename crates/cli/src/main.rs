use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use bytesize::ByteSize;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use catview_core::aggregate::paginate;
use catview_core::kv::FileStore;
use catview_core::remote::DirRemote;
use catview_core::resolver::{GrantResponse, StaticDialog};
use catview_core::{
    export, search, telemetry, CategoryPatch, Context, CoreError, EngineConfig, FileRecord, HandleKind,
    PermissionDialog, SortKey, SyncCoordinator,
};

#[derive(Parser, Debug)]
#[command(name = "catview", about = "Browse files from categorized directories")]
struct Args {
    /// JSON config file; `CATVIEW_*` variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, default_value = "local")]
    user: String,
    /// Directory holding the shared category documents
    #[arg(long, global = true)]
    remote_dir: Option<PathBuf>,
    /// Grant directory access without prompting
    #[arg(short, long, global = true)]
    yes: bool,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage categories
    #[command(subcommand)]
    Categories(CategoryCommand),
    /// List files from every checked category
    Files {
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        /// e.g. date-desc, name-asc, size-desc
        #[arg(short, long)]
        sort: Option<SortKey>,
        /// Fuzzy filter on file names
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Reconcile local categories with the remote store
    Sync,
    /// Write categories and settings to a manifest file
    Export { path: PathBuf },
    /// Load a manifest file, migrating older versions
    Import {
        path: PathBuf,
        /// Only validate, do not apply
        #[arg(long)]
        dry_run: bool,
    },
    /// Ask for directory access and remember it
    Grant,
}

#[derive(Subcommand, Debug)]
enum CategoryCommand {
    List,
    Add {
        name: String,
        #[arg(long, default_value = "#607D8B")]
        color: String,
        /// Directory paths, absolute or relative to the storage root
        dirs: Vec<String>,
    },
    Rename { id: String, name: String },
    Recolor { id: String, color: String },
    Remove { ids: Vec<String> },
    Check { id: String },
    Uncheck { id: String },
    AddDir { id: String, path: String },
    RemoveDir { id: String, path: String },
}

/// Prompts on the terminal for directory access.
struct TerminalDialog;

#[async_trait]
impl PermissionDialog for TerminalDialog {
    async fn request_directory_grant(
        &self,
        root_hint: &str,
    ) -> catview_core::Result<GrantResponse> {
        let mut out = tokio::io::stderr();
        out.write_all(format!("Allow catview to read '{root_hint}'? [y/N] ").as_bytes())
            .await?;
        out.flush().await?;
        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        let granted = matches!(line.trim(), "y" | "Y" | "yes");
        Ok(GrantResponse {
            granted,
            grant_token: format!("terminal:{root_hint}"),
        })
    }
}

fn build_context(args: &Args) -> Result<Context> {
    let config = EngineConfig::load(args.config.as_deref()).context("loading config")?;
    let kv = FileStore::open(config.data_dir.join("store")).context("opening local store")?;
    let remote_dir = args
        .remote_dir
        .clone()
        .unwrap_or_else(|| config.data_dir.join("remote"));
    let dialog: Arc<dyn PermissionDialog> = if args.yes {
        Arc::new(StaticDialog { granted: true })
    } else {
        Arc::new(TerminalDialog)
    };
    Ok(Context::new(
        config,
        Arc::new(kv),
        Arc::new(DirRemote::new(remote_dir)),
        dialog,
    ))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(if args.verbose { "debug" } else { "warn" });
    let ctx = build_context(&args)?;
    let mut sync = SyncCoordinator::new(ctx.clone(), args.user.clone());

    let result = run(&ctx, &mut sync, args.command).await;
    if let Some(Err(e)) = sync.flush_pending().await {
        eprintln!("warning: background upload failed: {e}");
    }
    result
}

async fn run(ctx: &Context, sync: &mut SyncCoordinator, command: Command) -> Result<()> {
    match command {
        Command::Categories(cmd) => categories(ctx, sync, cmd).await,
        Command::Files {
            page,
            sort,
            search: query,
            csv,
            json,
        } => {
            let permitted = has_access(ctx).await?;
            let loaded = sync.load_categories().await?;
            if let Some(reason) = &loaded.degraded {
                eprintln!("warning: cloud sync unavailable ({reason}), using local data");
            }
            let sort = match sort {
                Some(sort) => sort,
                None => ctx.settings().await?.sort_key(),
            };
            let sources = catview_core::store::checked_sources(&loaded.categories);
            let (files, has_more) = match query {
                _ if !permitted => (Vec::new(), false),
                Some(needle) => {
                    let all = ctx.aggregator().list_all(&sources, sort).await;
                    paginate(search::filter_by_name(all, &needle), page, ctx.config.page_size)
                }
                None => {
                    let listed = ctx.list_files(&sources, page, sort).await;
                    for failure in listed.failures() {
                        eprintln!("warning: {failure}");
                    }
                    (listed.files, listed.has_more)
                }
            };
            print_files(&files);
            if has_more {
                println!("-- more on page {} --", page.max(1) + 1);
            }
            if let Some(path) = csv {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("creating {}", path.display()))?;
                export::to_csv(&files, file)?;
            }
            if let Some(path) = json {
                let body = serde_json::to_string_pretty(&export::to_json(&files))?;
                std::fs::write(&path, body)
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            Ok(())
        }
        Command::Sync => {
            let loaded = sync.load_categories().await?;
            match &loaded.degraded {
                Some(reason) => println!("offline ({reason}); {} local categories", loaded.categories.len()),
                None if loaded.bootstrapped => {
                    println!("created {} default categories", loaded.categories.len())
                }
                None => println!("{} categories in sync", loaded.categories.len()),
            }
            Ok(())
        }
        Command::Export { path } => {
            let manifest = sync.export_manifest(&path).await?;
            println!(
                "exported {} categories to {}",
                manifest.categories.len(),
                path.display()
            );
            Ok(())
        }
        Command::Import { path, dry_run } => {
            let manifest = sync.import_manifest(&path).await?;
            if dry_run {
                println!("{} is valid: {} categories", path.display(), manifest.categories.len());
                return Ok(());
            }
            if let Err(e) = sync.apply_manifest(&manifest).await {
                warn!(error = %e, "imported locally but upload failed");
                eprintln!("warning: saved locally, upload failed: {e}");
            }
            println!("imported {} categories", manifest.categories.len());
            Ok(())
        }
        Command::Grant => {
            let grant = ctx.resolver().ensure_permission().await?;
            println!("access granted at {}", grant.granted_at.to_rfc3339());
            Ok(())
        }
    }
}

async fn categories(ctx: &Context, sync: &mut SyncCoordinator, cmd: CategoryCommand) -> Result<()> {
    let loaded = sync.load_categories().await?;
    if let Some(reason) = &loaded.degraded {
        eprintln!("warning: cloud sync unavailable ({reason}), changes stay local");
    }
    let store = sync.store().clone();
    let resolver = ctx.resolver();

    match cmd {
        CategoryCommand::List => {
            for c in &loaded.categories {
                println!(
                    "[{}] {:<20} {:<8} {:>2} dirs  {}",
                    if c.checked { "x" } else { " " },
                    c.name,
                    c.color,
                    c.directories.len(),
                    c.id
                );
            }
            return Ok(());
        }
        CategoryCommand::Remove { ids } => {
            if ids.is_empty() {
                bail!("no category ids given");
            }
            sync.delete_categories(&ids).await?;
            println!("removed {}", ids.len());
            return Ok(());
        }
        CategoryCommand::Add { name, color, dirs } => {
            let handles = dirs
                .iter()
                .map(|d| resolver.handle(d, HandleKind::Custom))
                .collect();
            let created = store.create(&name, &color, handles).await?;
            println!("{}", created.id);
        }
        CategoryCommand::Rename { id, name } => {
            store
                .update(&id, CategoryPatch { name: Some(name), ..Default::default() })
                .await?;
        }
        CategoryCommand::Recolor { id, color } => {
            store
                .update(&id, CategoryPatch { color: Some(color), ..Default::default() })
                .await?;
        }
        CategoryCommand::Check { id } => store.set_checked(&id, true).await?,
        CategoryCommand::Uncheck { id } => store.set_checked(&id, false).await?,
        CategoryCommand::AddDir { id, path } => {
            store
                .add_directory(&id, resolver.handle(&path, HandleKind::Custom))
                .await?;
        }
        CategoryCommand::RemoveDir { id, path } => {
            store.remove_directory(&id, &resolver.resolve(&path)).await?;
        }
    }

    let categories = store.load().await?;
    if let Err(e) = sync.save_categories(&categories).await {
        eprintln!("warning: saved locally, upload failed: {e}");
    }
    Ok(())
}

/// A declined grant leaves listings empty instead of failing the command.
async fn has_access(ctx: &Context) -> Result<bool> {
    match ctx.resolver().ensure_permission().await {
        Ok(_) => Ok(true),
        Err(e @ CoreError::PermissionDenied { .. }) => {
            eprintln!("warning: {e}; listing no files");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_files(files: &[FileRecord]) {
    for f in files {
        println!(
            "{}  {:>10}  {:<8}  {}",
            f.modified_at.format("%Y-%m-%d %H:%M"),
            ByteSize(f.size_bytes).to_string(),
            f.mime_class.as_str(),
            f.name
        );
    }
}
