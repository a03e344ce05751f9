//! Inspect and repair persisted chat contexts.
//!
//! Works on the JSON key-value file a host application persists context
//! items into.
//!
//! # Examples
//!
//! ```sh
//! # List stored entries of the default context
//! ctxctl --store state.json show
//!
//! # Validate another conversation's context, non-zero exit on problems
//! ctxctl --store state.json --key context-1234 check
//!
//! # Drop malformed and duplicate entries
//! ctxctl --store state.json prune
//!
//! # Restore against an offline snapshot of resources, spaces and tabs
//! ctxctl --store state.json resolve --snapshot browser.json --prompt "Who built it?"
//!
//! # JSON Schema of a stored entry
//! ctxctl schema
//! ```

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use chat_context::manager::persist::{DecodedItems, decode_stored, prune_stored, validate_stored};
use chat_context::prelude::*;
use chat_context::services::memory::{
    MemoryKeyValueStore, MemoryResourceStore, MemorySpaceStore, MemoryTabRegistry,
};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Inspect and repair persisted chat contexts.
#[derive(Parser)]
#[command(name = "ctxctl")]
struct Cli {
    /// JSON key-value file the contexts are stored in.
    #[arg(long, default_value = "chat-context.json")]
    store: PathBuf,

    /// Storage key of the context to work on.
    #[arg(long, default_value = DEFAULT_CONTEXT_MANAGER_KEY)]
    key: String,

    /// Optional JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log more (repeat for trace output).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print stored entries as a table.
    Show,
    /// Validate stored entries; exits non-zero when any are invalid.
    Check,
    /// Rewrite the stored entries without invalid ones.
    Prune {
        /// Report what would be dropped without writing.
        #[arg(long)]
        dry_run: bool,
    },
    /// List keys in the store.
    Keys,
    /// Print the JSON Schema of a stored entry.
    Schema,
    /// Print the effective configuration.
    Config,
    /// Restore the context against a browser snapshot and print what the
    /// model would receive. The store is not modified.
    Resolve {
        /// JSON file with `resources`, `spaces` and `tabs`.
        #[arg(long)]
        snapshot: PathBuf,

        /// Prompt passed to prompt-dependent items.
        #[arg(long)]
        prompt: Option<String>,
    },
}

// ── Snapshot ───────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(default)]
struct Snapshot {
    resources: Vec<Resource>,
    spaces: Vec<SnapshotSpace>,
    tabs: Vec<Tab>,
    active_tab: Option<String>,
    active_scope: Option<String>,
}

#[derive(Deserialize)]
struct SnapshotSpace {
    #[serde(flatten)]
    space: Space,
    #[serde(default)]
    entries: Vec<SpaceEntry>,
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

// ── Commands ───────────────────────────────────────────────────────

fn load_entries(store: &JsonFileStore, key: &str) -> Result<Option<DecodedItems>> {
    Ok(store.get(key)?.map(|json| decode_stored(&json)))
}

fn show(store: &JsonFileStore, key: &str) -> Result<i32> {
    let Some(decoded) = load_entries(store, key)? else {
        println!("No context stored under `{key}`");
        return Ok(0);
    };
    if let Ok(meta) = std::fs::metadata(store.path())
        && let Ok(modified) = meta.modified()
    {
        let modified: chrono::DateTime<chrono::Local> = modified.into();
        println!("{key} (store modified {})", modified.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("{:<4} {:<14} {:<32} DATA", "#", "TYPE", "ID");
    for (i, entry) in decoded.entries.iter().enumerate() {
        println!(
            "{:<4} {:<14} {:<32} {}",
            i,
            entry.item_type,
            entry.id,
            entry.data.as_deref().unwrap_or("-")
        );
    }
    if decoded.undecodable > 0 {
        println!("({} undecodable entries not shown)", decoded.undecodable);
    }
    Ok(0)
}

fn check(store: &JsonFileStore, key: &str) -> Result<i32> {
    let Some(decoded) = load_entries(store, key)? else {
        println!("No context stored under `{key}`");
        return Ok(0);
    };
    let issues = validate_stored(&decoded.entries);
    for issue in &issues {
        println!("{issue}");
    }
    if decoded.undecodable > 0 {
        println!("{} undecodable entries", decoded.undecodable);
    }
    let problems = issues.len() + decoded.undecodable;
    if problems == 0 {
        println!("{} entries, all valid", decoded.entries.len());
        Ok(0)
    } else {
        Ok(1)
    }
}

fn prune(store: &JsonFileStore, key: &str, dry_run: bool) -> Result<i32> {
    let Some(decoded) = load_entries(store, key)? else {
        println!("No context stored under `{key}`");
        return Ok(0);
    };
    let before = decoded.entries.len() + decoded.undecodable;
    let kept = prune_stored(decoded.entries);
    let dropped = before - kept.len();
    if dropped == 0 {
        println!("Nothing to prune");
        return Ok(0);
    }
    if dry_run {
        println!("Would drop {dropped} of {before} entries");
        return Ok(0);
    }
    store.set(key, &serde_json::to_string(&kept)?)?;
    info!(key, dropped, "Pruned stored context");
    println!("Dropped {dropped} of {before} entries");
    Ok(0)
}

fn keys(store: &JsonFileStore) -> Result<i32> {
    for key in store.keys()? {
        println!("{key}");
    }
    Ok(0)
}

fn schema() -> Result<i32> {
    let schema = schemars::schema_for!(StoredContextItem);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(0)
}

async fn resolve(
    store: &JsonFileStore,
    key: &str,
    config: ContextConfig,
    snapshot_path: &Path,
    prompt: Option<&str>,
) -> Result<i32> {
    let snapshot = load_snapshot(snapshot_path)?;

    let resources = Arc::new(MemoryResourceStore::new());
    for resource in snapshot.resources {
        resources.insert(resource);
    }
    let spaces = Arc::new(MemorySpaceStore::new());
    for entry in snapshot.spaces {
        spaces.insert(entry.space, entry.entries);
    }
    let tabs = Arc::new(MemoryTabRegistry::new());
    for tab in snapshot.tabs {
        tabs.upsert_tab(tab);
    }
    tabs.set_active_tab(snapshot.active_tab.as_deref());
    tabs.set_active_scope(snapshot.active_scope.as_deref());

    // Restore into a scratch copy so a rewrite never touches the real store.
    let scratch = Arc::new(MemoryKeyValueStore::new());
    if let Some(json) = store.get(key)? {
        scratch.set(key, &json)?;
    }
    let services = ContextServices::new(resources, spaces, tabs, scratch)
        .with_telemetry(Arc::new(LoggingTelemetry))
        .with_config(config.with_eager_page_preparation(false));

    let hub = ContextHub::new(services);
    let manager = hub.create(None, Some(key.to_string())).await;
    let report = manager.restore_items().await?;
    debug!(?report, "Restored snapshot context");

    println!(
        "restored {}, unresolved {}, malformed {}",
        report.restored, report.dropped_unresolved, report.dropped_malformed
    );
    for item in manager.items() {
        println!("  {:<14} {}", item.item_type().as_str(), item.label());
    }
    let ids = manager.get_resource_ids(prompt).await;
    println!("resource ids: {}", ids.join(", "));
    let images = manager.get_inline_images().await;
    println!("inline images: {}", images.len());
    Ok(0)
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "chat_context=debug,ctxctl=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => ContextConfig::from_file(path)?,
        None => ContextConfig::default(),
    };
    let store = JsonFileStore::open(&cli.store);
    debug!(store = %store.path().display(), key = %cli.key, "Opened store");

    match cli.command {
        Command::Show => show(&store, &cli.key),
        Command::Check => check(&store, &cli.key),
        Command::Prune { dry_run } => prune(&store, &cli.key, dry_run),
        Command::Keys => keys(&store),
        Command::Schema => schema(),
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(0)
        }
        Command::Resolve { snapshot, prompt } => {
            resolve(&store, &cli.key, config, &snapshot, prompt.as_deref()).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
