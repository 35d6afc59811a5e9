use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde_json::Value;

use dx_mirror::config::{self, MirrorConfig};
use dx_mirror::storage::SqliteStore;
use dx_mirror::sync::{apply_change, from_document_store, Role, SyncPool};
use dx_mirror::transport::{Transport, WsTransport};
use dx_mirror::tree::{Action, MonitoredTree, PathKey, TransactionId};

#[derive(Parser)]
#[command(name = "mirror")]
#[command(about = "Live JSON object synchronization over WebSocket, with SQLite-backed documents", version)]
struct Cli {
    /// Config file to use
    #[arg(long, global = true, default_value = ".dx/mirror/config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a fresh config with a new pool id
    Init {
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },

    /// Accept sync clients and log what they share
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Join a pool and print every object and change it carries
    Watch {
        /// Sync server, e.g. ws://localhost:3000
        url: String,

        #[arg(long)]
        pool: Option<String>,
    },

    /// Share one object with a pool, optionally applying edits to it
    Publish {
        url: String,

        /// Object name within the pool
        name: String,

        /// Initial JSON value (object or array)
        json: String,

        #[arg(long)]
        extensible: bool,

        #[arg(long)]
        pool: Option<String>,

        /// Edit to apply after publishing, as `dotted.path=<json>`
        #[arg(long, value_name = "PATH=JSON")]
        set: Vec<String>,
    },

    /// Edit a document in the local store
    Doc {
        key: String,

        #[arg(long)]
        db: Option<PathBuf>,

        #[arg(long, value_name = "PATH=JSON")]
        set: Vec<String>,

        #[arg(long, value_name = "PATH")]
        delete: Vec<String>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path } => {
            println!("{}", "🚀 Initializing mirror config...".cyan().bold());
            let config = config::init(&path).await?;
            println!("{} Config written", "✓".green());
            println!("  Pool id: {}", config.pool_id.bright_yellow());
            println!("\n{}", "Next steps:".yellow());
            println!("  1. {} - Start a sync server", "mirror serve".bright_white());
            println!(
                "  2. {} - Follow a pool",
                "mirror watch ws://localhost:3000".bright_white()
            );
        }
        Commands::Serve { port } => {
            let mut config = config::load_or_default(&cli.config).await?;
            if let Some(port) = port {
                config.listen_port = port;
            }
            println!(
                "{}",
                format!("🌐 Starting sync server on port {}...", config.listen_port)
                    .cyan()
                    .bold()
            );
            dx_mirror::server::start(&config, |pool| {
                println!("{} Pool {} joined", "↔".bright_blue(), pool.id().bright_yellow());
                let pool_id = pool.id().to_string();
                pool.on_create(move |created| {
                    println!(
                        "{} [{}] {} = {}",
                        "+".green(),
                        pool_id.bright_black(),
                        created.name.bright_white(),
                        created.obj.raw()
                    );
                    print_changes(&created.name, &created.obj);
                })
                .detach();
            })
            .await?;
        }
        Commands::Watch { url, pool } => {
            let config = config::load_or_default(&cli.config).await?;
            let transport = Arc::new(WsTransport::connect(&url, config.wire_format).await?);
            let pool = open_pool(transport.clone(), &config, pool);
            println!(
                "{} Watching pool {} on {}",
                "👁 ".cyan(),
                pool.id().bright_yellow(),
                url.bright_blue()
            );

            let _created = pool.on_create(|created| {
                println!("{} {} = {}", "+".green(), created.name.bright_white(), created.obj.raw());
                print_changes(&created.name, &created.obj);
            });

            tokio::select! {
                _ = transport.closed() => println!("{}", "Connection closed".yellow()),
                _ = tokio::signal::ctrl_c() => transport.shutdown().await,
            }
        }
        Commands::Publish {
            url,
            name,
            json,
            extensible,
            pool,
            set,
        } => {
            let config = config::load_or_default(&cli.config).await?;
            let raw: Value = serde_json::from_str(&json).context("initial value is not valid JSON")?;
            let edits = set
                .iter()
                .map(|edit| parse_assignment(edit))
                .collect::<Result<Vec<_>>>()?;

            let transport = Arc::new(WsTransport::connect(&url, config.wire_format).await?);
            let pool = open_pool(transport.clone(), &config, pool);
            let tree = pool.create(&name, raw, extensible)?;
            for (path, value) in edits {
                apply_change(&tree, &path, Action::Set, Some(value), TransactionId::new())?;
            }

            transport.shutdown().await;
            println!(
                "{} Published {} to pool {}",
                "✓".green(),
                name.bright_white(),
                pool.id().bright_yellow()
            );
            println!("  {}", tree.raw());
        }
        Commands::Doc { key, db, set, delete } => {
            let config = config::load_or_default(&cli.config).await?;
            let path = db.unwrap_or(config.store_path);
            if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir).await?;
            }
            let store = Arc::new(
                SqliteStore::open(&path).with_context(|| format!("opening {}", path.display()))?,
            );

            let (tx, rx) = tokio::sync::oneshot::channel();
            from_document_store(&key, store, move |loaded| {
                let _ = tx.send(loaded);
            });
            let mirror = rx.await.map_err(|_| anyhow!("document store dropped the load callback"))??;
            let tree = mirror.tree();

            for edit in &set {
                let (path, value) = parse_assignment(edit)?;
                apply_change(tree, &path, Action::Set, Some(value), TransactionId::new())?;
            }
            for dotted in &delete {
                apply_change(tree, &PathKey::parse_dotted(dotted), Action::Delete, None, TransactionId::new())?;
            }

            println!("{} {}", key.bright_white(), serde_json::to_string_pretty(&tree.raw())?);
        }
    }

    Ok(())
}

fn open_pool(transport: Arc<WsTransport>, config: &MirrorConfig, pool: Option<String>) -> SyncPool {
    let transport: Arc<dyn Transport> = transport;
    let pool_id = pool.unwrap_or_else(|| config.pool_id.clone());
    SyncPool::with_capacity(transport, Role::Client, pool_id, config.handled_capacity)
}

fn print_changes(name: &str, tree: &MonitoredTree) {
    let name = name.to_string();
    tree.on_change(move |change| {
        let value = change
            .value
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default();
        println!(
            "  {} {}.{} {}",
            change.action.to_string().bright_black(),
            name.bright_white(),
            change.dotted_path(),
            value
        );
    })
    .detach();
}

/// Parse `a.b.0=<json>`. A value that is not valid JSON is taken as a string.
fn parse_assignment(edit: &str) -> Result<(Vec<PathKey>, Value)> {
    let (path, value) = edit
        .split_once('=')
        .ok_or_else(|| anyhow!("expected PATH=JSON, got `{edit}`"))?;
    let path = PathKey::parse_dotted(path);
    if path.is_empty() {
        return Err(anyhow!("empty path in `{edit}`"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((path, value))
}
