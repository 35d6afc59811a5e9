use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sync::{Role, DEFAULT_HANDLED_CAPACITY, DEFAULT_POOL_ID};
use crate::transport::WireFormat;

pub const CONFIG_DIR: &str = ".dx/mirror";
pub const CONFIG_FILE: &str = "config.json";

/// Settings shared by the CLI commands. Every field has a default, so a
/// partial file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub pool_id: String,
    pub role: Role,
    /// Transaction ids each link remembers for echo suppression.
    pub handled_capacity: usize,
    pub wire_format: WireFormat,
    pub listen_port: u16,
    pub store_path: PathBuf,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            pool_id: DEFAULT_POOL_ID.to_string(),
            role: Role::Client,
            handled_capacity: DEFAULT_HANDLED_CAPACITY,
            wire_format: WireFormat::Json,
            listen_port: 3000,
            store_path: PathBuf::from(CONFIG_DIR).join("documents.db"),
        }
    }
}

impl MirrorConfig {
    /// Location of the config file under a project root.
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR).join(CONFIG_FILE)
    }
}

/// Create `.dx/mirror` under `root` and write a config with a fresh pool id.
pub async fn init(root: &Path) -> Result<MirrorConfig> {
    let dir = root.join(CONFIG_DIR);
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let config = MirrorConfig {
        pool_id: format!("pool-{}", uuid::Uuid::new_v4()),
        store_path: dir.join("documents.db"),
        ..MirrorConfig::default()
    };

    let path = dir.join(CONFIG_FILE);
    tokio::fs::write(&path, serde_json::to_string_pretty(&config)?)
        .await
        .with_context(|| format!("writing {}", path.display()))?;

    Ok(config)
}

pub async fn load(path: &Path) -> Result<MirrorConfig> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Like [`load`], but a missing file yields the defaults.
pub async fn load_or_default(path: &Path) -> Result<MirrorConfig> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(MirrorConfig::default());
    }
    load(path).await
}
