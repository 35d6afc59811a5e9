pub mod api;

use anyhow::Result;

use crate::config::MirrorConfig;
use crate::sync::SyncPool;

pub use api::{serve, serve_listener, PoolHandler, ServerOptions};

pub async fn start<F>(config: &MirrorConfig, on_pool: F) -> Result<()>
where
    F: Fn(SyncPool) + Send + Sync + 'static,
{
    let options = ServerOptions {
        wire_format: config.wire_format,
        handled_capacity: config.handled_capacity,
    };
    api::serve(config.listen_port, options, on_pool).await
}
