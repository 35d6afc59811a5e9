use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use colored::*;
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::sync::{MessageKind, Role, SyncMessage, SyncPool, DEFAULT_HANDLED_CAPACITY};
use crate::transport::{Transport, WireFormat, WsTransport};

/// Called once per pool a client announces, on every connection.
pub type PoolHandler = Arc<dyn Fn(SyncPool) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    pub wire_format: WireFormat,
    pub handled_capacity: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            wire_format: WireFormat::Json,
            handled_capacity: DEFAULT_HANDLED_CAPACITY,
        }
    }
}

pub async fn serve<F>(port: u16, options: ServerOptions, on_pool: F) -> Result<()>
where
    F: Fn(SyncPool) + Send + Sync + 'static,
{
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    println!(
        "{} Sync server listening on {}",
        "✓".green(),
        format!("ws://{}", addr).bright_blue()
    );
    serve_listener(listener, options, on_pool).await
}

/// Accept WebSocket connections on `listener` until it fails.
pub async fn serve_listener<F>(listener: TcpListener, options: ServerOptions, on_pool: F) -> Result<()>
where
    F: Fn(SyncPool) + Send + Sync + 'static,
{
    let on_pool: PoolHandler = Arc::new(on_pool);
    loop {
        let (stream, peer) = listener.accept().await?;
        let on_pool = on_pool.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer, options, on_pool).await {
                warn!(%peer, error = %err, "connection failed");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    options: ServerOptions,
    on_pool: PoolHandler,
) -> Result<()> {
    let socket = tokio_tungstenite::accept_async(stream).await?;
    info!(%peer, "peer connected");

    let transport = Arc::new(WsTransport::from_stream(socket, options.wire_format));
    let pools: Arc<DashMap<String, SyncPool>> = Arc::new(DashMap::new());

    let handle: Arc<dyn Transport> = transport.clone();
    let registry = pools.clone();
    let announcements = transport.on(
        MessageKind::PoolInit,
        Arc::new(move |message: &SyncMessage| {
            let SyncMessage::PoolInit(init) = message else {
                return;
            };
            if registry.contains_key(&init.id) {
                debug!(%peer, pool = %init.id, "pool already open on this connection");
                return;
            }
            let pool = SyncPool::with_capacity(handle.clone(), Role::Server, init.id.clone(), options.handled_capacity);
            registry.insert(init.id.clone(), pool.clone());
            info!(%peer, pool = %init.id, "pool opened");
            on_pool(pool);
        }),
    );

    transport.closed().await;

    // The handler above owns the transport; release it so everything drops.
    drop(announcements);
    pools.clear();
    info!(%peer, "peer disconnected");
    Ok(())
}
