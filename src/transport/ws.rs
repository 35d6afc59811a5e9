use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};
use url::Url;

use super::{Dispatcher, MessageHandler, Transport, WireFormat};
use crate::notifier::Subscription;
use crate::sync::protocol::{MessageKind, SyncMessage};

/// Transport over a WebSocket connection.
///
/// A writer task drains an unbounded queue, so `emit` never waits on the
/// network. A reader task decodes inbound frames (JSON text or CBOR binary,
/// whichever arrives) and runs handlers synchronously, one frame at a time.
pub struct WsTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<SyncMessage>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Arc<Dispatcher>,
    closed: watch::Receiver<bool>,
    format: WireFormat,
}

impl WsTransport {
    /// Connect to a remote sync server, e.g. `ws://127.0.0.1:3000`.
    pub async fn connect(url: &str, format: WireFormat) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| anyhow!("invalid ws url: {e}"))?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(Self::from_stream(ws_stream, format))
    }

    /// Wrap an established WebSocket stream. Must be called inside a Tokio runtime.
    pub fn from_stream<S>(stream: S, format: WireFormat) -> Self
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin + 'static,
    {
        let (mut ws_tx, mut ws_rx) = stream.split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<SyncMessage>();
        let (closed_tx, closed) = watch::channel(false);
        let dispatcher = Arc::new(Dispatcher::default());

        let writer = tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                let frame = match encode(&message, format) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(error = %err, "failed to encode outbound message");
                        continue;
                    }
                };
                if ws_tx.send(frame).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let inbound = dispatcher.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SyncMessage>(&text) {
                        Ok(message) => inbound.dispatch(&message),
                        Err(err) => warn!(error = %err, "dropping undecodable text frame"),
                    },
                    Ok(Message::Binary(bin)) => match serde_cbor::from_slice::<SyncMessage>(&bin) {
                        Ok(message) => inbound.dispatch(&message),
                        Err(err) => warn!(error = %err, "dropping undecodable binary frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                    Err(err) => {
                        debug!(error = %err, "websocket read failed");
                        break;
                    }
                }
            }
            let _ = closed_tx.send(true);
        });

        Self {
            outbound: Mutex::new(Some(outbound)),
            writer: Mutex::new(Some(writer)),
            dispatcher,
            closed,
            format,
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the peer has closed the connection or it has failed.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Stop accepting messages, flush everything already queued and close
    /// the socket.
    pub async fn shutdown(&self) {
        drop(self.outbound.lock().take());
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
    }
}

impl Transport for WsTransport {
    fn emit(&self, message: SyncMessage) {
        let sent = match self.outbound.lock().as_ref() {
            Some(queue) => queue.send(message).is_ok(),
            None => false,
        };
        if !sent {
            debug!("websocket transport closed, dropping message");
        }
    }

    fn on(&self, kind: MessageKind, handler: MessageHandler) -> Subscription {
        self.dispatcher.on(kind, handler)
    }
}

fn encode(message: &SyncMessage, format: WireFormat) -> Result<Message> {
    Ok(match format {
        WireFormat::Json => Message::Text(serde_json::to_string(message)?.into()),
        WireFormat::Cbor => Message::Binary(serde_cbor::to_vec(message)?.into()),
    })
}
