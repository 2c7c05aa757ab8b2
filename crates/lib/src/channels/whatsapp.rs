//! WhatsApp channel: WebSocket connection to the bridge sidecar.
//!
//! Each connection is one transport session: we send `start` with the saved credentials, then
//! read event frames until the bridge closes the socket. Commands are written by a dedicated
//! task fed from a queue, which is what the outbound handle attaches to.

use crate::channels::outbound::{TransportError, WhatsAppOutbound};
use crate::channels::protocol::{BridgeCommand, BridgeEvent};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const COMMAND_QUEUE: usize = 64;

type BridgeStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Bridge connector plus the outbound handle sessions are attached to.
pub struct WhatsAppChannel {
    bridge_url: String,
    outbound: WhatsAppOutbound,
}

impl WhatsAppChannel {
    pub fn new(bridge_url: impl Into<String>, outbound: WhatsAppOutbound) -> Self {
        Self {
            bridge_url: bridge_url.into(),
            outbound,
        }
    }

    pub fn bridge_url(&self) -> &str {
        &self.bridge_url
    }

    pub fn outbound(&self) -> &WhatsAppOutbound {
        &self.outbound
    }

    /// Open a new transport session and ask the bridge to start it with `creds`.
    pub async fn connect(
        &self,
        creds: Option<serde_json::Value>,
    ) -> Result<BridgeSession, TransportError> {
        log::info!("whatsapp: connecting to bridge at {}", self.bridge_url);
        let (ws, _) = tokio_tungstenite::connect_async(self.bridge_url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, stream) = ws.split();
        let (commands, mut rx) = mpsc::channel::<BridgeCommand>(COMMAND_QUEUE);

        let writer = tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                let text = match serde_json::to_string(&cmd) {
                    Ok(t) => t,
                    Err(e) => {
                        log::warn!("whatsapp: could not encode bridge command: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    log::debug!("whatsapp: bridge write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        commands
            .send(BridgeCommand::Start { creds })
            .await
            .map_err(|_| TransportError::ConnectionLost("writer stopped before start".to_string()))?;
        Ok(BridgeSession {
            stream,
            commands,
            writer,
        })
    }
}

/// One live connection to the bridge.
pub struct BridgeSession {
    stream: BridgeStream,
    commands: mpsc::Sender<BridgeCommand>,
    writer: JoinHandle<()>,
}

impl BridgeSession {
    /// Command queue of this session (attach it to the outbound handle once open).
    pub fn commands(&self) -> mpsc::Sender<BridgeCommand> {
        self.commands.clone()
    }

    /// Next event from the bridge. `None` when the bridge closed the socket; `Err` when the
    /// connection broke. Frames that are not recognised events are skipped.
    pub async fn next_event(&mut self) -> Option<Result<BridgeEvent, TransportError>> {
        while let Some(frame) = self.stream.next().await {
            let msg = match frame {
                Ok(m) => m,
                Err(e) => return Some(Err(TransportError::ConnectionLost(e.to_string()))),
            };
            match msg {
                Message::Text(text) => match serde_json::from_str::<BridgeEvent>(&text) {
                    Ok(event) => return Some(Ok(event)),
                    Err(e) => log::debug!("whatsapp: ignoring bridge frame: {}", e),
                },
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    }

    /// Tear the session down; queued commands that were not written yet are dropped.
    pub fn close(self) {
        drop(self.commands);
        self.writer.abort();
    }
}
