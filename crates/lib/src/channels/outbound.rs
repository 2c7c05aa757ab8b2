//! Outbound sends: the trait the router replies through, and the WhatsApp handle that survives reconnects.

use crate::channels::protocol::BridgeCommand;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Transport failures: connection-level ones make the supervisor reconnect.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bridge connect failed: {0}")]
    Connect(String),
    #[error("bridge connection lost: {0}")]
    ConnectionLost(String),
    #[error("no open WhatsApp session after waiting {0:?}")]
    NotConnected(Duration),
    #[error("send failed: {0}")]
    Send(String),
}

/// Deliver a text message to a recipient.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), TransportError>;
}

type Link = Option<mpsc::Sender<BridgeCommand>>;

/// Outbound handle shared by the router and the supervisor. The supervisor attaches the live
/// session's command queue when the connection opens and detaches it when it closes; sends made
/// in between wait (bounded) for the next open session.
#[derive(Clone)]
pub struct WhatsAppOutbound {
    link: Arc<watch::Sender<Link>>,
    send_wait: Duration,
}

impl WhatsAppOutbound {
    pub fn new(send_wait: Duration) -> Self {
        let (link, _) = watch::channel(None);
        Self {
            link: Arc::new(link),
            send_wait,
        }
    }

    /// Route sends to this session's command queue.
    pub fn attach(&self, commands: mpsc::Sender<BridgeCommand>) {
        self.link.send_replace(Some(commands));
    }

    /// Stop routing sends until the next `attach`.
    pub fn detach(&self) {
        self.link.send_replace(None);
    }

    pub fn is_attached(&self) -> bool {
        self.link.borrow().is_some()
    }

    async fn live_link(&self) -> Result<mpsc::Sender<BridgeCommand>, TransportError> {
        let mut rx = self.link.subscribe();
        let waited = tokio::time::timeout(self.send_wait, rx.wait_for(|l| l.is_some())).await;
        match waited {
            Ok(Ok(link)) => link
                .as_ref()
                .cloned()
                .ok_or(TransportError::NotConnected(self.send_wait)),
            _ => Err(TransportError::NotConnected(self.send_wait)),
        }
    }
}

#[async_trait]
impl Outbound for WhatsAppOutbound {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), TransportError> {
        let commands = self.live_link().await?;
        commands
            .send(BridgeCommand::send(recipient, text))
            .await
            .map_err(|_| TransportError::Send("session closed before the message was queued".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_goes_to_attached_session() {
        let outbound = WhatsAppOutbound::new(Duration::from_secs(1));
        let (tx, mut rx) = mpsc::channel(4);
        outbound.attach(tx);
        assert!(outbound.is_attached());

        outbound.send("a@s.whatsapp.net", "hi").await.unwrap();
        let Some(BridgeCommand::Send { to, text, .. }) = rx.recv().await else {
            panic!("expected send command");
        };
        assert_eq!(to, "a@s.whatsapp.net");
        assert_eq!(text, "hi");
    }

    #[tokio::test]
    async fn send_waits_for_reconnect() {
        let outbound = WhatsAppOutbound::new(Duration::from_secs(5));
        let (tx, mut rx) = mpsc::channel(4);

        let o = outbound.clone();
        let pending = tokio::spawn(async move { o.send("a", "late reply").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        outbound.attach(tx);
        pending.await.unwrap().unwrap();
        assert!(matches!(rx.recv().await, Some(BridgeCommand::Send { .. })));
    }

    #[tokio::test]
    async fn send_gives_up_without_session() {
        let outbound = WhatsAppOutbound::new(Duration::from_millis(20));
        let err = outbound.send("a", "hi").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected(_)));
    }

    #[tokio::test]
    async fn send_to_dropped_session_fails() {
        let outbound = WhatsAppOutbound::new(Duration::from_secs(1));
        let (tx, rx) = mpsc::channel(4);
        outbound.attach(tx);
        drop(rx);
        let err = outbound.send("a", "hi").await.unwrap_err();
        assert!(matches!(err, TransportError::Send(_)));

        outbound.detach();
        assert!(!outbound.is_attached());
    }
}
