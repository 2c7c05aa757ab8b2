//! Bridge sidecar WebSocket protocol (JSON text frames).
//!
//! The sidecar owns the WhatsApp Web session (pairing, encryption, the credential format) and
//! relays its events to us as `{ "type": ... }` frames; we answer with `start` and `send` commands.

use serde::{Deserialize, Serialize};

/// WhatsApp disconnect status code meaning the device was logged out (re-pairing required).
pub const LOGGED_OUT_STATUS: u16 = 401;

/// Event frame from the bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeEvent {
    /// Pairing challenge to display out of band.
    #[serde(rename = "qr")]
    Qr { data: String },
    /// Connection lifecycle update.
    #[serde(rename = "connection")]
    Connection(ConnectionUpdate),
    /// Rotated credentials to persist (opaque).
    #[serde(rename = "creds.update")]
    CredsUpdate { creds: serde_json::Value },
    /// Batch of new messages.
    #[serde(rename = "messages.upsert")]
    MessagesUpsert {
        #[serde(rename = "upsertType", default)]
        upsert_type: String,
        #[serde(default)]
        messages: Vec<WebMessage>,
    },
}

/// `{ "type": "connection", "connection": "open" | "close" | "connecting", ... }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    pub connection: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub logged_out: Option<bool>,
}

/// Connection lifecycle as seen by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionLifecycleEvent {
    QrChallenge(String),
    Closed { reason: String, logged_out: bool },
    Opened,
}

impl ConnectionUpdate {
    /// Map to a lifecycle event; `connecting` and unknown states carry no transition.
    pub fn lifecycle(&self) -> Option<ConnectionLifecycleEvent> {
        match self.connection.as_str() {
            "open" => Some(ConnectionLifecycleEvent::Opened),
            "close" => {
                let logged_out = self.logged_out.unwrap_or(false)
                    || self.status_code == Some(LOGGED_OUT_STATUS);
                let reason = self
                    .reason
                    .clone()
                    .or_else(|| self.status_code.map(|c| format!("status {}", c)))
                    .unwrap_or_else(|| "unknown".to_string());
                Some(ConnectionLifecycleEvent::Closed { reason, logged_out })
            }
            _ => None,
        }
    }
}

/// One message of an upsert batch.
#[derive(Debug, Clone, Deserialize)]
pub struct WebMessage {
    pub key: MessageKey,
    #[serde(default)]
    pub message: Option<MessageContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub remote_jid: String,
    #[serde(default)]
    pub from_me: bool,
}

/// Message payload variants the router understands; everything else is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[serde(default)]
    pub location_message: Option<LocationMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtendedTextMessage {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationMessage {
    pub degrees_latitude: f64,
    pub degrees_longitude: f64,
}

/// Command frame to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeCommand {
    /// Start (or resume) the WhatsApp session with previously saved credentials.
    Start { creds: Option<serde_json::Value> },
    /// Send a text message.
    Send { id: String, to: String, text: String },
}

impl BridgeCommand {
    pub fn send(to: impl Into<String>, text: impl Into<String>) -> Self {
        BridgeCommand::Send {
            id: uuid::Uuid::new_v4().to_string(),
            to: to.into(),
            text: text.into(),
        }
    }
}
