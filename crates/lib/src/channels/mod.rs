//! WhatsApp transport adapter.
//!
//! Connects to the bridge sidecar, turns its frames into inbound messages and lifecycle
//! events, sends replies, and persists the credentials the bridge rotates.

mod credentials;
mod inbound;
mod outbound;
mod protocol;
mod whatsapp;

pub use credentials::{CredentialStore, FileCredentialStore};
pub use inbound::{inbound_from_upsert, ControlKind, InboundEvent, InboundMessage};
pub use outbound::{Outbound, TransportError, WhatsAppOutbound};
pub use protocol::{
    BridgeCommand, BridgeEvent, ConnectionLifecycleEvent, ConnectionUpdate, MessageContent,
    WebMessage, LOGGED_OUT_STATUS,
};
pub use whatsapp::{BridgeSession, WhatsAppChannel};
