//! Genie core library: WhatsApp session router and connection supervisor for the TripGenie
//! backend, used by the CLI.

pub mod backend;
pub mod channels;
pub mod config;
pub mod gateway;
pub mod init;
pub mod router;
pub mod session;
pub mod supervisor;
