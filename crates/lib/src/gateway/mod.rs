//! Gateway: the long-running process around the router.
//!
//! Starts the WhatsApp supervisor and, when enabled, a small HTTP status endpoint that reports
//! the connection state and exposes the pairing QR out of band.

mod server;
mod status;

pub use server::run_gateway;
pub use status::{serve_status, status_router, StatusState};
