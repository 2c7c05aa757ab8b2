//! Connection supervisor: keeps a WhatsApp transport session alive.
//!
//! [`ConnectionSupervisor`] is the state machine (Disconnected / Connecting / Open) fed with
//! lifecycle events; [`Supervisor`] drives it against the bridge, persists credential updates,
//! and hands inbound messages to the router's per-sender queues. A close that is not a logout
//! starts a new transport session; a logout is terminal.

use crate::channels::{
    inbound_from_upsert, BridgeEvent, BridgeSession, ConnectionLifecycleEvent, CredentialStore,
    WhatsAppChannel,
};
use crate::config::ReconnectConfig;
use crate::router::Router;
use qrcode::render::unicode;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Connection state of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

/// What the driver should do after a lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorAction {
    None,
    /// Show the pairing challenge out of band.
    DisplayQr(String),
    /// End the current transport session and start a new one after `delay`.
    Reconnect { delay: Duration },
    /// Logged out: do not reconnect.
    Stop,
}

/// Snapshot published to the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub connection: ConnectionState,
    /// Latest pairing challenge while not open.
    pub qr: Option<String>,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            qr: None,
        }
    }
}

/// Exponential reconnect delay for consecutive failed sessions: `initial * 2^(n-1)`, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            failures: 0,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Delay before the next attempt; each call counts one more failure.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Lifecycle state machine. Pure: no I/O, driven by [`Supervisor`] or by tests.
#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    backoff: Backoff,
    /// Whether the current transport session reached `Open`.
    opened: bool,
    qr: Option<String>,
    logged_out: bool,
}

impl ConnectionSupervisor {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff,
            opened: false,
            qr: None,
            logged_out: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out
    }

    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            connection: self.state,
            qr: self.qr.clone(),
        }
    }

    /// A new transport session is being started.
    pub fn begin_session(&mut self) {
        self.state = ConnectionState::Connecting;
        self.opened = false;
    }

    pub fn on_event(&mut self, event: ConnectionLifecycleEvent) -> SupervisorAction {
        if self.logged_out {
            return SupervisorAction::Stop;
        }
        match event {
            ConnectionLifecycleEvent::QrChallenge(data) => {
                self.qr = Some(data.clone());
                SupervisorAction::DisplayQr(data)
            }
            ConnectionLifecycleEvent::Opened => {
                self.state = ConnectionState::Open;
                self.opened = true;
                self.qr = None;
                self.backoff.reset();
                SupervisorAction::None
            }
            ConnectionLifecycleEvent::Closed {
                logged_out: true, ..
            } => {
                self.state = ConnectionState::Disconnected;
                self.logged_out = true;
                self.qr = None;
                SupervisorAction::Stop
            }
            ConnectionLifecycleEvent::Closed {
                logged_out: false, ..
            } => self.schedule_reconnect(),
        }
    }

    /// The transport session failed or ended without a close notification.
    pub fn on_transport_error(&mut self) -> SupervisorAction {
        if self.logged_out {
            return SupervisorAction::Stop;
        }
        self.schedule_reconnect()
    }

    /// The driver stopped for good; the connection is gone but this is not a logout.
    pub fn shut_down(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.opened = false;
        self.qr = None;
    }

    fn schedule_reconnect(&mut self) -> SupervisorAction {
        let delay = if self.opened {
            Duration::ZERO
        } else {
            self.backoff.next_delay()
        };
        self.opened = false;
        self.state = ConnectionState::Connecting;
        SupervisorAction::Reconnect { delay }
    }
}

/// Render a pairing challenge as a QR code for the terminal (two modules per character cell,
/// inverted so it scans on dark backgrounds).
pub fn render_qr(data: &str) -> Result<String, qrcode::types::QrError> {
    let code = qrcode::QrCode::new(data.as_bytes())?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

/// Why [`Supervisor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The device was logged out; re-pairing is required.
    LoggedOut,
    Shutdown,
}

enum Step {
    Action(SupervisorAction),
    Shutdown,
}

/// Drives transport sessions until logout or shutdown.
pub struct Supervisor {
    channel: WhatsAppChannel,
    credentials: Arc<dyn CredentialStore>,
    router: Arc<Router>,
    machine: ConnectionSupervisor,
    status: watch::Sender<SupervisorStatus>,
}

impl Supervisor {
    pub fn new(
        channel: WhatsAppChannel,
        credentials: Arc<dyn CredentialStore>,
        router: Arc<Router>,
        backoff: Backoff,
    ) -> Self {
        let (status, _) = watch::channel(SupervisorStatus::default());
        Self {
            channel,
            credentials,
            router,
            machine: ConnectionSupervisor::new(backoff),
            status,
        }
    }

    /// Receiver for status snapshots (connection state and pending QR).
    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.subscribe()
    }

    /// Run sessions until the device is logged out or `shutdown` flips to true (or its sender
    /// is dropped).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SupervisorExit {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let step = tokio::select! {
                action = self.run_session() => Step::Action(action),
                _ = shutdown.changed() => Step::Shutdown,
            };
            match step {
                Step::Shutdown => break,
                Step::Action(SupervisorAction::Stop) => {
                    self.channel.outbound().detach();
                    log::error!("whatsapp: logged out; remove the stored credentials and pair again");
                    return SupervisorExit::LoggedOut;
                }
                Step::Action(SupervisorAction::Reconnect { delay }) => {
                    if delay.is_zero() {
                        log::info!("supervisor: reconnecting");
                        continue;
                    }
                    log::info!("supervisor: reconnecting in {:?}", delay);
                    let interrupted = tokio::select! {
                        _ = tokio::time::sleep(delay) => false,
                        _ = shutdown.changed() => true,
                    };
                    if interrupted {
                        break;
                    }
                }
                Step::Action(_) => {}
            }
        }
        self.channel.outbound().detach();
        self.machine.shut_down();
        self.publish();
        log::info!("supervisor stopped");
        SupervisorExit::Shutdown
    }

    /// One transport session: connect, pump events until it ends, return the next action.
    async fn run_session(&mut self) -> SupervisorAction {
        self.machine.begin_session();
        self.publish();

        let creds = match self.credentials.load() {
            Ok(creds) => creds,
            Err(e) => {
                log::warn!("whatsapp: could not load credentials, starting unpaired: {:#}", e);
                None
            }
        };
        let mut session = match self.channel.connect(creds).await {
            Ok(session) => session,
            Err(e) => {
                log::warn!("whatsapp: {} ({})", e, self.channel.bridge_url());
                let action = self.machine.on_transport_error();
                self.publish();
                return action;
            }
        };

        let action = self.pump(&mut session).await;
        self.channel.outbound().detach();
        session.close();
        self.publish();
        action
    }

    async fn pump(&mut self, session: &mut BridgeSession) -> SupervisorAction {
        loop {
            let event = match session.next_event().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    log::warn!("whatsapp: {}", e);
                    return self.machine.on_transport_error();
                }
                None => {
                    log::warn!("whatsapp: bridge closed the connection");
                    return self.machine.on_transport_error();
                }
            };
            match event {
                BridgeEvent::Qr { data } => {
                    if let SupervisorAction::DisplayQr(qr) =
                        self.machine.on_event(ConnectionLifecycleEvent::QrChallenge(data))
                    {
                        log::info!("whatsapp: scan this QR code with the WhatsApp app to pair: {}", qr);
                        match render_qr(&qr) {
                            Ok(code) => eprintln!("{}", code),
                            Err(e) => log::warn!("whatsapp: could not render QR code: {}", e),
                        }
                    }
                    self.publish();
                }
                BridgeEvent::Connection(update) => {
                    let Some(lifecycle) = update.lifecycle() else {
                        log::debug!("whatsapp: connection {}", update.connection);
                        continue;
                    };
                    if let ConnectionLifecycleEvent::Closed { ref reason, logged_out } = lifecycle {
                        log::warn!(
                            "whatsapp: connection closed ({}), logged out: {}",
                            reason,
                            logged_out
                        );
                    }
                    let opened = lifecycle == ConnectionLifecycleEvent::Opened;
                    let action = self.machine.on_event(lifecycle);
                    if opened {
                        self.channel.outbound().attach(session.commands());
                        log::info!("whatsapp: connection open");
                    }
                    self.publish();
                    if matches!(
                        action,
                        SupervisorAction::Reconnect { .. } | SupervisorAction::Stop
                    ) {
                        return action;
                    }
                }
                BridgeEvent::CredsUpdate { creds } => {
                    if let Err(e) = self.credentials.save(&creds) {
                        log::warn!("whatsapp: failed to persist credentials: {:#}", e);
                    }
                }
                BridgeEvent::MessagesUpsert {
                    upsert_type,
                    messages,
                } => {
                    if let Some(msg) = inbound_from_upsert(&upsert_type, &messages) {
                        self.router.dispatch(msg);
                    }
                }
            }
        }
    }

    fn publish(&self) {
        self.status.send_replace(self.machine.status());
    }
}
