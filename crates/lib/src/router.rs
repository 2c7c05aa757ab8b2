//! Router: per-sender activation state machine.
//!
//! Each inbound event yields at most one reply and at most one backend call. Senders must
//! activate with the trigger word before anything they send reaches the backend; until then
//! their traffic (including shared locations) is dropped without a reply.
//!
//! Transport events enter through [`Router::dispatch`], which queues them per sender so a
//! sender's messages are handled in the order they arrived.

use crate::backend::{Backend, END_SESSION};
use crate::channels::{ControlKind, InboundEvent, InboundMessage, Outbound};
use crate::config::TriggerWords;
use crate::session::{SenderId, SessionRegistry, SessionSlot, SessionState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const WELCOME_REPLY: &str = "👋 Hi! Welcome to TripGenie — your AI-powered travel assistant. \n\nType *‘start’* to explore nearby places or get a personalized itinerary!";
pub const ALREADY_ACTIVE_REPLY: &str =
    "🤖 Bot already activated and ready to help. Go ahead with your request!";
pub const SIGN_OFF_REPLY: &str =
    "👋 That’s it for now! TripGenie has signed off. \n Come back anytime to explore again.";
pub const NO_PLACES_REPLY: &str = "Couldn't fetch nearby places.";
pub const PLACES_ERROR_REPLY: &str = "Server error while finding places.";
pub const UNPROCESSED_REPLY: &str = "Sorry, couldn't process that.";
pub const SERVER_ERROR_REPLY: &str = "❌ Server error. Try again later.";

/// Reply issued for one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub recipient: String,
    pub text: String,
}

/// Routes inbound messages to the backend and replies through the outbound handle.
/// Safe to call concurrently; events of the same sender are handled one at a time.
pub struct Router {
    triggers: TriggerWords,
    registry: SessionRegistry,
    backend: Arc<dyn Backend>,
    outbound: Arc<dyn Outbound>,
    notify_wait: Duration,
    /// Pending messages per sender; an entry exists while that sender's worker runs.
    queues: Mutex<HashMap<SenderId, mpsc::UnboundedSender<InboundMessage>>>,
}

impl Router {
    /// `notify_wait` bounds how long a backend call waits for the sender's pending
    /// end-session notification (use the backend timeout).
    pub fn new(
        triggers: TriggerWords,
        backend: Arc<dyn Backend>,
        outbound: Arc<dyn Outbound>,
        notify_wait: Duration,
    ) -> Self {
        Self {
            triggers,
            registry: SessionRegistry::new(),
            backend,
            outbound,
            notify_wait,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a message for handling in the background. Messages of one sender are handled
    /// strictly in dispatch order by a worker task that exits once the sender's queue is empty.
    pub fn dispatch(self: &Arc<Self>, msg: InboundMessage) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let msg = match queues.get(&msg.sender) {
            Some(queue) => match queue.send(msg) {
                Ok(()) => return,
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };
        let sender = msg.sender.clone();
        let (queue, rx) = mpsc::unbounded_channel();
        let _ = queue.send(msg);
        queues.insert(sender.clone(), queue);
        tokio::spawn(Arc::clone(self).drain(sender, rx));
    }

    async fn drain(
        self: Arc<Self>,
        sender: SenderId,
        mut rx: mpsc::UnboundedReceiver<InboundMessage>,
    ) {
        loop {
            let next = match rx.try_recv() {
                Ok(msg) => Some(msg),
                Err(_) => {
                    // re-check under the lock: dispatch only enqueues while holding it
                    let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
                    match rx.try_recv() {
                        Ok(msg) => Some(msg),
                        Err(_) => {
                            queues.remove(&sender);
                            None
                        }
                    }
                }
            };
            let Some(msg) = next else {
                return;
            };
            self.handle(msg).await;
        }
    }

    /// Handle one inbound message; returns the reply that was sent, if any.
    /// Send failures are logged, not retried.
    pub async fn handle(&self, msg: InboundMessage) -> Option<OutboundReply> {
        let InboundMessage { sender, event } = msg;
        let event = event.classify(&self.triggers);
        let mut slot = self.registry.lock(&sender).await;
        let reply = self.route(&sender, &mut slot, event).await.map(|text| OutboundReply {
            recipient: sender.clone(),
            text,
        });
        if let Some(ref reply) = reply {
            if let Err(e) = self.outbound.send(&reply.recipient, &reply.text).await {
                log::warn!("router: reply to {} failed: {}", reply.recipient, e);
            }
        }
        self.registry.release(&sender, slot).await;
        reply
    }

    /// Snapshot of a sender's record.
    pub async fn session(&self, sender: &str) -> Option<SessionState> {
        self.registry.get(sender).await
    }

    /// Number of currently active senders.
    pub fn active_sessions(&self) -> usize {
        self.registry.active_count()
    }

    async fn route(
        &self,
        sender: &str,
        slot: &mut SessionSlot,
        event: InboundEvent,
    ) -> Option<String> {
        match event {
            InboundEvent::Location {
                latitude,
                longitude,
            } => {
                if !slot.is_active() {
                    log::info!("router: ignoring location from {} - not activated", sender);
                    return None;
                }
                log::info!("router: location shared by {}: {}, {}", sender, latitude, longitude);
                slot.settle_pending(self.notify_wait).await;
                let reply = match self.backend.post_location(sender, latitude, longitude).await {
                    Ok(reply) => non_empty_or(reply, NO_PLACES_REPLY),
                    Err(e) => {
                        log::warn!("router: backend location request for {} failed: {}", sender, e);
                        PLACES_ERROR_REPLY.to_string()
                    }
                };
                Some(reply)
            }
            InboundEvent::Control(ControlKind::Trigger) => {
                if slot.is_active() {
                    return Some(ALREADY_ACTIVE_REPLY.to_string());
                }
                self.notify_end_session(sender, slot);
                slot.activate();
                log::info!("router: {} activated", sender);
                Some(WELCOME_REPLY.to_string())
            }
            InboundEvent::Control(ControlKind::EndTrigger) => {
                if slot.is_active() {
                    self.notify_end_session(sender, slot);
                }
                if slot.deactivate() {
                    log::info!("router: {} deactivated", sender);
                }
                Some(SIGN_OFF_REPLY.to_string())
            }
            InboundEvent::Text(text) => {
                if !slot.is_active() {
                    log::info!("router: ignoring message from {} - not activated", sender);
                    return None;
                }
                log::info!("router: message from activated user {}: {}", sender, text);
                slot.settle_pending(self.notify_wait).await;
                let reply = match self.backend.post_message(sender, &text).await {
                    Ok(reply) => non_empty_or(reply, UNPROCESSED_REPLY),
                    Err(e) => {
                        log::warn!("router: backend message request for {} failed: {}", sender, e);
                        SERVER_ERROR_REPLY.to_string()
                    }
                };
                Some(reply)
            }
            InboundEvent::Other => {
                log::debug!("router: dropping non-text message from {}", sender);
                None
            }
        }
    }

    /// Tell the backend to drop the sender's conversation. Best effort: runs as its own task,
    /// failures are only logged, and the triggering reply never waits for it. It is chained
    /// after any earlier notification and recorded in the slot so the sender's next backend
    /// call goes out after it.
    fn notify_end_session(&self, sender: &str, slot: &mut SessionSlot) {
        let backend = Arc::clone(&self.backend);
        let sender = sender.to_string();
        let previous = slot.take_pending();
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if let Err(e) = backend.post_message(&sender, END_SESSION).await {
                log::debug!("router: end_session notification for {} failed: {}", sender, e);
            }
        });
        slot.set_pending(handle);
    }
}

fn non_empty_or(reply: String, fallback: &str) -> String {
    if reply.trim().is_empty() {
        fallback.to_string()
    } else {
        reply
    }
}
