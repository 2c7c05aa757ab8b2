//! Per-sender session registry for the router.
//!
//! Every sender that is being handled gets a slot guarded by its own mutex, so events from one
//! sender are processed one at a time while other senders proceed in parallel. A slot carries a
//! `SessionState` only once the sender has activated; slots without state are dropped again when
//! nobody is using them. Records are never removed once created (deactivation only clears them).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;

/// Conversation partner identity (WhatsApp JID, opaque to the router).
pub type SenderId = String;

/// Conversational sub-state the router resets on activation and deactivation.
/// Deeper conversational state is owned by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConversationContext {
    #[default]
    AwaitingOption,
}

/// Activation record of one sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub active: bool,
    pub context: ConversationContext,
}

/// Registry slot for one sender: optional record plus the pending end-session notification.
pub struct SessionSlot {
    state: Option<SessionState>,
    pending: Option<JoinHandle<()>>,
    active_count: Arc<AtomicUsize>,
}

impl SessionSlot {
    fn new(active_count: Arc<AtomicUsize>) -> Self {
        Self {
            state: None,
            pending: None,
            active_count,
        }
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    /// A sender without a record is inactive.
    pub fn is_active(&self) -> bool {
        self.state.as_ref().map_or(false, |s| s.active)
    }

    /// Mark active and reset the context, creating the record on first activation.
    pub fn activate(&mut self) {
        if !self.is_active() {
            self.active_count.fetch_add(1, Ordering::SeqCst);
        }
        self.state = Some(SessionState {
            active: true,
            context: ConversationContext::AwaitingOption,
        });
    }

    /// Mark inactive and reset the context. Returns whether the sender was active.
    /// Senders without a record stay without one.
    pub fn deactivate(&mut self) -> bool {
        let was_active = self.is_active();
        if was_active {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
        if let Some(state) = self.state.as_mut() {
            state.active = false;
            state.context = ConversationContext::AwaitingOption;
        }
        was_active
    }

    /// Remove the pending notification handle, if any.
    pub fn take_pending(&mut self) -> Option<JoinHandle<()>> {
        self.pending.take()
    }

    pub fn set_pending(&mut self, handle: JoinHandle<()>) {
        self.pending = Some(handle);
    }

    /// Wait (up to `limit`) for the pending end-session notification so the backend sees it
    /// before the next call for this sender. A notification that outlives the limit is detached.
    pub async fn settle_pending(&mut self, limit: Duration) {
        let Some(handle) = self.pending.take() else {
            return;
        };
        if tokio::time::timeout(limit, handle).await.is_err() {
            log::debug!("session: end_session notification still running after {:?}", limit);
        }
    }

    fn is_vacant(&self) -> bool {
        self.state.is_none() && self.pending.is_none()
    }
}

/// Exclusive access to one sender's slot.
pub type SlotGuard = OwnedMutexGuard<SessionSlot>;

/// In-memory registry: sender -> slot. Owned by the router.
pub struct SessionRegistry {
    slots: RwLock<HashMap<SenderId, Arc<Mutex<SessionSlot>>>>,
    active_count: Arc<AtomicUsize>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            active_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Lock the sender's slot, creating an empty one if needed. Waits while another event
    /// from the same sender is being handled.
    pub async fn lock(&self, sender: &str) -> SlotGuard {
        let existing = self.slots.read().await.get(sender).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut slots = self.slots.write().await;
                slots
                    .entry(sender.to_string())
                    .or_insert_with(|| {
                        Arc::new(Mutex::new(SessionSlot::new(self.active_count.clone())))
                    })
                    .clone()
            }
        };
        slot.lock_owned().await
    }

    /// Unlock the slot; a slot that holds nothing and that no one else is waiting on is dropped.
    pub async fn release(&self, sender: &str, guard: SlotGuard) {
        let vacant = guard.is_vacant();
        drop(guard);
        if !vacant {
            return;
        }
        let mut slots = self.slots.write().await;
        let remove = match slots.get(sender) {
            Some(slot) => {
                Arc::strong_count(slot) == 1
                    && slot.try_lock().map(|g| g.is_vacant()).unwrap_or(false)
            }
            None => false,
        };
        if remove {
            slots.remove(sender);
        }
    }

    /// Snapshot of the sender's record, if one exists.
    pub async fn get(&self, sender: &str) -> Option<SessionState> {
        let slot = self.slots.read().await.get(sender).cloned()?;
        let guard = slot.lock().await;
        guard.state.clone()
    }

    /// Number of senders currently active.
    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Number of slots held (records plus slots in use).
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }
}
