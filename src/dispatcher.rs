//! Event Dispatcher
//!
//! Registry of monitor inboxes keyed by GID. External status sources call
//! [`EventDispatcher::publish`] and the matching monitors wake up for an
//! extra reconciliation pass.
//!
//! Publishing never blocks: inboxes are bounded, and a full inbox already
//! guarantees one more pass, so the extra wake is dropped. Inboxes whose
//! monitor has gone away are pruned on the next publish.

use crate::protocol::{Gid, StatusEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Sending half of a monitor's wake inbox
pub type Inbox = mpsc::Sender<StatusEvent>;

/// Process-wide map from GID to subscribed inboxes
#[derive(Debug, Default)]
pub struct EventDispatcher {
    subscribers: RwLock<HashMap<Gid, Vec<Inbox>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an inbox for a GID
    pub fn subscribe(&self, gid: &Gid, inbox: Inbox) {
        self.subscribers
            .write()
            .entry(gid.clone())
            .or_default()
            .push(inbox);
    }

    /// Drop every inbox registered for a GID
    pub fn unsubscribe(&self, gid: &Gid) {
        self.subscribers.write().remove(gid);
    }

    /// Move all inboxes from one GID to another
    pub fn rekey(&self, from: &Gid, to: &Gid) {
        let mut subscribers = self.subscribers.write();
        if let Some(inboxes) = subscribers.remove(from) {
            subscribers.entry(to.clone()).or_default().extend(inboxes);
        }
    }

    /// Deliver an event to every inbox of a GID.
    ///
    /// Returns the number of inboxes that accepted the event or already had
    /// a wake pending.
    pub fn publish(&self, gid: &Gid, event: StatusEvent) -> usize {
        let mut delivered = 0;
        let mut stale = false;
        {
            let subscribers = self.subscribers.read();
            let Some(inboxes) = subscribers.get(gid) else {
                return 0;
            };
            for inbox in inboxes {
                match inbox.try_send(event.clone()) {
                    Ok(()) | Err(TrySendError::Full(_)) => delivered += 1,
                    Err(TrySendError::Closed(_)) => stale = true,
                }
            }
        }

        if stale {
            let mut subscribers = self.subscribers.write();
            if let Some(inboxes) = subscribers.get_mut(gid) {
                inboxes.retain(|inbox| !inbox.is_closed());
                if inboxes.is_empty() {
                    subscribers.remove(gid);
                }
            }
        }

        delivered
    }

    /// Number of inboxes registered for a GID
    pub fn subscriber_count(&self, gid: &Gid) -> usize {
        self.subscribers.read().get(gid).map_or(0, Vec::len)
    }

    /// Whether any inbox is registered for a GID
    pub fn is_subscribed(&self, gid: &Gid) -> bool {
        self.subscriber_count(gid) > 0
    }

    /// Number of GIDs with at least one inbox
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}
