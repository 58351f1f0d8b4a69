//! Page-level frame message bus with one-shot subscriptions
//!
//! Rendered frames post messages to the page. A slot that waits for a frame
//! to announce itself subscribes once: the first matching message fires the
//! callback and removes the listener. Dropping the [`Subscription`] handle
//! removes a listener that has not fired yet.

use adslot_types::FrameMessage;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

type MessageFilter = Box<dyn Fn(&FrameMessage) -> bool + Send + Sync>;
type MessageCallback = Box<dyn FnOnce(FrameMessage) + Send>;

struct Listener {
    id: u64,
    filter: MessageFilter,
    callback: MessageCallback,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    listeners: Vec<Listener>,
}

/// Message bus shared by every slot on a page
#[derive(Clone, Default)]
pub struct FrameMessageBus {
    inner: Arc<Mutex<BusInner>>,
}

impl fmt::Debug for FrameMessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameMessageBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl FrameMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a listener that fires at most once
    pub fn subscribe_once<F, C>(&self, filter: F, callback: C) -> Subscription
    where
        F: Fn(&FrameMessage) -> bool + Send + Sync + 'static,
        C: FnOnce(FrameMessage) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push(Listener {
            id,
            filter: Box::new(filter),
            callback: Box::new(callback),
        });

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver a message; returns how many listeners fired
    ///
    /// Matching listeners are removed before their callbacks run, so a
    /// callback may subscribe again without deadlocking.
    pub fn dispatch(&self, message: FrameMessage) -> usize {
        let fired: Vec<Listener> = {
            let mut inner = self.inner.lock();
            let (matched, kept): (Vec<_>, Vec<_>) = inner
                .listeners
                .drain(..)
                .partition(|listener| (listener.filter)(&message));
            inner.listeners = kept;
            matched
        };

        let count = fired.len();
        for listener in fired {
            (listener.callback)(message.clone());
        }
        count
    }

    /// Number of listeners still waiting
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Drop every pending listener without firing it
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut self.inner.lock().listeners);
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "Frame message listeners cleared");
        }
    }
}

/// Handle to a pending one-shot listener
pub struct Subscription {
    id: u64,
    bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
    /// Whether the listener is still waiting for its message
    pub fn is_pending(&self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.lock().listeners.iter().any(|l| l.id == self.id),
            None => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.lock().listeners.retain(|l| l.id != self.id);
        }
    }
}
