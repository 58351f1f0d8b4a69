//! Page context shared by every slot controller on one page
//!
//! Holds the state that outlives individual slots: one slot registry per
//! ad network, the experiment diverter, the frame message bus, the page slot
//! index counter, the page correlator, the first-visible signal and the
//! pending identity token. Created once per page and passed by reference
//! into every controller.

use crate::experiment::{ExperimentDiverter, SlotAttributes, SlotExperiments};
use crate::messages::FrameMessageBus;
use crate::registry::SharedSlotRegistry;
use adslot_types::IdentityToken;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Options for creating a page context
#[derive(Debug, Clone, Default)]
pub struct PageOptions {
    /// Seed for experiment diversion; random when absent
    pub experiment_seed: Option<u64>,
    /// Page correlator; random when absent
    pub correlator: Option<u64>,
    /// Page start time in milliseconds since the Unix epoch
    pub page_start_ms: u64,
    /// Whether the document is already visible
    pub initially_visible: bool,
}

/// Identity token fetch shared by every slot of a page
pub type SharedIdentityToken = Shared<BoxFuture<'static, IdentityToken>>;

#[derive(Default)]
struct IdentityCache(Mutex<Option<SharedIdentityToken>>);

impl fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("started", &self.0.lock().is_some())
            .finish()
    }
}

/// Shared state for all slots of one page
#[derive(Debug)]
pub struct PageContext {
    registries: Mutex<HashMap<String, Arc<Mutex<SharedSlotRegistry>>>>,
    diverter: Mutex<ExperimentDiverter>,
    messages: FrameMessageBus,
    slot_index: AtomicU64,
    correlator: u64,
    page_start_ms: u64,
    visible_tx: watch::Sender<bool>,
    identity: IdentityCache,
}

impl PageContext {
    /// Create a page context with the default experiments registered
    pub fn new(options: PageOptions) -> Self {
        let diverter = match options.experiment_seed {
            Some(seed) => ExperimentDiverter::with_seed(seed),
            None => ExperimentDiverter::new(),
        }
        .with_default_experiments();

        let correlator = options
            .correlator
            .unwrap_or_else(|| rand::thread_rng().gen_range(1..(1u64 << 53)));

        let (visible_tx, _) = watch::channel(options.initially_visible);

        Self {
            registries: Mutex::new(HashMap::new()),
            diverter: Mutex::new(diverter),
            messages: FrameMessageBus::new(),
            slot_index: AtomicU64::new(0),
            correlator,
            page_start_ms: options.page_start_ms,
            visible_tx,
            identity: IdentityCache::default(),
        }
    }

    /// Registry for a network, created on first use
    pub fn registry(&self, network: &str) -> Arc<Mutex<SharedSlotRegistry>> {
        self.registries
            .lock()
            .entry(network.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SharedSlotRegistry::new(network))))
            .clone()
    }

    /// Run a closure against a network's registry
    pub fn with_registry<R>(
        &self,
        network: &str,
        f: impl FnOnce(&mut SharedSlotRegistry) -> R,
    ) -> R {
        let registry = self.registry(network);
        let mut guard = registry.lock();
        f(&mut guard)
    }

    /// Evaluate experiments for one slot
    pub fn divert(&self, attrs: &SlotAttributes) -> SlotExperiments {
        self.diverter.lock().divert(attrs)
    }

    /// Run a closure against the experiment diverter
    pub fn with_diverter<R>(&self, f: impl FnOnce(&mut ExperimentDiverter) -> R) -> R {
        f(&mut self.diverter.lock())
    }

    /// Allocate the next page slot index
    pub fn next_slot_index(&self) -> u64 {
        self.slot_index.fetch_add(1, Ordering::SeqCst)
    }

    pub fn messages(&self) -> &FrameMessageBus {
        &self.messages
    }

    pub fn correlator(&self) -> u64 {
        self.correlator
    }

    pub fn page_start_ms(&self) -> u64 {
        self.page_start_ms
    }

    /// Record that the document became visible
    pub fn mark_visible(&self) {
        if !self.visible_tx.send_replace(true) {
            tracing::debug!("Document first visible");
        }
    }

    pub fn is_visible(&self) -> bool {
        *self.visible_tx.borrow()
    }

    /// Resolve once the document has been visible at least once
    ///
    /// The returned future does not borrow the page. It also resolves if the
    /// page is dropped first.
    pub fn when_first_visible(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.visible_tx.subscribe();
        async move {
            let _ = rx.wait_for(|visible| *visible).await;
        }
    }

    /// The page's identity token fetch, started by the first caller
    ///
    /// `start` runs at most once per page; every caller gets a handle to the
    /// same pending or settled fetch.
    pub fn identity_token<F>(&self, start: F) -> SharedIdentityToken
    where
        F: FnOnce() -> BoxFuture<'static, IdentityToken>,
    {
        self.identity
            .0
            .lock()
            .get_or_insert_with(|| start().shared())
            .clone()
    }

    /// Whether an identity fetch has been started on this page
    pub fn identity_started(&self) -> bool {
        self.identity.0.lock().is_some()
    }

    /// Clear registries, experiment assignments, frame listeners and the
    /// identity fetch
    pub fn reset(&self) {
        for registry in self.registries.lock().values() {
            registry.lock().reset();
        }
        self.diverter.lock().reset();
        self.messages.clear();
        self.slot_index.store(0, Ordering::SeqCst);
        *self.identity.0.lock() = None;
    }
}

impl Default for PageContext {
    fn default() -> Self {
        Self::new(PageOptions::default())
    }
}
