//! Mock analytics injector.

use adslot_controller::{AnalyticsHandle, AnalyticsInjector};
use parking_lot::Mutex;

/// One inserted analytics element.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertedAnalytics {
    pub handle: AnalyticsHandle,
    pub owner: String,
    pub config: serde_json::Value,
    pub autoload: bool,
    pub defer: bool,
}

#[derive(Debug, Default)]
struct AnalyticsState {
    next_handle: u64,
    inserted: Vec<InsertedAnalytics>,
    removed: Vec<AnalyticsHandle>,
    extension_requests: usize,
}

/// Mock AnalyticsInjector recording every call.
#[derive(Debug, Default)]
pub struct MockAnalyticsInjector {
    state: Mutex<AnalyticsState>,
}

impl MockAnalyticsInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every element inserted, in order.
    pub fn inserted(&self) -> Vec<InsertedAnalytics> {
        self.state.lock().inserted.clone()
    }

    /// Handles removed, in order.
    pub fn removed(&self) -> Vec<AnalyticsHandle> {
        self.state.lock().removed.clone()
    }

    /// Elements inserted and not yet removed.
    pub fn active_count(&self) -> usize {
        let state = self.state.lock();
        state
            .inserted
            .iter()
            .filter(|entry| !state.removed.contains(&entry.handle))
            .count()
    }

    pub fn extension_requests(&self) -> usize {
        self.state.lock().extension_requests
    }
}

impl AnalyticsInjector for MockAnalyticsInjector {
    fn request_extension(&self) {
        self.state.lock().extension_requests += 1;
    }

    fn insert_analytics_element(
        &self,
        owner: &str,
        config: &serde_json::Value,
        autoload: bool,
        defer: bool,
    ) -> AnalyticsHandle {
        let mut state = self.state.lock();
        let handle = AnalyticsHandle(state.next_handle);
        state.next_handle += 1;
        state.inserted.push(InsertedAnalytics {
            handle,
            owner: owner.to_string(),
            config: config.clone(),
            autoload,
            defer,
        });
        handle
    }

    fn remove_element(&self, handle: AnalyticsHandle) {
        self.state.lock().removed.push(handle);
    }
}
