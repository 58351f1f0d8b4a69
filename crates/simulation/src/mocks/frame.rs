//! Mock creative frame recording what the controller applied to it.

use std::sync::atomic::{AtomicUsize, Ordering};

use adslot_controller::CreativeFrame;
use adslot_types::Size;
use parking_lot::Mutex;

/// Mock frame for simulation testing.
#[derive(Debug, Default)]
pub struct MockFrame {
    id: Mutex<Option<String>>,
    size: Mutex<Option<Size>>,
    interceptors: AtomicUsize,
    sandbox: Mutex<Option<String>>,
}

impl MockFrame {
    /// Create a new mock frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Element id assigned by the controller.
    pub fn id(&self) -> Option<String> {
        self.id.lock().clone()
    }

    /// Size applied by the controller.
    pub fn size(&self) -> Option<Size> {
        *self.size.lock()
    }

    /// Sandbox flags applied by the controller.
    pub fn sandbox(&self) -> Option<String> {
        self.sandbox.lock().clone()
    }

    /// Number of click interceptors installed.
    pub fn interceptor_count(&self) -> usize {
        self.interceptors.load(Ordering::SeqCst)
    }
}

impl CreativeFrame for MockFrame {
    fn set_id(&self, id: &str) {
        *self.id.lock() = Some(id.to_string());
    }

    fn apply_size(&self, size: Size) {
        *self.size.lock() = Some(size);
    }

    fn install_click_interceptor(&self) {
        self.interceptors.fetch_add(1, Ordering::SeqCst);
    }

    fn set_sandbox(&self, flags: Option<String>) {
        *self.sandbox.lock() = flags;
    }
}
