//! Mock responsive-size collaborator.

use std::sync::atomic::{AtomicUsize, Ordering};

use adslot_controller::ResponsivePlacement;
use async_trait::async_trait;

/// Mock ResponsivePlacement for auto-sized placements.
#[derive(Debug)]
pub struct MockResponsivePlacement {
    valid: bool,
    accept_resize: bool,
    rafmt: Option<String>,
    resize_attempts: AtomicUsize,
    alignments: AtomicUsize,
}

impl Default for MockResponsivePlacement {
    fn default() -> Self {
        Self::new()
    }
}

impl MockResponsivePlacement {
    /// Valid element that accepts resizes and reports `rafmt=13`.
    pub fn new() -> Self {
        Self {
            valid: true,
            accept_resize: true,
            rafmt: Some("13".to_string()),
            resize_attempts: AtomicUsize::new(0),
            alignments: AtomicUsize::new(0),
        }
    }

    /// Reject the element at build.
    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    /// Refuse resize attempts.
    pub fn refusing_resize(mut self) -> Self {
        self.accept_resize = false;
        self
    }

    pub fn with_rafmt(mut self, rafmt: Option<&str>) -> Self {
        self.rafmt = rafmt.map(String::from);
        self
    }

    pub fn resize_attempts(&self) -> usize {
        self.resize_attempts.load(Ordering::SeqCst)
    }

    pub fn alignments(&self) -> usize {
        self.alignments.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResponsivePlacement for MockResponsivePlacement {
    fn is_valid_element(&self) -> bool {
        self.valid
    }

    async fn attempt_change_size(&self) -> bool {
        self.resize_attempts.fetch_add(1, Ordering::SeqCst);
        self.accept_resize
    }

    fn rafmt_param(&self) -> Option<String> {
        self.rafmt.clone()
    }

    fn align_to_viewport(&self) {
        self.alignments.fetch_add(1, Ordering::SeqCst);
    }
}
