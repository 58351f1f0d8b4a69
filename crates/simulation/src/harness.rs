//! Page harness for multi-slot scenarios.
//!
//! Owns one page context and any number of slots, each with its own set of
//! recording mocks, so tests can drive controllers the way a hosting
//! pipeline would and then inspect what every collaborator saw.

use std::sync::Arc;

use adslot_controller::{
    Collaborators, ControllerConfig, CreativeLoad, RequestUrl, SlotController, SlotError,
};
use adslot_page::{PageContext, PageOptions};
use adslot_types::{ConsentTuple, CreativeMeta, FrameMessage, UnlayoutOutcome};
use thiserror::Error;

use crate::mocks::{
    MockAnalyticsInjector, MockIdentitySource, MockRenderHost, MockResponsivePlacement,
};

/// Errors from harness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Slot index out of range
    #[error("Slot {0} not found")]
    SlotNotFound(usize),
    /// Controller operation failed
    #[error("Slot operation failed: {0}")]
    Slot(#[from] SlotError),
}

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// One slot and the mocks it was built with.
pub struct SimulatedSlot {
    pub host: Arc<MockRenderHost>,
    pub identity: Arc<MockIdentitySource>,
    pub analytics: Arc<MockAnalyticsInjector>,
    pub responsive: Option<Arc<MockResponsivePlacement>>,
    pub controller: SlotController,
}

/// Builder for a slot's mocks.
#[derive(Default)]
pub struct SlotSetup {
    host: MockRenderHost,
    identity: MockIdentitySource,
    responsive: Option<MockResponsivePlacement>,
}

impl SlotSetup {
    pub fn new(host: MockRenderHost) -> Self {
        Self {
            host,
            ..Default::default()
        }
    }

    pub fn with_identity(mut self, identity: MockIdentitySource) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_responsive(mut self, responsive: MockResponsivePlacement) -> Self {
        self.responsive = Some(responsive);
        self
    }
}

/// Test harness for one page of ad slots.
///
/// # Example
///
/// ```rust,ignore
/// use adslot_simulation::{PageHarness, mocks::MockRenderHost};
///
/// let mut harness = PageHarness::new();
/// let slot = harness.add_slot(MockRenderHost::new().with_client("ca-pub-123"));
///
/// harness.build(slot).await?;
/// let url = harness.request_url(slot, &consent).await?;
/// ```
pub struct PageHarness {
    page: Arc<PageContext>,
    config: Arc<ControllerConfig>,
    slots: Vec<SimulatedSlot>,
}

impl Default for PageHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl PageHarness {
    /// Visible page with a fixed seed and correlator.
    pub fn new() -> Self {
        Self::with_options(
            PageOptions {
                experiment_seed: Some(7),
                correlator: Some(4_242),
                page_start_ms: 1_700_000_000_000,
                initially_visible: true,
            },
            ControllerConfig::default(),
        )
    }

    pub fn with_options(options: PageOptions, config: ControllerConfig) -> Self {
        Self {
            page: Arc::new(PageContext::new(options)),
            config: Arc::new(config),
            slots: Vec::new(),
        }
    }

    pub fn page(&self) -> &Arc<PageContext> {
        &self.page
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Add a slot with default identity and no responsive collaborator.
    pub fn add_slot(&mut self, host: MockRenderHost) -> usize {
        self.add_slot_with(SlotSetup::new(host))
    }

    /// Add a slot with custom mocks; returns its position.
    pub fn add_slot_with(&mut self, setup: SlotSetup) -> usize {
        let host = Arc::new(setup.host);
        let identity = Arc::new(setup.identity);
        let analytics = Arc::new(MockAnalyticsInjector::new());
        let responsive = setup.responsive.map(Arc::new);

        let collaborators = Collaborators {
            host: host.clone(),
            identity: identity.clone(),
            analytics: analytics.clone(),
            responsive: responsive
                .clone()
                .map(|r| r as Arc<dyn adslot_controller::ResponsivePlacement>),
        };
        let controller = adslot_controller::registration().create(
            self.page.clone(),
            self.config.clone(),
            collaborators,
        );

        self.slots.push(SimulatedSlot {
            host,
            identity,
            analytics,
            responsive,
            controller,
        });
        self.slots.len() - 1
    }

    /// Remove a slot, dropping its controller.
    pub fn remove_slot(&mut self, slot: usize) -> HarnessResult<SimulatedSlot> {
        if slot >= self.slots.len() {
            return Err(HarnessError::SlotNotFound(slot));
        }
        Ok(self.slots.remove(slot))
    }

    pub fn slot(&self, slot: usize) -> HarnessResult<&SimulatedSlot> {
        self.slots.get(slot).ok_or(HarnessError::SlotNotFound(slot))
    }

    pub fn slot_mut(&mut self, slot: usize) -> HarnessResult<&mut SimulatedSlot> {
        self.slots
            .get_mut(slot)
            .ok_or(HarnessError::SlotNotFound(slot))
    }

    pub fn controller(&self, slot: usize) -> HarnessResult<&SlotController> {
        Ok(&self.slot(slot)?.controller)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub async fn build(&mut self, slot: usize) -> HarnessResult<()> {
        self.slot_mut(slot)?.controller.build().await?;
        Ok(())
    }

    pub async fn build_all(&mut self) -> HarnessResult<()> {
        for slot in 0..self.slots.len() {
            self.build(slot).await?;
        }
        Ok(())
    }

    pub async fn request_url(
        &mut self,
        slot: usize,
        consent: &ConsentTuple,
    ) -> HarnessResult<RequestUrl> {
        Ok(self
            .slot_mut(slot)?
            .controller
            .compute_request_url(consent)
            .await?)
    }

    /// Request, fetch and validate in one step.
    pub async fn load(&mut self, slot: usize, consent: &ConsentTuple) -> HarnessResult<CreativeLoad> {
        Ok(self.slot_mut(slot)?.controller.load_creative(consent).await?)
    }

    pub fn render(&mut self, slot: usize, meta: Option<&CreativeMeta>) -> HarnessResult<()> {
        self.slot_mut(slot)?.controller.on_creative_rendered(meta)?;
        Ok(())
    }

    /// Build, load and render a slot.
    pub async fn run_to_render(
        &mut self,
        slot: usize,
        consent: &ConsentTuple,
        meta: Option<&CreativeMeta>,
    ) -> HarnessResult<CreativeLoad> {
        self.build(slot).await?;
        let load = self.load(slot, consent).await?;
        if matches!(load, CreativeLoad::Accepted(_) | CreativeLoad::Rejected) {
            self.render(slot, meta)?;
        }
        Ok(load)
    }

    pub fn unlayout(&mut self, slot: usize) -> HarnessResult<UnlayoutOutcome> {
        Ok(self.slot_mut(slot)?.controller.unlayout()?)
    }

    /// Post a message from a frame to the page.
    pub fn post_message(&self, source: &str, data: &str) -> usize {
        self.page
            .messages()
            .dispatch(FrameMessage::new(source, data))
    }

    /// Number of slots registered for the configured network.
    pub fn active_slots(&self) -> usize {
        self.page
            .with_registry(&self.config.network, |registry| registry.active_slots())
    }

    /// Assert the number of registered slots.
    pub fn assert_active_slots(&self, expected: usize) {
        let actual = self.active_slots();
        assert_eq!(
            actual, expected,
            "Expected {} registered slots, found {}",
            expected, actual
        );
    }
}
