//! Slot controller: the lifecycle of one ad slot
//!
//! ```text
//! Unbuilt -> Built -> AwaitingIdentity -> RequestIssued -> ResponseAccepted -> Rendered
//!                                               |       \-> ResponseRejected -/
//!                                               \-> Built (network failure)
//! any built state -> Unlayouted -> Built
//! ```
//!
//! The controller is driven by the hosting pipeline on a single event loop.
//! Page-wide state is reached through the shared [`PageContext`]; no lock on
//! it is held across an await point.

use crate::config::ControllerConfig;
use crate::error::{NetworkError, SlotError, SlotResult, ValidationError};
use crate::fingerprint;
use crate::host::{
    AnalyticsHandle, AnalyticsInjector, Collaborators, IdentitySource, RenderHost,
    ResponsivePlacement,
};
use crate::identity::IdentityTokenFetcher;
use crate::placement::PlacementConfig;
use crate::request::{RequestBuilder, RequestInputs, RequestParams, NETWORK_FAILURE_HINT};
use crate::response::ResponseDirectives;
use crate::verifier::{CreativeVerifier, SandboxPolicy};
use adslot_page::{PageContext, SharedSlotParams, SlotExperiments, Subscription};
use adslot_page::{SIZE_EXPERIMENT_BRANCH, SIZE_FROM_ATTRIBUTES};
use adslot_types::{
    ConsentState, ConsentTuple, ContainerType, CreativeMeta, FrameMessage, ResponseHeaders, Size,
    SlotId, SlotState, UnlayoutOutcome,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attribute carrying the page slot index
pub const SLOT_INDEX_ATTRIBUTE: &str = "data-amp-slot-index";

/// Attribute carrying the served ad's query id
pub const QUERY_ID_ATTRIBUTE: &str = "data-google-query-id";

/// Prefix of the creative frame's element id
pub const FRAME_ID_PREFIX: &str = "google_ads_iframe_";

/// Request URL produced by [`SlotController::compute_request_url`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestUrl {
    /// Encoded URL
    url: String,
    /// Ordered parameters, absent when suppressed
    params: Option<RequestParams>,
}

impl RequestUrl {
    /// No request should be made
    pub fn suppressed() -> Self {
        Self::default()
    }

    /// URL text, empty when suppressed
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Whether the request was suppressed
    pub fn is_empty(&self) -> bool {
        self.url.is_empty()
    }

    /// Parameters the URL was built from
    pub fn params(&self) -> Option<&RequestParams> {
        self.params.as_ref()
    }
}

/// Result of a full request/validate cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreativeLoad {
    /// Consent blocked the request
    Suppressed,
    /// Creative passed validation
    Accepted(Vec<u8>),
    /// Creative discarded; render through the default path
    Rejected,
    /// Request failed; the next URL carries an error hint
    NetworkFailure(NetworkError),
}

/// Controller for a single ad slot
pub struct SlotController {
    /// Current lifecycle state
    state: SlotState,
    /// Page-wide shared state
    page: Arc<PageContext>,
    /// Controller configuration
    config: Arc<ControllerConfig>,
    /// Render pipeline host
    host: Arc<dyn RenderHost>,
    /// Source of the page identity token
    identity_source: Arc<dyn IdentitySource>,
    /// Analytics element injector
    analytics: Arc<dyn AnalyticsInjector>,
    /// Responsive collaborator, if the slot is responsive
    responsive: Option<Arc<dyn ResponsivePlacement>>,
    /// Request parameter and URL builder
    requests: RequestBuilder,

    /// Placement parsed at build
    placement: Option<PlacementConfig>,
    /// Experiment branches assigned at build
    experiments: SlotExperiments,
    /// Handle on the page identity fetch
    identity: IdentityTokenFetcher,
    /// Page slot index, advanced on every teardown
    slot_index: u64,

    // Per request
    /// Id under which the slot is registered
    unique_slot_id: Option<SlotId>,
    /// Ad key of the current request
    ad_key: Option<String>,
    /// Per-network request index (`ifi`)
    request_index: Option<u64>,
    /// Size sent in the current request
    size: Option<Size>,
    /// Pagination fields returned by the registry
    shared: Option<SharedSlotParams>,
    /// Error hint for the next request URL
    pending_error_hint: Option<&'static str>,
    /// Last URL handed to the host
    last_request_url: Option<String>,

    // Per response
    /// Header directives of the current response
    directives: Option<ResponseDirectives>,
    /// Whether the rendered creative was in-house
    is_in_house_creative: Option<bool>,
    /// Inserted analytics element
    analytics_element: Option<AnalyticsHandle>,
    /// Pending sticky render-start listener
    render_start: Option<Subscription>,
}

impl SlotController {
    /// Unbuilt controller for one slot element
    pub fn new(
        page: Arc<PageContext>,
        config: Arc<ControllerConfig>,
        collaborators: Collaborators,
    ) -> Self {
        let requests = RequestBuilder::new(&config);
        Self {
            state: SlotState::Unbuilt,
            page,
            config,
            host: collaborators.host,
            identity_source: collaborators.identity,
            analytics: collaborators.analytics,
            responsive: collaborators.responsive,
            requests,
            placement: None,
            experiments: SlotExperiments::default(),
            identity: IdentityTokenFetcher::new(),
            slot_index: 0,
            unique_slot_id: None,
            ad_key: None,
            request_index: None,
            size: None,
            shared: None,
            pending_error_hint: None,
            last_request_url: None,
            directives: None,
            is_in_house_creative: None,
            analytics_element: None,
            render_start: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current lifecycle state
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Placement parsed at build
    pub fn placement(&self) -> Option<&PlacementConfig> {
        self.placement.as_ref()
    }

    /// Experiment branches assigned at build
    pub fn experiments(&self) -> &SlotExperiments {
        &self.experiments
    }

    /// Page slot index
    pub fn slot_index(&self) -> u64 {
        self.slot_index
    }

    /// Registry id of the current request, `{slot_index}{ad_key}`
    pub fn unique_slot_id(&self) -> Option<&SlotId> {
        self.unique_slot_id.as_ref()
    }

    /// Ad key of the current request
    pub fn ad_key(&self) -> Option<&str> {
        self.ad_key.as_deref()
    }

    /// Per-network request index (`ifi`)
    pub fn request_index(&self) -> Option<u64> {
        self.request_index
    }

    /// Size requested for the current cycle
    pub fn size(&self) -> Option<Size> {
        self.size
    }

    /// Pagination fields returned at registration
    pub fn shared_params(&self) -> Option<&SharedSlotParams> {
        self.shared.as_ref()
    }

    /// Last URL handed to the host
    pub fn last_request_url(&self) -> Option<&str> {
        self.last_request_url.as_deref()
    }

    /// Query id of the current response
    pub fn query_id(&self) -> Option<&str> {
        self.directives.as_ref()?.query_id.as_deref()
    }

    /// Analytics config of the current response
    pub fn analytics_config(&self) -> Option<&serde_json::Value> {
        self.directives.as_ref()?.analytics_config.as_ref()
    }

    /// Whether the response asked for a sandboxed frame
    pub fn should_sandbox_frame(&self) -> bool {
        self.directives.as_ref().is_some_and(|d| d.sandbox)
    }

    /// Sandbox policy for the creative frame
    pub fn sandbox_policy(&self) -> SandboxPolicy {
        SandboxPolicy::from_directive(self.should_sandbox_frame())
    }

    /// `Some(true)` once an in-house creative rendered, `None` before render
    pub fn is_in_house_creative(&self) -> Option<bool> {
        self.is_in_house_creative
    }

    /// Element id of the creative frame for the current request
    pub fn frame_id(&self) -> Option<String> {
        self.request_index
            .map(|ifi| format!("{}{}", FRAME_ID_PREFIX, ifi))
    }

    /// Whether an analytics element is inserted
    pub fn has_analytics_element(&self) -> bool {
        self.analytics_element.is_some()
    }

    /// Whether a sticky render-start listener is still waiting
    pub fn render_start_pending(&self) -> bool {
        self.render_start.as_ref().is_some_and(Subscription::is_pending)
    }

    // =========================================================================
    // State machine
    // =========================================================================

    fn transition(&mut self, to: SlotState) -> SlotResult<()> {
        if !Self::is_valid_transition(self.state, to) {
            return Err(SlotError::InvalidTransition {
                from: self.state,
                to,
            });
        }

        info!(
            slot_index = self.slot_index,
            from = ?self.state,
            to = ?to,
            "Slot state transition"
        );
        self.state = to;
        Ok(())
    }

    fn is_valid_transition(from: SlotState, to: SlotState) -> bool {
        use SlotState::*;

        matches!(
            (from, to),
            (Unbuilt, Built)
                | (Built, AwaitingIdentity)
                | (AwaitingIdentity, RequestIssued)
                | (AwaitingIdentity, Built)
                | (RequestIssued, ResponseAccepted)
                | (RequestIssued, ResponseRejected)
                | (RequestIssued, Built)
                | (ResponseAccepted, Rendered)
                | (ResponseRejected, Rendered)
                | (Built, Unlayouted)
                | (AwaitingIdentity, Unlayouted)
                | (RequestIssued, Unlayouted)
                | (ResponseAccepted, Unlayouted)
                | (ResponseRejected, Unlayouted)
                | (Rendered, Unlayouted)
                | (Unlayouted, Built)
        )
    }

    fn require_state(&self, operation: &'static str, allowed: &[SlotState]) -> SlotResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SlotError::InvalidStateForOperation {
                operation,
                state: self.state,
            })
        }
    }

    // =========================================================================
    // Build
    // =========================================================================

    /// Validate the placement and prepare the slot
    ///
    /// Idempotent: calls after the first successful build do nothing. On a
    /// validation error the slot stays unbuilt.
    pub async fn build(&mut self) -> SlotResult<()> {
        if self.state != SlotState::Unbuilt {
            debug!(state = %self.state, "Slot already built");
            return Ok(());
        }

        let placement = match PlacementConfig::from_attributes(&self.host.attributes()) {
            Ok(placement) => placement,
            Err(e) => {
                warn!(error = %e, "Placement rejected");
                return Err(e.into());
            }
        };

        if let Some(responsive) = &self.responsive {
            if !responsive.is_valid_element() {
                warn!("Responsive placement rejected the element");
                return Err(ValidationError::InvalidResponsivePlacement.into());
            }
        }

        self.assign_slot_index();
        self.identity.start(
            self.page.clone(),
            self.identity_source.clone(),
            placement.consent_policy.clone(),
        );

        if self.responsive.is_none() {
            self.experiments = self.page.divert(&placement.slot_attributes(false));
            debug!(eid = ?self.experiments.eid(), "Experiments evaluated");
        }

        info!(client = %placement.client_id, slot = %placement.slot_name, "Slot built");
        self.placement = Some(placement);
        self.transition(SlotState::Built)?;

        if let Some(responsive) = self.responsive.clone() {
            if !responsive.attempt_change_size().await {
                debug!("Responsive resize refused");
            }
        }

        Ok(())
    }

    fn assign_slot_index(&mut self) {
        self.slot_index = self.page.next_slot_index();
        self.host
            .set_attribute(SLOT_INDEX_ATTRIBUTE, &self.slot_index.to_string());
    }

    // =========================================================================
    // Request
    // =========================================================================

    /// Compute the ad request URL
    ///
    /// Returns an empty URL, without registering the slot, when consent is
    /// unknown and the placement has not opted into non-personalized
    /// requests. Otherwise registers the slot, waits a bounded time for the
    /// identity token and assembles the URL.
    pub async fn compute_request_url(&mut self, consent: &ConsentTuple) -> SlotResult<RequestUrl> {
        if self.state == SlotState::Unlayouted {
            self.transition(SlotState::Built)?;
        }
        self.require_state("compute_request_url", &[SlotState::Built])?;

        let Some(placement) = self.placement.clone() else {
            return Err(SlotError::InvalidStateForOperation {
                operation: "compute_request_url",
                state: self.state,
            });
        };

        if consent.state == ConsentState::Unknown && !placement.npa_on_unknown_consent {
            info!("Consent unknown, request suppressed");
            return Ok(RequestUrl::suppressed());
        }

        let measured = self.host.layout_box();
        let chosen = match placement.explicit_size() {
            Some(explicit)
                if self
                    .experiments
                    .is_in(SIZE_FROM_ATTRIBUTES, SIZE_EXPERIMENT_BRANCH) =>
            {
                explicit
            }
            _ => measured,
        };
        let (size, story_size) = if placement.story_ad {
            (Size::ONE_BY_ONE, Some(chosen))
        } else {
            (chosen, None)
        };

        let format = size.format();
        let ad_key = fingerprint::ad_key(&placement.slot_name, &format, &self.host.element_path());
        let slot_id = SlotId::compose(self.slot_index, &ad_key);

        let (shared, request_index) = self.page.with_registry(&self.config.network, |registry| {
            let shared =
                registry.add_new_slot(&format, &slot_id, &placement.client_id, &placement.slot_name)?;
            Ok::<_, SlotError>((shared, registry.next_request_index()))
        })?;

        debug!(
            slot_id = %slot_id,
            pv = shared.pv,
            ifi = request_index,
            "Slot registered"
        );
        self.unique_slot_id = Some(slot_id);
        self.ad_key = Some(ad_key);
        self.request_index = Some(request_index);
        self.size = Some(size);
        self.shared = Some(shared);

        match self.issue_registered(&placement, consent, story_size).await {
            Ok(url) => Ok(url),
            Err(e) => {
                warn!(error = %e, "Request assembly failed, slot released");
                self.abandon_request();
                Err(e)
            }
        }
    }

    /// Wait for identity and assemble the URL of a registered slot
    async fn issue_registered(
        &mut self,
        placement: &PlacementConfig,
        consent: &ConsentTuple,
        story_size: Option<Size>,
    ) -> SlotResult<RequestUrl> {
        let (Some(ad_key), Some(request_index), Some(size), Some(shared)) = (
            self.ad_key.clone(),
            self.request_index,
            self.size,
            self.shared.clone(),
        ) else {
            return Err(SlotError::InvalidStateForOperation {
                operation: "issue_registered before registration",
                state: self.state,
            });
        };
        self.transition(SlotState::AwaitingIdentity)?;

        let identity = self.identity.token_within(self.config.identity_timeout).await;

        let containers = self.host.enclosing_containers();
        let document_url = self.host.document_url();
        let referrer = self.host.referrer();
        let rafmt = self.responsive.as_ref().and_then(|r| r.rafmt_param());

        let params = self.requests.build(&RequestInputs {
            placement,
            consent,
            size,
            ad_key: &ad_key,
            shared: &shared,
            request_index,
            correlator: self.page.correlator(),
            page_start_ms: self.page.page_start_ms(),
            viewport: self.host.viewport(),
            document_url: &document_url,
            referrer: referrer.as_deref(),
            containers: &containers,
            rafmt,
            story_size,
            identity: &identity,
            experiments: &self.experiments,
        });

        let mut url = self.requests.to_url(&params)?;
        if let Some(hint) = self.pending_error_hint.take() {
            url = self.requests.append_error_hint(url, hint);
        }

        self.last_request_url = Some(url.clone());
        self.transition(SlotState::RequestIssued)?;

        Ok(RequestUrl {
            url,
            params: Some(params),
        })
    }

    /// Undo a registration whose request was never issued
    fn abandon_request(&mut self) {
        self.deregister();
        self.ad_key = None;
        self.request_index = None;
        self.size = None;
        self.shared = None;

        if self.state == SlotState::AwaitingIdentity {
            if let Err(e) = self.transition(SlotState::Built) {
                warn!(error = %e, "Slot could not return to built");
            }
        }
    }

    /// Record a failed request
    ///
    /// The slot returns to `Built` and the next request URL carries a
    /// network-failure hint.
    pub fn on_network_failure(&mut self, error: &NetworkError) -> SlotResult<()> {
        self.require_state("on_network_failure", &[SlotState::RequestIssued])?;

        warn!(error = %error, "Ad request failed");
        self.pending_error_hint = Some(NETWORK_FAILURE_HINT);
        self.deregister();
        self.transition(SlotState::Built)
    }

    // =========================================================================
    // Response
    // =========================================================================

    /// Apply response header directives
    pub fn on_response_headers(&mut self, headers: &ResponseHeaders) -> SlotResult<()> {
        self.require_state("on_response_headers", &[SlotState::RequestIssued])?;

        let directives = ResponseDirectives::from_headers(headers);
        if directives.analytics_config.is_some() {
            self.analytics.request_extension();
        }

        debug!(
            query_id = ?directives.query_id,
            sandbox = directives.sandbox,
            defer_analytics = directives.defer_analytics(),
            "Response headers applied"
        );
        self.directives = Some(directives);
        Ok(())
    }

    /// Validate the creative
    ///
    /// Returns the bytes when they pass validation and `None` when the
    /// creative must be discarded.
    pub fn validate_creative(
        &mut self,
        bytes: Vec<u8>,
        headers: &ResponseHeaders,
    ) -> SlotResult<Option<Vec<u8>>> {
        self.require_state("validate_creative", &[SlotState::RequestIssued])?;
        if self.directives.is_none() {
            return Err(SlotError::InvalidStateForOperation {
                operation: "validate_creative before on_response_headers",
                state: self.state,
            });
        }

        let validated = if CreativeVerifier::requested_algorithm(headers).is_some() {
            match CreativeVerifier::verify_response(bytes, headers) {
                Ok(validated) => validated,
                Err(e) => {
                    warn!(error = %e, "Creative failed verification");
                    None
                }
            }
        } else {
            self.host.default_validate(bytes, headers)
        };

        let next = if validated.is_some() {
            SlotState::ResponseAccepted
        } else {
            SlotState::ResponseRejected
        };
        self.transition(next)?;
        Ok(validated)
    }

    /// Issue the request and validate the response
    pub async fn load_creative(&mut self, consent: &ConsentTuple) -> SlotResult<CreativeLoad> {
        let url = self.compute_request_url(consent).await?;
        if url.is_empty() {
            return Ok(CreativeLoad::Suppressed);
        }

        let response = match self.host.issue_request(url.as_str()).await {
            Ok(response) => response,
            Err(e) => {
                self.on_network_failure(&e)?;
                return Ok(CreativeLoad::NetworkFailure(e));
            }
        };

        self.on_response_headers(&response.headers)?;
        Ok(match self.validate_creative(response.bytes, &response.headers)? {
            Some(bytes) => CreativeLoad::Accepted(bytes),
            None => CreativeLoad::Rejected,
        })
    }

    // =========================================================================
    // Render
    // =========================================================================

    /// Finish rendering
    ///
    /// `meta` is present only when an in-house creative rendered.
    pub fn on_creative_rendered(&mut self, meta: Option<&CreativeMeta>) -> SlotResult<()> {
        self.require_state(
            "on_creative_rendered",
            &[SlotState::ResponseAccepted, SlotState::ResponseRejected],
        )?;

        self.is_in_house_creative = Some(meta.is_some());
        let frame = self.host.frame();

        if let (Some(meta), Some(frame)) = (meta, frame.as_ref()) {
            if !meta.intercepts_clicks() {
                frame.install_click_interceptor();
            }
        }

        self.insert_analytics()?;

        if let Some(frame) = frame.as_ref() {
            if let Some(size) = self.size {
                frame.apply_size(size);
            }
            if let Some(id) = self.frame_id() {
                frame.set_id(&id);
            }
            frame.set_sandbox(self.sandbox_policy().attribute());
        }

        if let Some(query_id) = self.query_id().map(String::from) {
            self.host.set_attribute(QUERY_ID_ATTRIBUTE, &query_id);
        }

        self.transition(SlotState::Rendered)
    }

    fn insert_analytics(&mut self) -> SlotResult<()> {
        let Some(directives) = self.directives.as_ref() else {
            return Ok(());
        };
        let Some(config) = directives.analytics_config.as_ref() else {
            return Ok(());
        };
        if self.analytics_element.is_some() {
            return Err(SlotError::AnalyticsAlreadyInserted);
        }

        let owner = self
            .unique_slot_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let handle = self.analytics.insert_analytics_element(
            &owner,
            config,
            true,
            directives.defer_analytics(),
        );
        debug!(handle = handle.0, "Analytics element inserted");
        self.analytics_element = Some(handle);
        Ok(())
    }

    /// Let the creative signal its own render start
    ///
    /// Inside a sticky container the render start is reported when the
    /// frame posts its ready message. Returns whether the creative owns the
    /// signal.
    pub fn let_creative_trigger_render_start(&mut self) -> bool {
        if !self
            .host
            .enclosing_containers()
            .contains(&ContainerType::StickyAd)
        {
            return false;
        }
        let Some(frame_id) = self.frame_id() else {
            debug!("No request issued, render start stays with the host");
            return false;
        };

        let ready = self.config.sticky_ready_message.clone();
        let host = self.host.clone();
        let subscription = self.page.messages().subscribe_once(
            move |message: &FrameMessage| message.source == frame_id && message.data == ready,
            move |_| host.render_started(),
        );
        self.render_start = Some(subscription);
        true
    }

    /// Layout measured the slot again
    pub fn on_layout_measure(&self) {
        if let Some(responsive) = &self.responsive {
            responsive.align_to_viewport();
        }
    }

    // =========================================================================
    // Unlayout
    // =========================================================================

    /// Release the slot's rendering resources
    ///
    /// An in-house creative keeps its frame and the slot stays rendered.
    /// Otherwise the slot gets a fresh slot index, leaves the registry,
    /// drops its analytics element and clears per-response state.
    pub fn unlayout(&mut self) -> SlotResult<UnlayoutOutcome> {
        if self.is_in_house_creative == Some(true) {
            debug!("In-house creative keeps its frame");
            return Ok(UnlayoutOutcome::Kept);
        }
        if matches!(self.state, SlotState::Unbuilt | SlotState::Unlayouted) {
            return Ok(UnlayoutOutcome::TornDown);
        }

        self.assign_slot_index();
        self.deregister();

        if let Some(handle) = self.analytics_element.take() {
            self.analytics.remove_element(handle);
        }

        self.directives = None;
        self.is_in_house_creative = None;
        self.render_start = None;

        self.transition(SlotState::Unlayouted)?;
        Ok(UnlayoutOutcome::TornDown)
    }

    fn deregister(&mut self) {
        if let Some(id) = self.unique_slot_id.take() {
            let removed = self
                .page
                .with_registry(&self.config.network, |registry| registry.remove_slot(&id));
            debug!(slot_id = %id, removed, "Slot deregistered");
        }
    }
}

impl Drop for SlotController {
    fn drop(&mut self) {
        self.deregister();
    }
}
