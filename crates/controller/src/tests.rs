//! Controller lifecycle tests against minimal in-crate collaborators

use crate::config::ControllerConfig;
use crate::controller::{SlotController, FRAME_ID_PREFIX, QUERY_ID_ATTRIBUTE, SLOT_INDEX_ATTRIBUTE};
use crate::error::{IdentityResult, NetworkError, SlotError, ValidationError};
use crate::fingerprint::{ad_key, ElementNode};
use crate::host::{
    AnalyticsHandle, AnalyticsInjector, Collaborators, CreativeFrame, IdentitySource, RenderHost,
};
use crate::verifier::SANDBOX_FLAGS;
use adslot_page::{PageContext, PageOptions, RegistryError};
use adslot_types::{
    ConsentState, ConsentTuple, ContainerType, CreativeMeta, FetchResponse, FrameMessage,
    IdentityToken, ResponseHeaders, Size, SlotId, SlotState, UnlayoutOutcome, ViewportGeometry,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Frame {
    id: Mutex<Option<String>>,
    size: Mutex<Option<Size>>,
    interceptors: AtomicUsize,
    sandbox: Mutex<Option<String>>,
}

impl CreativeFrame for Frame {
    fn set_id(&self, id: &str) {
        *self.id.lock().unwrap() = Some(id.to_string());
    }

    fn apply_size(&self, size: Size) {
        *self.size.lock().unwrap() = Some(size);
    }

    fn install_click_interceptor(&self) {
        self.interceptors.fetch_add(1, Ordering::SeqCst);
    }

    fn set_sandbox(&self, flags: Option<String>) {
        *self.sandbox.lock().unwrap() = flags;
    }
}

struct Host {
    attrs: Mutex<BTreeMap<String, String>>,
    containers: Vec<ContainerType>,
    frame: Arc<Frame>,
    render_started: AtomicUsize,
}

impl Host {
    fn new(attrs: &[(&str, &str)]) -> Self {
        Self {
            attrs: Mutex::new(
                attrs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            containers: vec![],
            frame: Arc::new(Frame::default()),
            render_started: AtomicUsize::new(0),
        }
    }

    fn attr(&self, name: &str) -> Option<String> {
        self.attrs.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl RenderHost for Host {
    fn attributes(&self) -> BTreeMap<String, String> {
        self.attrs.lock().unwrap().clone()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        self.attrs
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }

    fn element_path(&self) -> Vec<ElementNode> {
        vec![ElementNode::new("amp-ad"), ElementNode::new("body"), ElementNode::new("html")]
    }

    fn enclosing_containers(&self) -> Vec<ContainerType> {
        self.containers.clone()
    }

    fn layout_box(&self) -> Size {
        Size::new(320, 100)
    }

    fn viewport(&self) -> ViewportGeometry {
        ViewportGeometry::default()
    }

    fn document_url(&self) -> String {
        "https://publisher.example/".to_string()
    }

    fn referrer(&self) -> Option<String> {
        None
    }

    async fn issue_request(&self, _url: &str) -> Result<FetchResponse, NetworkError> {
        Err(NetworkError::Transport("offline".into()))
    }

    fn default_validate(&self, bytes: Vec<u8>, _headers: &ResponseHeaders) -> Option<Vec<u8>> {
        Some(bytes)
    }

    fn frame(&self) -> Option<Arc<dyn CreativeFrame>> {
        Some(self.frame.clone() as Arc<dyn CreativeFrame>)
    }

    fn render_started(&self) {
        self.render_started.fetch_add(1, Ordering::SeqCst);
    }
}

struct Identity;

#[async_trait]
impl IdentitySource for Identity {
    async fn fetch(&self, _policy: Option<&str>) -> IdentityResult<IdentityToken> {
        Ok(IdentityToken::empty())
    }
}

#[derive(Default)]
struct Analytics {
    next: AtomicU64,
    inserted: Mutex<Vec<(String, bool)>>,
    removed: Mutex<Vec<AnalyticsHandle>>,
}

impl AnalyticsInjector for Analytics {
    fn request_extension(&self) {}

    fn insert_analytics_element(
        &self,
        owner: &str,
        _config: &serde_json::Value,
        _autoload: bool,
        defer: bool,
    ) -> AnalyticsHandle {
        self.inserted.lock().unwrap().push((owner.to_string(), defer));
        AnalyticsHandle(self.next.fetch_add(1, Ordering::SeqCst))
    }

    fn remove_element(&self, handle: AnalyticsHandle) {
        self.removed.lock().unwrap().push(handle);
    }
}

struct Fixture {
    page: Arc<PageContext>,
    config: Arc<ControllerConfig>,
    host: Arc<Host>,
    analytics: Arc<Analytics>,
}

impl Fixture {
    fn new(host: Host) -> Self {
        Self::with_config(host, ControllerConfig::default())
    }

    fn with_config(host: Host, config: ControllerConfig) -> Self {
        Self {
            page: Arc::new(PageContext::new(PageOptions {
                experiment_seed: Some(3),
                correlator: Some(7),
                page_start_ms: 1_000,
                initially_visible: true,
            })),
            config: Arc::new(config),
            host: Arc::new(host),
            analytics: Arc::new(Analytics::default()),
        }
    }

    fn controller(&self) -> SlotController {
        SlotController::new(
            self.page.clone(),
            self.config.clone(),
            Collaborators {
                host: self.host.clone(),
                identity: Arc::new(Identity),
                analytics: self.analytics.clone(),
                responsive: None,
            },
        )
    }
}

fn sufficient() -> ConsentTuple {
    ConsentTuple::new(ConsentState::Sufficient)
}

fn analytics_headers() -> ResponseHeaders {
    ResponseHeaders::new()
        .with("X-QQID", "qid-1")
        .with("X-AmpAnalytics", r#"{"url":["https://track.example/a"]}"#)
}

async fn requested(fixture: &Fixture) -> SlotController {
    let mut slot = fixture.controller();
    slot.build().await.unwrap();
    let url = slot.compute_request_url(&sufficient()).await.unwrap();
    assert!(!url.is_empty());
    slot
}

// =============================================================================
// Build
// =============================================================================
#[tokio::test]
async fn test_build_requires_client() {
    let fixture = Fixture::new(Host::new(&[("data-ad-slot", "top")]));
    let mut slot = fixture.controller();

    let err = slot.build().await.unwrap_err();
    assert!(matches!(
        err,
        SlotError::Validation(ValidationError::MissingClient)
    ));
    assert_eq!(slot.state(), SlotState::Unbuilt);
}

#[tokio::test]
async fn test_build_is_idempotent() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let mut slot = fixture.controller();

    slot.build().await.unwrap();
    let index = slot.slot_index();
    slot.build().await.unwrap();

    assert_eq!(slot.state(), SlotState::Built);
    assert_eq!(slot.slot_index(), index);
    assert_eq!(
        fixture.host.attr(SLOT_INDEX_ATTRIBUTE),
        Some(index.to_string())
    );
}

// =============================================================================
// Request
// =============================================================================
#[tokio::test]
async fn test_request_before_build_rejected() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let mut slot = fixture.controller();

    let err = slot.compute_request_url(&sufficient()).await.unwrap_err();
    assert!(matches!(err, SlotError::InvalidStateForOperation { .. }));
}

#[tokio::test]
async fn test_unknown_consent_suppresses_request() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let mut slot = fixture.controller();
    slot.build().await.unwrap();

    let url = slot
        .compute_request_url(&ConsentTuple::new(ConsentState::Unknown))
        .await
        .unwrap();

    assert!(url.is_empty());
    assert_eq!(slot.state(), SlotState::Built);
    assert!(slot.unique_slot_id().is_none());
    assert_eq!(fixture.page.with_registry("adsense", |r| r.active_slots()), 0);
}

#[tokio::test]
async fn test_unknown_consent_with_opt_in_requests_npa() {
    let fixture = Fixture::new(Host::new(&[
        ("data-ad-client", "ca-pub-1"),
        ("data-npa-on-unknown-consent", "true"),
    ]));
    let mut slot = fixture.controller();
    slot.build().await.unwrap();

    let url = slot
        .compute_request_url(&ConsentTuple::new(ConsentState::Unknown))
        .await
        .unwrap();

    assert_eq!(url.params().unwrap().get("npa"), Some("1"));
    assert_eq!(slot.state(), SlotState::RequestIssued);
}

#[tokio::test]
async fn test_request_registers_slot() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let slot = requested(&fixture).await;

    let id = slot.unique_slot_id().unwrap().clone();
    assert!(id.as_str().starts_with(&slot.slot_index().to_string()));
    assert!(id.as_str().ends_with(slot.ad_key().unwrap()));
    assert!(fixture.page.with_registry("adsense", |r| r.contains(&id)));
    assert_eq!(slot.request_index(), Some(1));
    assert_eq!(slot.size(), Some(Size::new(320, 100)));
}

#[tokio::test]
async fn test_network_failure_adds_hint_once() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let mut slot = requested(&fixture).await;

    slot.on_network_failure(&NetworkError::Status(500)).unwrap();
    assert_eq!(slot.state(), SlotState::Built);

    let url = slot.compute_request_url(&sufficient()).await.unwrap();
    assert!(url.as_str().ends_with("&aet=n"));

    slot.on_network_failure(&NetworkError::Status(500)).unwrap();
    let url = slot.compute_request_url(&sufficient()).await.unwrap();
    assert_eq!(url.as_str().matches("aet=").count(), 1);

    slot.unlayout().unwrap();
    let url = slot.compute_request_url(&sufficient()).await.unwrap();
    assert!(!url.as_str().contains("aet="));
}

#[tokio::test]
async fn test_failed_url_assembly_releases_slot() {
    let config = ControllerConfig {
        ad_endpoint: "not a url".to_string(),
        ..Default::default()
    };
    let fixture = Fixture::with_config(Host::new(&[("data-ad-client", "ca-pub-1")]), config);
    let mut slot = fixture.controller();
    slot.build().await.unwrap();

    for _ in 0..2 {
        let err = slot.compute_request_url(&sufficient()).await.unwrap_err();
        assert!(matches!(err, SlotError::Url(_)));
        assert_eq!(slot.state(), SlotState::Built);
        assert!(slot.unique_slot_id().is_none());
        assert!(slot.request_index().is_none());
        assert_eq!(fixture.page.with_registry("adsense", |r| r.active_slots()), 0);
    }
}

#[tokio::test]
async fn test_released_slot_leaves_no_history() {
    let config = ControllerConfig {
        ad_endpoint: "not a url".to_string(),
        ..Default::default()
    };
    let fixture = Fixture::with_config(Host::new(&[("data-ad-client", "ca-pub-1")]), config);
    let mut broken = fixture.controller();
    broken.build().await.unwrap();
    assert!(broken.compute_request_url(&sufficient()).await.is_err());

    let healthy = Fixture {
        page: fixture.page.clone(),
        config: Arc::new(ControllerConfig::default()),
        host: Arc::new(Host::new(&[("data-ad-client", "ca-pub-1")])),
        analytics: Arc::new(Analytics::default()),
    };
    let slot = requested(&healthy).await;

    let shared = slot.shared_params().unwrap();
    assert!(shared.prev_formats.is_empty());
    assert_eq!(shared.pv, 2);
}

#[tokio::test]
async fn test_duplicate_slot_id_propagates() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let mut slot = fixture.controller();
    slot.build().await.unwrap();

    // Another registration already holds the id this slot will compute
    let adk = ad_key("", "320x100", &fixture.host.element_path());
    let taken = SlotId::compose(slot.slot_index(), &adk);
    fixture
        .page
        .with_registry("adsense", |r| r.add_new_slot("320x100", &taken, "ca-pub-1", ""))
        .unwrap();

    let err = slot.compute_request_url(&sufficient()).await.unwrap_err();
    assert!(matches!(
        err,
        SlotError::Registry(RegistryError::DuplicateSlotId { ref id, .. }) if *id == taken
    ));
    assert_eq!(slot.state(), SlotState::Built);
    assert!(slot.unique_slot_id().is_none());
    fixture.page.with_registry("adsense", |r| {
        assert_eq!(r.page_views("ca-pub-1"), 1);
        assert_eq!(r.active_slots(), 1);
    });

    fixture.page.with_registry("adsense", |r| r.remove_slot(&taken));
    let url = slot.compute_request_url(&sufficient()).await.unwrap();
    assert_eq!(url.params().unwrap().get("pv"), Some("2"));
}

// =============================================================================
// Response and render
// =============================================================================
#[tokio::test]
async fn test_validate_requires_headers_first() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let mut slot = requested(&fixture).await;

    let result = slot.validate_creative(b"<html></html>".to_vec(), &ResponseHeaders::new());
    assert!(matches!(
        result,
        Err(SlotError::InvalidStateForOperation { .. })
    ));
}

#[tokio::test]
async fn test_checksum_mismatch_rejects() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let mut slot = requested(&fixture).await;
    let headers = ResponseHeaders::new()
        .with("AMP-Verification-Checksum-Algorithm", "djb2")
        .with("AMP-Verification-Checksum", "1");

    slot.on_response_headers(&headers).unwrap();
    let validated = slot
        .validate_creative(b"<html>creative</html>".to_vec(), &headers)
        .unwrap();

    assert!(validated.is_none());
    assert_eq!(slot.state(), SlotState::ResponseRejected);
}

#[tokio::test]
async fn test_render_applies_directives() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let mut slot = requested(&fixture).await;
    let headers = analytics_headers();

    slot.on_response_headers(&headers).unwrap();
    slot.validate_creative(b"creative".to_vec(), &headers)
        .unwrap();
    slot.on_creative_rendered(Some(&CreativeMeta::default()))
        .unwrap();

    assert_eq!(slot.state(), SlotState::Rendered);
    assert_eq!(fixture.host.attr(QUERY_ID_ATTRIBUTE).as_deref(), Some("qid-1"));
    assert_eq!(
        fixture.host.frame.id.lock().unwrap().clone(),
        Some(format!("{}1", FRAME_ID_PREFIX))
    );
    assert_eq!(*fixture.host.frame.size.lock().unwrap(), Some(Size::new(320, 100)));
    assert_eq!(fixture.host.frame.interceptors.load(Ordering::SeqCst), 1);
    assert_eq!(*fixture.host.frame.sandbox.lock().unwrap(), None);
    assert_eq!(fixture.analytics.inserted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_render_applies_sandbox_flags() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let mut slot = requested(&fixture).await;
    let headers = ResponseHeaders::new().with("amp-ff-sandbox", "true");

    slot.on_response_headers(&headers).unwrap();
    slot.validate_creative(b"creative".to_vec(), &headers)
        .unwrap();
    slot.on_creative_rendered(None).unwrap();

    let flags = fixture.host.frame.sandbox.lock().unwrap().clone().unwrap();
    assert_eq!(flags, SANDBOX_FLAGS.join(" "));
    assert!(flags.contains("allow-scripts"));
}

#[tokio::test]
async fn test_ad_exit_creative_skips_interceptor() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let mut slot = requested(&fixture).await;

    slot.on_response_headers(&ResponseHeaders::new()).unwrap();
    slot.validate_creative(b"creative".to_vec(), &ResponseHeaders::new())
        .unwrap();
    let meta = CreativeMeta::default().with_extension(CreativeMeta::AD_EXIT_EXTENSION);
    slot.on_creative_rendered(Some(&meta)).unwrap();

    assert_eq!(fixture.host.frame.interceptors.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Unlayout
// =============================================================================
#[tokio::test]
async fn test_unlayout_in_house_keeps_frame() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let mut slot = requested(&fixture).await;
    slot.on_response_headers(&analytics_headers()).unwrap();
    slot.validate_creative(b"creative".to_vec(), &analytics_headers())
        .unwrap();
    slot.on_creative_rendered(Some(&CreativeMeta::default()))
        .unwrap();

    assert_eq!(slot.unlayout().unwrap(), UnlayoutOutcome::Kept);
    assert_eq!(slot.state(), SlotState::Rendered);
    assert!(slot.has_analytics_element());
    assert!(fixture.analytics.removed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unlayout_tears_down() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let mut slot = requested(&fixture).await;
    let id = slot.unique_slot_id().unwrap().clone();
    let index = slot.slot_index();

    slot.on_response_headers(&analytics_headers()).unwrap();
    slot.validate_creative(b"creative".to_vec(), &analytics_headers())
        .unwrap();
    slot.on_creative_rendered(None).unwrap();

    assert_eq!(slot.unlayout().unwrap(), UnlayoutOutcome::TornDown);
    assert_eq!(slot.state(), SlotState::Unlayouted);
    assert_ne!(slot.slot_index(), index);
    assert!(slot.query_id().is_none());
    assert!(slot.analytics_config().is_none());
    assert!(!slot.should_sandbox_frame());
    assert!(slot.is_in_house_creative().is_none());
    assert_eq!(fixture.analytics.removed.lock().unwrap().len(), 1);
    assert!(!fixture.page.with_registry("adsense", |r| r.contains(&id)));
}

// =============================================================================
// Sticky render start
// =============================================================================
#[tokio::test]
async fn test_sticky_render_start_fires_once() {
    let mut host = Host::new(&[("data-ad-client", "ca-pub-1")]);
    host.containers = vec![ContainerType::StickyAd];
    let fixture = Fixture::new(host);
    let mut slot = requested(&fixture).await;

    assert!(slot.let_creative_trigger_render_start());
    let frame_id = slot.frame_id().unwrap();

    fixture
        .page
        .messages()
        .dispatch(FrameMessage::new("google_ads_iframe_99", "fill_sticky"));
    assert_eq!(fixture.host.render_started.load(Ordering::SeqCst), 0);

    fixture
        .page
        .messages()
        .dispatch(FrameMessage::new(frame_id.clone(), "fill_sticky"));
    fixture
        .page
        .messages()
        .dispatch(FrameMessage::new(frame_id, "fill_sticky"));
    assert_eq!(fixture.host.render_started.load(Ordering::SeqCst), 1);
    assert!(!slot.render_start_pending());
}

#[tokio::test]
async fn test_render_start_outside_sticky_container() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let mut slot = requested(&fixture).await;
    assert!(!slot.let_creative_trigger_render_start());
}

#[tokio::test]
async fn test_drop_deregisters() {
    let fixture = Fixture::new(Host::new(&[("data-ad-client", "ca-pub-1")]));
    let slot = requested(&fixture).await;
    let id = slot.unique_slot_id().unwrap().clone();

    drop(slot);
    assert!(!fixture.page.with_registry("adsense", |r| r.contains(&id)));
}
