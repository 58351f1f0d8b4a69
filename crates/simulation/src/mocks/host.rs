//! Mock render host with scripted ad responses.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use adslot_controller::{CreativeFrame, ElementNode, NetworkError, RenderHost};
use adslot_types::{ContainerType, FetchResponse, ResponseHeaders, Size, ViewportGeometry};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::frame::MockFrame;

#[derive(Debug, Default)]
struct HostState {
    attributes: BTreeMap<String, String>,
    layout_box: Size,
    responses: VecDeque<Result<FetchResponse, NetworkError>>,
    requests: Vec<String>,
    render_started: usize,
}

/// Mock RenderHost for simulation testing.
///
/// Responses are served in the order they were scripted; once the script
/// runs out every request gets an empty creative.
///
/// # Example
///
/// ```rust,ignore
/// use adslot_simulation::mocks::MockRenderHost;
///
/// let host = MockRenderHost::new()
///     .with_client("ca-pub-123")
///     .with_layout_box(Size::new(300, 250))
///     .with_response(FetchResponse::new("<html></html>", ResponseHeaders::new()));
/// ```
#[derive(Debug)]
pub struct MockRenderHost {
    state: Mutex<HostState>,
    frame: Arc<MockFrame>,
    element_path: Vec<ElementNode>,
    containers: Vec<ContainerType>,
    viewport: ViewportGeometry,
    document_url: String,
    referrer: Option<String>,
    latency: Option<Duration>,
    accept_default: bool,
}

impl Default for MockRenderHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRenderHost {
    /// Create a host with a 300x250 layout box and an `amp-ad` element
    /// directly under `body`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState {
                layout_box: Size::new(300, 250),
                ..Default::default()
            }),
            frame: Arc::new(MockFrame::new()),
            element_path: vec![
                ElementNode::new("amp-ad"),
                ElementNode::new("body").with_preceding_siblings(["head"]),
                ElementNode::new("html"),
            ],
            containers: Vec::new(),
            viewport: ViewportGeometry {
                viewport: Size::new(375, 667),
                screen: Size::new(375, 812),
                scroll_x: 0,
                scroll_y: 0,
            },
            document_url: "https://publisher.example/article".to_string(),
            referrer: None,
            latency: None,
            accept_default: true,
        }
    }

    /// Set an element attribute.
    pub fn with_attribute(self, name: &str, value: &str) -> Self {
        self.state
            .lock()
            .attributes
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Set `data-ad-client`.
    pub fn with_client(self, client: &str) -> Self {
        self.with_attribute("data-ad-client", client)
    }

    /// Replace the element ancestry.
    pub fn with_element_path(mut self, path: Vec<ElementNode>) -> Self {
        self.element_path = path;
        self
    }

    /// Add an enclosing container.
    pub fn with_container(mut self, container: ContainerType) -> Self {
        self.containers.push(container);
        self
    }

    /// Configure the measured layout box.
    pub fn with_layout_box(self, size: Size) -> Self {
        self.state.lock().layout_box = size;
        self
    }

    pub fn with_viewport(mut self, viewport: ViewportGeometry) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_referrer(mut self, referrer: &str) -> Self {
        self.referrer = Some(referrer.to_string());
        self
    }

    /// Script a successful response.
    pub fn with_response(self, response: FetchResponse) -> Self {
        self.state.lock().responses.push_back(Ok(response));
        self
    }

    /// Script a failed request.
    pub fn with_network_failure(self, error: NetworkError) -> Self {
        self.state.lock().responses.push_back(Err(error));
        self
    }

    /// Configure simulated request latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make default validation reject every creative.
    pub fn rejecting_default_validation(mut self) -> Self {
        self.accept_default = false;
        self
    }

    /// Script a response after construction.
    pub fn push_response(&self, response: Result<FetchResponse, NetworkError>) {
        self.state.lock().responses.push_back(response);
    }

    /// Change the measured layout box.
    pub fn set_layout_box(&self, size: Size) {
        self.state.lock().layout_box = size;
    }

    /// Current value of an attribute.
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.state.lock().attributes.get(name).cloned()
    }

    /// URLs requested so far.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Number of render-start signals received.
    pub fn render_started_count(&self) -> usize {
        self.state.lock().render_started
    }

    /// The frame handed to the controller.
    pub fn mock_frame(&self) -> Arc<MockFrame> {
        self.frame.clone()
    }
}

#[async_trait]
impl RenderHost for MockRenderHost {
    fn attributes(&self) -> BTreeMap<String, String> {
        self.state.lock().attributes.clone()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        self.state
            .lock()
            .attributes
            .insert(name.to_string(), value.to_string());
    }

    fn element_path(&self) -> Vec<ElementNode> {
        self.element_path.clone()
    }

    fn enclosing_containers(&self) -> Vec<ContainerType> {
        self.containers.clone()
    }

    fn layout_box(&self) -> Size {
        self.state.lock().layout_box
    }

    fn viewport(&self) -> ViewportGeometry {
        self.viewport
    }

    fn document_url(&self) -> String {
        self.document_url.clone()
    }

    fn referrer(&self) -> Option<String> {
        self.referrer.clone()
    }

    async fn issue_request(&self, url: &str) -> Result<FetchResponse, NetworkError> {
        self.state.lock().requests.push(url.to_string());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = self.state.lock().responses.pop_front();
        scripted.unwrap_or_else(|| Ok(FetchResponse::default()))
    }

    fn default_validate(&self, bytes: Vec<u8>, _headers: &ResponseHeaders) -> Option<Vec<u8>> {
        self.accept_default.then_some(bytes)
    }

    fn frame(&self) -> Option<Arc<dyn CreativeFrame>> {
        Some(self.frame.clone() as Arc<dyn CreativeFrame>)
    }

    fn render_started(&self) {
        self.state.lock().render_started += 1;
        tracing::debug!("Render start signalled");
    }
}
