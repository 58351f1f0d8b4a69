//! Collaborator interfaces the controller drives
//!
//! The controller owns no rendering or transport. The hosting pipeline
//! supplies these implementations; the simulation crate provides recording
//! mocks for tests.

use crate::error::{IdentityResult, NetworkError};
use crate::fingerprint::ElementNode;
use adslot_types::{
    ContainerType, FetchResponse, IdentityToken, ResponseHeaders, Size, ViewportGeometry,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Opaque handle to an inserted analytics element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnalyticsHandle(pub u64);

/// Rendering base the slot is attached to
#[async_trait]
pub trait RenderHost: Send + Sync {
    /// Current attributes of the slot element
    fn attributes(&self) -> BTreeMap<String, String>;

    fn set_attribute(&self, name: &str, value: &str);

    /// Ancestry of the slot element, the element itself first
    fn element_path(&self) -> Vec<ElementNode>;

    /// Containers enclosing the slot element
    fn enclosing_containers(&self) -> Vec<ContainerType>;

    /// Measured layout box of the slot element
    fn layout_box(&self) -> Size;

    fn viewport(&self) -> ViewportGeometry;

    fn document_url(&self) -> String;

    fn referrer(&self) -> Option<String>;

    /// Issue the ad request
    async fn issue_request(&self, url: &str) -> Result<FetchResponse, NetworkError>;

    /// Default creative validation when no integrity algorithm is advertised
    fn default_validate(&self, bytes: Vec<u8>, headers: &ResponseHeaders) -> Option<Vec<u8>>;

    /// Frame the creative renders into, once it exists
    fn frame(&self) -> Option<Arc<dyn CreativeFrame>>;

    /// Tell the pipeline the creative has started rendering
    fn render_started(&self);
}

/// Frame hosting a rendered creative
pub trait CreativeFrame: Send + Sync {
    fn set_id(&self, id: &str);

    fn apply_size(&self, size: Size);

    /// Route clicks through the page's exit handling
    fn install_click_interceptor(&self);

    /// Set the frame's `sandbox` attribute; `None` leaves it unrestricted
    fn set_sandbox(&self, flags: Option<String>);
}

/// Responsive-size collaborator for auto-sized placements
#[async_trait]
pub trait ResponsivePlacement: Send + Sync {
    /// Whether the element is valid for responsive sizing
    fn is_valid_element(&self) -> bool;

    /// Ask the layout to resize the slot; false when refused
    async fn attempt_change_size(&self) -> bool;

    /// `rafmt` request parameter, if any
    fn rafmt_param(&self) -> Option<String>;

    fn align_to_viewport(&self);
}

/// Inserts and removes analytics elements
pub trait AnalyticsInjector: Send + Sync {
    /// Request that the analytics extension be loaded
    fn request_extension(&self);

    fn insert_analytics_element(
        &self,
        owner: &str,
        config: &serde_json::Value,
        autoload: bool,
        defer: bool,
    ) -> AnalyticsHandle;

    fn remove_element(&self, handle: AnalyticsHandle);
}

/// Source of page identity tokens
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Fetch a token, gated on the given consent policy
    async fn fetch(&self, consent_policy: Option<&str>) -> IdentityResult<IdentityToken>;
}

/// Collaborators handed to a controller at construction
#[derive(Clone)]
pub struct Collaborators {
    pub host: Arc<dyn RenderHost>,
    pub identity: Arc<dyn IdentitySource>,
    pub analytics: Arc<dyn AnalyticsInjector>,
    pub responsive: Option<Arc<dyn ResponsivePlacement>>,
}
