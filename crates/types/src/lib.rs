//! Core types for ad slot controllers
//!
//! This crate provides the value types shared by the page-wide state, the
//! slot controller and the collaborator mocks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Width x height of a slot or frame, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    /// Sentinel size requested for single-page story ads
    pub const ONE_BY_ONE: Size = Size {
        width: 1,
        height: 1,
    };

    /// Create a new size
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Render as the `WxH` format string used on the wire
    pub fn format(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Consent policy state reported by the consent service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsentState {
    /// User granted sufficient consent
    Sufficient,
    /// User rejected or granted insufficient consent
    Insufficient,
    /// Consent is not required for this user
    UnknownNotRequired,
    /// Consent state could not be determined
    Unknown,
}

impl ConsentState {
    /// Whether requests made under this state must disable personalized ads
    pub fn requires_non_personalized(&self) -> bool {
        matches!(self, ConsentState::Unknown | ConsentState::Insufficient)
    }
}

/// Everything the consent service hands to a slot for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentTuple {
    /// Policy state
    pub state: ConsentState,
    /// Raw consent string (TCF or similar)
    pub consent_string: Option<String>,
    /// Whether GDPR applies to this user, if known
    pub gdpr_applies: Option<bool>,
    /// Additional consent string
    pub additional_consent: Option<String>,
}

impl ConsentTuple {
    /// Create a tuple carrying only a policy state
    pub fn new(state: ConsentState) -> Self {
        Self {
            state,
            consent_string: None,
            gdpr_applies: None,
            additional_consent: None,
        }
    }

    pub fn with_consent_string(mut self, consent: impl Into<String>) -> Self {
        self.consent_string = Some(consent.into());
        self
    }

    pub fn with_gdpr_applies(mut self, applies: bool) -> Self {
        self.gdpr_applies = Some(applies);
        self
    }

    pub fn with_additional_consent(mut self, consent: impl Into<String>) -> Self {
        self.additional_consent = Some(consent.into());
        self
    }
}

/// Per-page identity material attached to ad requests
///
/// Every field is optional; an all-absent token is what a slot sends when the
/// fetch timed out or failed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IdentityToken {
    pub token: Option<String>,
    pub jar: Option<String>,
    pub pucrd: Option<String>,
}

impl IdentityToken {
    /// Token with every field absent
    pub fn empty() -> Self {
        Self::default()
    }

    /// Check whether no identity field is present
    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.jar.is_none() && self.pucrd.is_none()
    }
}

/// Identifier of a registered slot, unique among active slots of one network
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub String);

impl SlotId {
    /// Compose the id from the page slot index and the slot's ad key
    pub fn compose(slot_index: u64, ad_key: &str) -> Self {
        Self(format!("{}{}", slot_index, ad_key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Slot lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    /// Element upgraded, attributes not yet validated
    Unbuilt,
    /// Placement validated, ready to request
    Built,
    /// Request parameters assembled, waiting on the identity token
    AwaitingIdentity,
    /// Request URL handed to the render pipeline
    RequestIssued,
    /// Creative passed integrity checks
    ResponseAccepted,
    /// Creative failed integrity checks
    ResponseRejected,
    /// Creative rendered in its frame
    Rendered,
    /// Frame torn down, slot may be laid out again
    Unlayouted,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotState::Unbuilt => "Unbuilt",
            SlotState::Built => "Built",
            SlotState::AwaitingIdentity => "AwaitingIdentity",
            SlotState::RequestIssued => "RequestIssued",
            SlotState::ResponseAccepted => "ResponseAccepted",
            SlotState::ResponseRejected => "ResponseRejected",
            SlotState::Rendered => "Rendered",
            SlotState::Unlayouted => "Unlayouted",
        };
        f.write_str(name)
    }
}

/// Ancestor container kinds that change how a slot is requested or rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContainerType {
    StickyAd,
    Carousel,
    FlyingCarpet,
    Lightbox,
    Story,
}

impl ContainerType {
    /// Tag name of the container element
    pub fn tag(&self) -> &'static str {
        match self {
            ContainerType::StickyAd => "amp-sticky-ad",
            ContainerType::Carousel => "amp-carousel",
            ContainerType::FlyingCarpet => "amp-fx-flying-carpet",
            ContainerType::Lightbox => "amp-lightbox",
            ContainerType::Story => "amp-story",
        }
    }
}

/// Response headers with case-insensitive lookup
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseHeaders {
    entries: BTreeMap<String, String>,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any value stored under the same name
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for ResponseHeaders {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut headers = ResponseHeaders::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Bytes and headers returned by the ad server
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchResponse {
    pub bytes: Vec<u8>,
    pub headers: ResponseHeaders,
}

impl FetchResponse {
    pub fn new(bytes: impl Into<Vec<u8>>, headers: ResponseHeaders) -> Self {
        Self {
            bytes: bytes.into(),
            headers,
        }
    }
}

/// Metadata of an in-house creative, present only when one was rendered
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreativeMeta {
    /// Custom element extensions the creative loads
    pub custom_element_extensions: Vec<String>,
    /// Extra stylesheets the creative declared
    pub custom_stylesheets: Vec<String>,
}

impl CreativeMeta {
    /// Extension that takes over click handling inside the creative
    pub const AD_EXIT_EXTENSION: &'static str = "amp-ad-exit";

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.custom_element_extensions.push(extension.into());
        self
    }

    /// Whether the creative intercepts its own clicks
    pub fn intercepts_clicks(&self) -> bool {
        self.custom_element_extensions
            .iter()
            .any(|ext| ext == Self::AD_EXIT_EXTENSION)
    }
}

/// What `unlayout` did to the rendered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlayoutOutcome {
    /// Frame preserved; the host must keep it attached
    Kept,
    /// Frame released and transient state reset
    TornDown,
}

/// Viewport and screen geometry as reported by the host document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewportGeometry {
    /// Inner viewport size
    pub viewport: Size,
    /// Screen size
    pub screen: Size,
    pub scroll_x: i64,
    pub scroll_y: i64,
}

/// Message posted to the page by a rendered frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Element id of the frame that posted the message
    pub source: String,
    /// Message payload
    pub data: String,
}

impl FrameMessage {
    pub fn new(source: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            data: data.into(),
        }
    }
}
