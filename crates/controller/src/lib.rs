//! Ad slot controller
//!
//! Drives one ad slot from build to render:
//! - validates the placement and evaluates page experiments at build
//! - registers the slot in the page's shared registry and assembles the
//!   request URL, waiting a bounded time for the identity token
//! - applies response header directives and verifies creative checksums
//! - inserts analytics, sizes the frame and hands render start to sticky
//!   creatives
//! - releases or keeps the frame on unlayout
//!
//! Rendering, transport, analytics and identity are supplied by the host
//! through the traits in [`host`].

pub mod config;
pub mod controller;
pub mod error;
pub mod extension;
pub mod fingerprint;
pub mod host;
pub mod identity;
pub mod placement;
pub mod request;
pub mod response;
pub mod verifier;

#[cfg(test)]
mod tests;

pub use config::ControllerConfig;
pub use controller::{CreativeLoad, RequestUrl, SlotController};
pub use error::{
    ConfigError, CreativeIntegrityError, IdentityError, NetworkError, SlotError, SlotResult,
    ValidationError,
};
pub use extension::{registration, ExtensionRegistration, ExtensionRegistry};
pub use fingerprint::{ad_key, dom_fingerprint, string_hash32, ElementNode};
pub use host::{
    AnalyticsHandle, AnalyticsInjector, Collaborators, CreativeFrame, IdentitySource, RenderHost,
    ResponsivePlacement,
};
pub use identity::IdentityTokenFetcher;
pub use placement::PlacementConfig;
pub use request::{RequestBuilder, RequestParams};
pub use response::ResponseDirectives;
pub use verifier::{CreativeVerifier, SandboxPolicy};
