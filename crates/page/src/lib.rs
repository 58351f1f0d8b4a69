//! Page-wide shared state for ad slot controllers
//!
//! Every slot on a page shares:
//! - **SharedSlotRegistry**: page-view counters and the formats/slot names of
//!   the currently registered slots, per network and client scope
//! - **ExperimentDiverter**: write-once experiment branch assignments
//! - **FrameMessageBus**: messages posted by rendered frames, consumed through
//!   one-shot subscriptions
//! - the identity token fetch, started by the first slot that builds
//!
//! All of it hangs off a [`PageContext`] that is created once per page and
//! passed into each controller, so tests can build an isolated page instead
//! of resetting globals.
//!
//! ## Example
//!
//! ```rust
//! use adslot_page::{PageContext, PageOptions};
//! use adslot_types::SlotId;
//!
//! let page = PageContext::new(PageOptions::default());
//!
//! let first = page.with_registry("adsense", |registry| {
//!     registry.add_new_slot("300x250", &SlotId("0123".into()), "ca-pub-1", "top")
//! }).unwrap();
//! assert_eq!(first.pv, 1);
//!
//! let second = page.with_registry("adsense", |registry| {
//!     registry.add_new_slot("728x90", &SlotId("1456".into()), "ca-pub-1", "")
//! }).unwrap();
//! assert_eq!(second.prev_formats, vec!["300x250".to_string()]);
//! ```

pub mod context;
pub mod experiment;
pub mod messages;
pub mod registry;


pub use context::{PageContext, PageOptions, SharedIdentityToken};
pub use experiment::{
    size_from_attributes_experiment, ExperimentDiverter, ExperimentError, ExperimentInfo,
    SlotAttributes, SlotExperiments, SIZE_CONTROL_BRANCH, SIZE_EXPERIMENT_BRANCH,
    SIZE_FROM_ATTRIBUTES,
};
pub use messages::{FrameMessageBus, Subscription};
pub use registry::{RegistryError, SharedSlotParams, SharedSlotRegistry};
