//! Recording mock implementations of the controller's collaborators.

pub mod analytics;
pub mod frame;
pub mod host;
pub mod identity;
pub mod responsive;

pub use analytics::{InsertedAnalytics, MockAnalyticsInjector};
pub use frame::MockFrame;
pub use host::MockRenderHost;
pub use identity::MockIdentitySource;
pub use responsive::MockResponsivePlacement;
