//! # Ad Slot Simulation Crate
//!
//! Deterministic page simulation for testing ad slot controllers without a
//! browser, a network or an identity service.
//!
//! ## Features
//!
//! - **Recording mocks**: every collaborator call is captured for assertions
//! - **Scripted responses**: queue creatives, headers and network failures
//! - **Deterministic timing**: identity waits run under `tokio::time::pause()`
//! - **Reusable scenarios**: pre-built multi-slot page flows
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use adslot_simulation::{PageHarness, Scenario};
//!
//! #[tokio::test]
//! async fn test_sequential_slots() {
//!     let mut harness = PageHarness::new();
//!     let result = Scenario::SequentialSlots(3).run(&mut harness).await.unwrap();
//!     Scenario::SequentialSlots(3).verify(&result).unwrap();
//! }
//! ```

pub mod harness;
pub mod mocks;
pub mod scenarios;

pub use harness::{HarnessError, HarnessResult, PageHarness, SimulatedSlot, SlotSetup};
pub use scenarios::{Scenario, ScenarioFailure, ScenarioResult, ScenarioVerifyResult};
