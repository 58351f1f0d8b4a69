//! Pre-defined page scenarios.
//!
//! Each scenario sets up slots on a fresh harness, drives them and records
//! what happened so [`Scenario::verify`] can check the outcome.

use adslot_types::{ConsentState, ConsentTuple, ContainerType, CreativeMeta, FetchResponse, Size};
use thiserror::Error;

use crate::harness::{HarnessResult, PageHarness};
use crate::mocks::MockRenderHost;

/// Errors from scenario verification.
#[derive(Debug, Error)]
pub enum ScenarioFailure {
    /// Request URL missing a parameter or carrying the wrong value
    #[error("Parameter {name}: expected {expected:?}, got {actual:?}")]
    Parameter {
        name: String,
        expected: Option<String>,
        actual: Option<String>,
    },
    /// Wrong number of render-start signals
    #[error("Render start fired {0} times")]
    RenderStart(usize),
    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for scenario verification.
pub type ScenarioVerifyResult = Result<(), ScenarioFailure>;

/// What a scenario observed.
#[derive(Debug, Clone, Default)]
pub struct ScenarioResult {
    /// Request URLs in issue order
    pub urls: Vec<String>,
    /// Render-start signals received
    pub render_starts: usize,
    /// Registered slots at the end
    pub active_slots: usize,
}

impl ScenarioResult {
    /// Value of a query parameter in the n-th URL.
    pub fn param(&self, request: usize, name: &str) -> Option<String> {
        let url = self.urls.get(request)?;
        let (_, query) = url.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then(|| value.to_string())
        })
    }
}

/// Scenarios
#[derive(Debug, Clone, PartialEq)]
pub enum Scenario {
    /// One 300x250 slot with sufficient consent
    SinglePlacement,
    /// N slots requested one after another on the same page
    SequentialSlots(usize),
    /// A slot inside a sticky container whose frame signals readiness
    StickyRenderStart,
}

impl Scenario {
    pub async fn run(&self, harness: &mut PageHarness) -> HarnessResult<ScenarioResult> {
        let consent = ConsentTuple::new(ConsentState::Sufficient);
        let mut result = ScenarioResult::default();

        match self {
            Scenario::SinglePlacement => {
                let slot = harness.add_slot(placement("ca-pub-123"));
                harness.build(slot).await?;
                let url = harness.request_url(slot, &consent).await?;
                result.urls.push(url.as_str().to_string());
            }
            Scenario::SequentialSlots(count) => {
                let formats = [Size::new(300, 250), Size::new(728, 90), Size::new(320, 50)];
                for n in 0..*count {
                    let size = formats[n % formats.len()];
                    let slot = harness.add_slot(placement("ca-pub-123").with_layout_box(size));
                    harness.build(slot).await?;
                    let url = harness.request_url(slot, &consent).await?;
                    result.urls.push(url.as_str().to_string());
                }
            }
            Scenario::StickyRenderStart => {
                let host = placement("ca-pub-123").with_container(ContainerType::StickyAd);
                let slot = harness.add_slot(host);
                harness.run_to_render(slot, &consent, Some(&CreativeMeta::default())).await?;

                let slot_ref = harness.slot_mut(slot)?;
                slot_ref.controller.let_creative_trigger_render_start();
                let frame_id = slot_ref.controller.frame_id().unwrap_or_default();
                if let Some(url) = slot_ref.host.requests().first() {
                    result.urls.push(url.clone());
                }

                let ready = harness.config().sticky_ready_message.clone();
                harness.post_message("google_ads_iframe_other", &ready);
                harness.post_message(&frame_id, &ready);
                harness.post_message(&frame_id, &ready);
                result.render_starts = harness.slot(slot)?.host.render_started_count();
            }
        }

        result.active_slots = harness.active_slots();
        Ok(result)
    }

    pub fn verify(&self, result: &ScenarioResult) -> ScenarioVerifyResult {
        match self {
            Scenario::SinglePlacement => {
                expect_param(result, 0, "client", Some("ca-pub-123"))?;
                expect_param(result, 0, "format", Some("300x250"))?;
                expect_param(result, 0, "pv", Some("1"))?;
                expect_param(result, 0, "npa", None)?;
                Ok(())
            }
            Scenario::SequentialSlots(count) => {
                for n in 0..*count {
                    expect_param(result, n, "pv", Some((n + 1).to_string().as_str()))?;
                }
                if *count > 1 {
                    expect_param(result, 1, "prev_fmts", Some("300x250"))?;
                }
                if result.active_slots != *count {
                    return Err(ScenarioFailure::InvalidState(format!(
                        "{} slots registered, expected {}",
                        result.active_slots, count
                    )));
                }
                Ok(())
            }
            Scenario::StickyRenderStart => {
                if result.render_starts != 1 {
                    return Err(ScenarioFailure::RenderStart(result.render_starts));
                }
                expect_param(result, 0, "sac", Some("1"))
            }
        }
    }
}

fn placement(client: &str) -> MockRenderHost {
    MockRenderHost::new()
        .with_client(client)
        .with_response(FetchResponse::default())
}

fn expect_param(
    result: &ScenarioResult,
    request: usize,
    name: &str,
    expected: Option<&str>,
) -> ScenarioVerifyResult {
    let actual = result.param(request, name);
    if actual.as_deref() == expected {
        Ok(())
    } else {
        Err(ScenarioFailure::Parameter {
            name: name.to_string(),
            expected: expected.map(String::from),
            actual,
        })
    }
}
