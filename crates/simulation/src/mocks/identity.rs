//! Mock identity source with configurable latency and failure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use adslot_controller::error::IdentityResult;
use adslot_controller::{IdentityError, IdentitySource};
use adslot_types::IdentityToken;
use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Debug, Clone)]
enum Behavior {
    Respond(IdentityToken),
    Fail(IdentityError),
    Hang,
}

/// Mock IdentitySource for simulation testing.
#[derive(Debug)]
pub struct MockIdentitySource {
    behavior: Behavior,
    latency: Option<Duration>,
    calls: AtomicUsize,
    policies: Mutex<Vec<Option<String>>>,
}

impl Default for MockIdentitySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIdentitySource {
    /// Source that answers immediately with an empty token.
    pub fn new() -> Self {
        Self {
            behavior: Behavior::Respond(IdentityToken::empty()),
            latency: None,
            calls: AtomicUsize::new(0),
            policies: Mutex::new(Vec::new()),
        }
    }

    /// Answer with the given token.
    pub fn with_token(mut self, token: IdentityToken) -> Self {
        self.behavior = Behavior::Respond(token);
        self
    }

    /// Fail every fetch.
    pub fn with_failure(mut self, error: IdentityError) -> Self {
        self.behavior = Behavior::Fail(error);
        self
    }

    /// Never settle.
    pub fn never_resolving(mut self) -> Self {
        self.behavior = Behavior::Hang;
        self
    }

    /// Configure simulated fetch latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of fetches started.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Consent policies passed to each fetch.
    pub fn policies(&self) -> Vec<Option<String>> {
        self.policies.lock().clone()
    }
}

#[async_trait]
impl IdentitySource for MockIdentitySource {
    async fn fetch(&self, consent_policy: Option<&str>) -> IdentityResult<IdentityToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.policies.lock().push(consent_policy.map(String::from));

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match &self.behavior {
            Behavior::Respond(token) => Ok(token.clone()),
            Behavior::Fail(error) => Err(error.clone()),
            Behavior::Hang => std::future::pending().await,
        }
    }
}
