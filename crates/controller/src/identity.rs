//! Identity token fetch with a bounded wait
//!
//! The first slot to build on a page starts the fetch; every other slot on
//! the page joins it. Request assembly races it against a timeout; on
//! timeout or failure the request proceeds with an empty token. The
//! underlying fetch is not cancelled by a timeout and later waiters see its
//! result.

use crate::host::IdentitySource;
use adslot_page::{PageContext, SharedIdentityToken};
use adslot_types::IdentityToken;
use futures::future::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of racing a future against a deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceOutcome<T> {
    Completed(T),
    TimedOut,
}

/// Race a future against a timeout without cancelling shared work
pub async fn race_with_timeout<F>(future: F, limit: Duration) -> RaceOutcome<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        output = future => RaceOutcome::Completed(output),
        _ = tokio::time::sleep(limit) => RaceOutcome::TimedOut,
    }
}

/// A controller's handle on the page identity token fetch
#[derive(Default)]
pub struct IdentityTokenFetcher {
    pending: Option<SharedIdentityToken>,
}

impl IdentityTokenFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the page's fetch, starting it if no slot has yet
    ///
    /// The source is only called once the page has been visible.
    pub fn start(
        &mut self,
        page: Arc<PageContext>,
        source: Arc<dyn IdentitySource>,
        consent_policy: Option<String>,
    ) {
        if self.pending.is_some() {
            return;
        }

        let pending = page.identity_token(|| {
            let first_visible = page.when_first_visible();
            async move {
                first_visible.await;
                match source.fetch(consent_policy.as_deref()).await {
                    Ok(token) => {
                        debug!(empty = token.is_empty(), "Identity token fetched");
                        token
                    }
                    Err(e) => {
                        warn!(error = %e, "Identity token fetch failed");
                        IdentityToken::empty()
                    }
                }
            }
            .boxed()
        });
        self.pending = Some(pending);
    }

    pub fn is_started(&self) -> bool {
        self.pending.is_some()
    }

    /// Token if the fetch has already settled
    pub fn peek(&self) -> Option<IdentityToken> {
        self.pending.as_ref().and_then(|pending| pending.peek().cloned())
    }

    /// Wait at most `limit` for the token
    pub async fn token_within(&self, limit: Duration) -> IdentityToken {
        let Some(pending) = self.pending.clone() else {
            debug!("Identity fetch never started");
            return IdentityToken::empty();
        };

        match race_with_timeout(pending, limit).await {
            RaceOutcome::Completed(token) => token,
            RaceOutcome::TimedOut => {
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "Identity token wait timed out, requesting without it"
                );
                IdentityToken::empty()
            }
        }
    }
}
