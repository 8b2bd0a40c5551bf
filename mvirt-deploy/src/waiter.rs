//! Bounded polling for resources that become usable only after async
//! provider work (NAT gateways, instances, load balancers).

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, ProviderError, Result};

/// What a single poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    /// The resource reached the target state.
    Ready,
    /// Still transitioning; carries the observed state.
    Pending(String),
    /// The resource entered a failure state.
    Failed(String),
}

/// A bounded-time poll loop.
#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    timeout: Duration,
    interval: Duration,
}

impl Waiter {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Poll until ready.
    ///
    /// Returns `NotYetAvailable` (retryable) when the timeout elapses while
    /// still pending, and a provider error when the resource failed.
    pub async fn wait<F, Fut>(&self, what: &str, mut poll: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollState>>,
    {
        let started = Instant::now();
        loop {
            match poll().await? {
                PollState::Ready => return Ok(()),
                PollState::Failed(state) => {
                    return Err(Error::Provider(ProviderError::new(
                        "ResourceFailed",
                        format!("{} entered state {}", what, state),
                    )));
                }
                PollState::Pending(state) => {
                    if started.elapsed() >= self.timeout {
                        return Err(Error::NotYetAvailable(format!(
                            "{} still {} after {:?}",
                            what, state, self.timeout
                        )));
                    }
                    debug!("Waiting for {} (state {})", what, state);
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}
