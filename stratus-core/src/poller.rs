//! Poller - Waiting for asynchronous remote operations
//!
//! Two flavors:
//! - [`await_completion`] drives a [`LongRunningOperation`] handle until it
//!   reaches a terminal status.
//! - [`StateWaiter`] repeatedly refreshes a resource and classifies each
//!   observation as pending or target, for APIs whose effects become
//!   visible only eventually.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::provider::{ErrorKind, ProviderError, ProviderResult};
use crate::resource::ResourceId;

/// Status reported by one poll of a long-running operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed(String),
    Canceled,
}

/// Handle to an operation the remote API executes asynchronously
#[async_trait]
pub trait LongRunningOperation: Send {
    async fn poll(&mut self) -> ProviderResult<OperationStatus>;

    /// Delay requested by the server before the next poll
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Operation that finished synchronously
#[derive(Debug, Clone, Copy, Default)]
pub struct Completed;

#[async_trait]
impl LongRunningOperation for Completed {
    async fn poll(&mut self) -> ProviderResult<OperationStatus> {
        Ok(OperationStatus::Succeeded)
    }
}

/// Poll `op` until it succeeds, fails or is canceled.
///
/// Unbounded by itself; callers wrap it in [`with_timeout`].
pub async fn await_completion(
    mut op: Box<dyn LongRunningOperation>,
    interval: Duration,
) -> ProviderResult<()> {
    loop {
        match op.poll().await? {
            OperationStatus::Succeeded => return Ok(()),
            OperationStatus::Failed(message) => {
                return Err(ProviderError::remote_failure(format!(
                    "long-running operation failed: {}",
                    message
                )));
            }
            OperationStatus::Canceled => {
                return Err(ProviderError::remote_failure(
                    "long-running operation was canceled",
                ));
            }
            OperationStatus::InProgress => {
                let delay = op.retry_after().unwrap_or(interval);
                log::debug!("Operation in progress, polling again in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Bound `fut` by `bound`, reporting which operation on which resource ran out of time
pub async fn with_timeout<T, F>(
    operation: &str,
    id: &ResourceId,
    bound: Duration,
    fut: F,
) -> ProviderResult<T>
where
    F: Future<Output = ProviderResult<T>>,
{
    match tokio::time::timeout(bound, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::timeout(format!(
            "{} did not complete within {}",
            operation,
            format_duration(bound)
        ))
        .for_resource(id.clone())),
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else if d.subsec_millis() == 0 {
        format!("{}s", secs)
    } else {
        format!("{:?}", d)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("timeout while waiting for state to become '{target}' (last state: '{last_state}', timeout: {timeout})")]
    Timeout {
        target: String,
        last_state: String,
        timeout: String,
    },

    #[error("unexpected state '{state}', wanted target '{target}'")]
    UnexpectedState { state: String, target: String },
}

impl From<WaitError> for ProviderError {
    fn from(e: WaitError) -> Self {
        let kind = match e {
            WaitError::Timeout { .. } => ErrorKind::Timeout,
            WaitError::UnexpectedState { .. } => ErrorKind::RemoteFailure,
        };
        ProviderError::new(kind, e.to_string()).with_cause(e)
    }
}

/// Whether a refreshed resource is still visible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Exists,
    Gone,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Exists => write!(f, "Exists"),
            Presence::Gone => write!(f, "NotFound"),
        }
    }
}

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Waits until a refreshed state is observed in `target`
/// `continuous_target_occurrence` times in a row.
///
/// Any pending observation resets the consecutive count.
#[derive(Debug, Clone)]
pub struct StateWaiter<S> {
    pub pending: Vec<S>,
    pub target: Vec<S>,
    pub timeout: Duration,
    /// Wait before the first refresh
    pub delay: Duration,
    /// Lower bound of the backoff between refreshes
    pub min_interval: Duration,
    /// Fixed interval between refreshes, replacing the backoff
    pub poll_interval: Option<Duration>,
    pub continuous_target_occurrence: u32,
}

impl<S> StateWaiter<S>
where
    S: PartialEq + fmt::Debug + Send,
{
    pub fn new(pending: Vec<S>, target: Vec<S>, timeout: Duration) -> Self {
        Self {
            pending,
            target,
            timeout,
            delay: Duration::ZERO,
            min_interval: Duration::ZERO,
            poll_interval: None,
            continuous_target_occurrence: 1,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_continuous_target_occurrence(mut self, count: u32) -> Self {
        self.continuous_target_occurrence = count.max(1);
        self
    }

    /// Refresh until the target is reached; returns the last refreshed value
    pub async fn wait<T, F, Fut>(&self, mut refresh: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<(T, S)>>,
    {
        let mut last_state: Option<String> = None;
        let outcome = tokio::time::timeout(
            self.timeout,
            self.refresh_until_target(&mut refresh, &mut last_state),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(WaitError::Timeout {
                target: self.describe_target(),
                last_state: last_state.unwrap_or_else(|| "none".to_string()),
                timeout: format_duration(self.timeout),
            }
            .into()),
        }
    }

    async fn refresh_until_target<T, F, Fut>(
        &self,
        refresh: &mut F,
        last_state: &mut Option<String>,
    ) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<(T, S)>>,
    {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut backoff = INITIAL_BACKOFF;
        let mut occurrences = 0u32;

        loop {
            let (value, state) = refresh().await?;
            log::debug!("Refreshed state: {:?}", state);
            *last_state = Some(format!("{:?}", state));

            if self.target.contains(&state) {
                occurrences += 1;
                if occurrences >= self.continuous_target_occurrence {
                    return Ok(value);
                }
            } else if self.pending.contains(&state) {
                occurrences = 0;
            } else {
                return Err(WaitError::UnexpectedState {
                    state: format!("{:?}", state),
                    target: self.describe_target(),
                }
                .into());
            }

            let wait = match self.poll_interval {
                Some(interval) => interval,
                None => {
                    let wait = backoff.max(self.min_interval).min(MAX_BACKOFF.max(self.min_interval));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    wait
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    fn describe_target(&self) -> String {
        self.target
            .iter()
            .map(|s| format!("{:?}", s))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
