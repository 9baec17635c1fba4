//! The monitor contract: a named probe capability and the context that
//! bounds a single check.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::CheckError;

/// Opaque, provider-shaped payload returned by a successful check.
///
/// The shape varies per provider (the TCP provider returns the joined
/// `host:port` string, the DNS provider an object with answers and latency,
/// the HTTP provider the raw response). Callers must not assume a common
/// schema beyond "present on success".
pub type CheckResult = serde_json::Value;

/// A named probe capability.
///
/// Implementations are constructed once and invoked many times; `check` is
/// one synchronous, best-effort probe with no internal retries. Distinct
/// instances are safe to check concurrently; providers that lazily cache a
/// client guard it internally so concurrent checks on one instance at worst
/// reconnect redundantly.
#[async_trait::async_trait]
pub trait Monitor: Send + Sync {
    /// Stable identifier of the provider kind, e.g. `"http"` or `"tcp"`.
    /// Used for labeling, never for dispatch.
    fn name(&self) -> &'static str;

    /// Perform one probe, bounded by `cx`.
    ///
    /// Misconfiguration returns [`CheckError::Config`] before any network
    /// I/O; it never panics.
    async fn check(&self, cx: &CheckContext) -> Result<CheckResult, CheckError>;
}

/// Cancellation and deadline carrier for a single check.
///
/// Every network suspension point inside a provider is raced against this
/// context: cancellation yields [`CheckError::Cancelled`] and an elapsed
/// deadline [`CheckError::DeadlineExceeded`], both promptly, never the
/// backend's own success value.
#[derive(Debug, Clone)]
pub struct CheckContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CheckContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckContext {
    /// Context with no deadline; cancellable via [`CheckContext::cancel`].
    pub fn new() -> Self {
        CheckContext {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        CheckContext {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Context tied to an externally owned cancellation token.
    pub fn with_token(cancel: CancellationToken) -> Self {
        CheckContext {
            cancel,
            deadline: None,
        }
    }

    /// Replace the deadline, keeping the cancellation token.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort the check this context bounds.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once [`cancel`](CheckContext::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline. `None` means unbounded; `Some(0)` means
    /// already expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Run `fut` bounded by this context and a provider default timeout.
    ///
    /// The effective deadline is the earlier of the context deadline and
    /// `now + default_timeout`; providers pass their fixed fallback (e.g.
    /// 5 s dial timeout) so a caller that sets no deadline still cannot
    /// block indefinitely.
    pub async fn run<T, F>(&self, default_timeout: Duration, fut: F) -> Result<T, CheckError>
    where
        F: Future<Output = Result<T, CheckError>>,
    {
        let fallback = Instant::now() + default_timeout;
        let deadline = match self.deadline {
            Some(d) if d < fallback => d,
            _ => fallback,
        };

        if self.cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(CheckError::Cancelled),
            res = tokio::time::timeout_at(deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(CheckError::DeadlineExceeded),
            },
        }
    }
}
