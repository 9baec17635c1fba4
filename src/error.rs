//! Error taxonomy shared by every provider.
//!
//! Variants are grouped by cause, not by backend: configuration problems
//! surface before any network I/O, connectivity and protocol failures carry
//! the probed target, and context outcomes (cancel/deadline) stay distinct
//! from connectivity errors so callers can tell them apart.

/// Boxed error type used to wrap backend client errors without losing them.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned by [`Monitor::check`](crate::Monitor::check).
///
/// A check never retries internally and never downgrades a failure to a
/// success; every failure path produces exactly one of these.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// Missing or invalid provider configuration, detected before any
    /// network call (malformed address, bad PEM material, empty field).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The backend could not be reached.
    #[error("failed to {operation} {target}: {source}")]
    Connect {
        /// Short verb phrase naming the attempted operation ("connect to",
        /// "ping", "send request to").
        operation: &'static str,
        /// Address or URL of the probed backend.
        target: String,
        #[source]
        source: BoxError,
    },

    /// The backend was reachable but reported a failure of its own
    /// (empty DNS answer, CONNACK refusal, unknown RPC method).
    #[error("{0}")]
    Protocol(String),

    /// Authentication machinery failed, e.g. the OAuth2 token endpoint
    /// rejected the client-credentials exchange.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The caller cancelled the check before the probe finished.
    #[error("check cancelled")]
    Cancelled,

    /// The caller-supplied deadline (or the provider default timeout)
    /// elapsed mid-probe.
    #[error("check deadline exceeded")]
    DeadlineExceeded,
}

impl CheckError {
    /// Convenience constructor for [`CheckError::Connect`].
    pub fn connect(
        operation: &'static str,
        target: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        CheckError::Connect {
            operation,
            target: target.into(),
            source: source.into(),
        }
    }

    /// True for the two context-driven outcomes.
    pub fn is_context(&self) -> bool {
        matches!(self, CheckError::Cancelled | CheckError::DeadlineExceeded)
    }
}
