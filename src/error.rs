//! Broker error types with retryability classification.
//!
//! Two tiers of failure are distinguished:
//! - **Resolution errors**: missing or invalid configuration, discovery
//!   failures. Fatal to the call; the caller must fix config or wait for the
//!   discovery system to recover.
//! - **Transport errors**: dial failures, timeouts, RPC status codes.
//!   Transient; candidates for call-level retry.

use snafu::{Location, Snafu};
use tonic::Code;

use crate::config::Protocol;

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors returned by the connection broker.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BrokerError {
    /// No configuration registered for the requested service.
    #[snafu(display("no configuration found for service '{service}'"))]
    ConfigNotFound {
        /// The service name that was looked up.
        service: String,
    },

    /// Configuration exists but its protocol kind is not gRPC.
    #[snafu(display("service '{service}' is configured for protocol '{protocol}', expected grpc"))]
    InvalidProtocol {
        /// The service whose config was rejected.
        service: String,
        /// The mismatching protocol kind.
        protocol: Protocol,
    },

    /// The discovery system was unreachable or misconfigured at resolution time.
    #[snafu(display("resolver initialization failed for service '{service}': {message}"))]
    ResolverInit {
        /// The service being resolved.
        service: String,
        /// Failure description from the discovery integration.
        message: String,
    },

    /// Transport-level connect failure or dial timeout.
    #[snafu(display("dial failed for target '{target}' at {location}: {message}"))]
    DialFailed {
        /// The connection target that could not be reached.
        target: String,
        /// Underlying transport error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Endpoint URL failed validation.
    #[snafu(display("invalid target '{target}': {message}"))]
    InvalidTarget {
        /// The rejected URL.
        target: String,
        /// Validation failure description.
        message: String,
    },

    /// Configuration validation error.
    #[snafu(display("configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// gRPC call error with status code.
    #[snafu(display("rpc error (code={code:?}): {message}"))]
    Rpc {
        /// gRPC status code.
        code: Code,
        /// Error message from the server.
        message: String,
    },

    /// A call attempt exceeded its per-attempt timeout budget.
    #[snafu(display("operation timed out after {duration_ms}ms"))]
    Timeout {
        /// Timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// The caller cancelled while the operation was in flight.
    #[snafu(display("operation cancelled"))]
    Cancelled,

    /// Call-level retry attempts exhausted.
    #[snafu(display("retry exhausted after {attempts} attempts: {last_error}"))]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last error message before giving up.
        last_error: String,
    },
}

impl BrokerError {
    /// Returns true if the error is transient and the operation may be retried.
    ///
    /// Retryable: dial failures, per-attempt timeouts, discovery outages, and
    /// the transient gRPC codes (`UNAVAILABLE`, `DEADLINE_EXCEEDED`,
    /// `RESOURCE_EXHAUSTED`, `ABORTED`).
    ///
    /// Non-retryable: configuration errors, protocol mismatches, cancellation,
    /// and exhausted retries.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DialFailed { .. } => true,
            Self::Timeout { .. } => true,
            Self::ResolverInit { .. } => true,
            Self::Rpc { code, .. } => matches!(
                code,
                Code::Unavailable
                    | Code::DeadlineExceeded
                    | Code::ResourceExhausted
                    | Code::Aborted
            ),
            Self::ConfigNotFound { .. } => false,
            Self::InvalidProtocol { .. } => false,
            Self::InvalidTarget { .. } => false,
            Self::Config { .. } => false,
            Self::Cancelled => false,
            Self::RetryExhausted { .. } => false,
        }
    }

    /// Returns a stable label for this error class, used in metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "config_not_found",
            Self::InvalidProtocol { .. } => "invalid_protocol",
            Self::ResolverInit { .. } => "resolver_init",
            Self::DialFailed { .. } => "dial_failed",
            Self::InvalidTarget { .. } => "invalid_target",
            Self::Config { .. } => "config",
            Self::Rpc { .. } => "rpc",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::RetryExhausted { .. } => "retry_exhausted",
        }
    }

    /// Returns the gRPC status code if this is an RPC error.
    #[must_use]
    pub fn code(&self) -> Option<Code> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<tonic::Status> for BrokerError {
    fn from(status: tonic::Status) -> Self {
        Self::Rpc { code: status.code(), message: status.message().to_owned() }
    }
}
