//! Per-service configuration and the config provider contract.
//!
//! A [`ServiceConfig`] describes one remote service: which protocol it
//! speaks, how its address is resolved ([`CallType`]), how long a dial may
//! take, and how individual calls over the established connection are
//! retried. Configs are produced by an external [`ConfigProvider`]; the
//! broker never mutates them.

use std::{collections::HashMap, fmt, time::Duration};

use snafu::ensure;

use crate::error::{ConfigSnafu, InvalidTargetSnafu, Result};

/// Default dial timeout (5 seconds).
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-attempt call timeout (1 second).
const DEFAULT_PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default backoff between call retry attempts (100 milliseconds).
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Protocol kind a service is configured for.
///
/// The broker only establishes gRPC connections; configs carrying any other
/// kind are rejected with `InvalidProtocol` before a dial is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// gRPC over HTTP/2. The only kind this broker dials.
    #[default]
    Grpc,
    /// Plain HTTP. Present in shared config records, not dialable here.
    Http,
    /// Thrift RPC. Present in shared config records, not dialable here.
    Thrift,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grpc => write!(f, "grpc"),
            Self::Http => write!(f, "http"),
            Self::Thrift => write!(f, "thrift"),
        }
    }
}

/// How a service's network address is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallType {
    /// Statically configured endpoint or client-side balancer target.
    Local,
    /// Address resolved through the service-discovery integration.
    Discovery,
    /// Call type absent or unrecognized in the config record.
    ///
    /// Dials via the local strategy. This is a deliberate, documented
    /// fallback so that records written before the call-type field existed
    /// keep working; see [`DialStrategy::for_call_type`](crate::DialStrategy::for_call_type).
    #[default]
    Unspecified,
}

impl CallType {
    /// Parses a call type from its config-record string form.
    ///
    /// Unrecognized values map to [`CallType::Unspecified`] rather than
    /// failing, matching the fallback dial behavior.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "local" => Self::Local,
            "discovery" => Self::Discovery,
            _ => Self::Unspecified,
        }
    }
}

/// Retry policy applied to calls made over an established connection.
///
/// Governs *calls*, not the dial itself: each attempt gets its own timeout
/// budget, so total call latency is not bounded by the dial timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the initial one.
    pub max_attempts: u32,

    /// Timeout budget for each individual attempt.
    pub per_attempt_timeout: Duration,

    /// Base backoff between attempts.
    pub backoff: Duration,

    /// Jitter factor (0.0 to 1.0) randomizing the backoff.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            per_attempt_timeout: DEFAULT_PER_ATTEMPT_TIMEOUT,
            backoff: DEFAULT_RETRY_BACKOFF,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy that makes a single attempt and never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Default::default() }
    }
}

/// Configuration record for one remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Logical service name, the unique lookup key.
    service_name: String,

    /// Protocol kind the service speaks.
    protocol: Protocol,

    /// How the service's address is resolved.
    call_type: CallType,

    /// Static endpoint URL or balancer target, for the local strategy.
    endpoint: Option<String>,

    /// Name registered with the discovery system, when it differs from
    /// the logical service name.
    discovery_name: Option<String>,

    /// Maximum time allowed for connection establishment.
    dial_timeout: Duration,

    /// Retry policy for calls over the established connection.
    retry: RetryPolicy,
}

impl ServiceConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Returns the logical service name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the configured protocol kind.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns the call type selecting the dial strategy.
    #[must_use]
    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    /// Returns the static endpoint, if one is configured.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Returns the name used with the discovery system.
    ///
    /// Falls back to the logical service name when no explicit discovery
    /// name is configured.
    #[must_use]
    pub fn discovery_name(&self) -> &str {
        self.discovery_name.as_deref().unwrap_or(&self.service_name)
    }

    /// Returns the dial timeout.
    #[must_use]
    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    /// Returns the call retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    service_name: Option<String>,
    protocol: Protocol,
    call_type: CallType,
    endpoint: Option<String>,
    discovery_name: Option<String>,
    dial_timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
}

impl ServiceConfigBuilder {
    /// Sets the logical service name. Required.
    #[must_use]
    pub fn with_service_name<S: Into<String>>(mut self, name: S) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Sets the protocol kind.
    ///
    /// Default: [`Protocol::Grpc`].
    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the call type.
    ///
    /// Default: [`CallType::Unspecified`], which dials via the local strategy.
    #[must_use]
    pub fn with_call_type(mut self, call_type: CallType) -> Self {
        self.call_type = call_type;
        self
    }

    /// Sets the static endpoint URL for the local strategy.
    #[must_use]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets an explicit discovery name, when it differs from the service name.
    #[must_use]
    pub fn with_discovery_name<S: Into<String>>(mut self, name: S) -> Self {
        self.discovery_name = Some(name.into());
        self
    }

    /// Sets the dial timeout.
    ///
    /// Default: 5 seconds.
    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = Some(timeout);
        self
    }

    /// Sets the call retry policy.
    ///
    /// Default: [`RetryPolicy::default()`].
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Builds the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The service name is missing or empty
    /// - The dial timeout or per-attempt timeout is zero
    /// - The retry policy allows zero attempts
    /// - A configured endpoint URL is invalid
    /// - The call type requires a static endpoint but none is configured
    pub fn build(self) -> Result<ServiceConfig> {
        let service_name = self
            .service_name
            .ok_or_else(|| ConfigSnafu { message: "service_name is required" }.build())?;
        ensure!(!service_name.is_empty(), ConfigSnafu { message: "service_name cannot be empty" });

        let dial_timeout = self.dial_timeout.unwrap_or(DEFAULT_DIAL_TIMEOUT);
        ensure!(!dial_timeout.is_zero(), ConfigSnafu { message: "dial_timeout cannot be zero" });

        let retry = self.retry.unwrap_or_default();
        ensure!(
            retry.max_attempts >= 1,
            ConfigSnafu { message: "retry max_attempts must be at least 1" }
        );
        ensure!(
            !retry.per_attempt_timeout.is_zero(),
            ConfigSnafu { message: "per_attempt_timeout cannot be zero" }
        );

        if let Some(ref endpoint) = self.endpoint {
            validate_url(endpoint)?;
        }

        // Local and Unspecified both dial the static endpoint.
        if !matches!(self.call_type, CallType::Discovery) {
            ensure!(
                self.endpoint.is_some(),
                ConfigSnafu { message: "local call type requires an endpoint" }
            );
        }

        Ok(ServiceConfig {
            service_name,
            protocol: self.protocol,
            call_type: self.call_type,
            endpoint: self.endpoint,
            discovery_name: self.discovery_name,
            dial_timeout,
            retry,
        })
    }
}

/// Validates that a URL is well-formed HTTP(S).
pub(crate) fn validate_url(url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return InvalidTargetSnafu {
            target: url,
            message: "URL must start with http:// or https://",
        }
        .fail();
    }

    let rest = url.strip_prefix("http://").or_else(|| url.strip_prefix("https://")).unwrap_or("");

    if rest.is_empty() {
        return InvalidTargetSnafu { target: url, message: "URL must have a host" }.fail();
    }

    if rest.contains(char::is_whitespace) {
        return InvalidTargetSnafu { target: url, message: "URL cannot contain whitespace" }.fail();
    }

    Ok(())
}

/// Process-wide feature toggles, passed explicitly into the interceptor
/// chain builder so it stays a pure function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureToggles {
    /// Include metrics interceptors on dialed connections.
    pub metrics: bool,
    /// Include trace-propagation interceptors on dialed connections.
    pub tracing: bool,
}

impl FeatureToggles {
    /// All cross-cutting behaviors enabled.
    #[must_use]
    pub fn all() -> Self {
        Self { metrics: true, tracing: true }
    }

    /// All cross-cutting behaviors disabled.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

/// Supplies per-service configuration records.
///
/// The storage and loading mechanism behind this trait is external to the
/// broker; implementations may read from a config service, a file, or a
/// static map.
pub trait ConfigProvider: Send + Sync + fmt::Debug {
    /// Looks up the configuration for a service, `None` when unregistered.
    fn lookup(&self, service: &str) -> Option<ServiceConfig>;
}

/// Map-backed [`ConfigProvider`] for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticConfigProvider {
    configs: HashMap<String, ServiceConfig>,
}

impl StaticConfigProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a config, keyed by its service name.
    pub fn insert(&mut self, config: ServiceConfig) {
        self.configs.insert(config.service_name().to_owned(), config);
    }

    /// Registers a config, consuming and returning the provider.
    #[must_use]
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.insert(config);
        self
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn lookup(&self, service: &str) -> Option<ServiceConfig> {
        self.configs.get(service).cloned()
    }
}
