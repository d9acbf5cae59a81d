//! Dial options and the interceptor chain builder.
//!
//! [`DialOptions::assemble`] is a pure function of a service's retry policy
//! and the process-wide feature toggles. It produces the ordered layer list
//! applied to calls on the dialed connection:
//!
//! 1. Metrics (when toggled on): outermost, so instrumentation sees the
//!    full call including tracing overhead.
//! 2. Tracing (when toggled on): next, so spans cover the retried call.
//! 3. Retry: always present, innermost.
//!
//! The options also carry [`TransportOptions`]: connection-level settings
//! (connect timeout, keepalives) applied when the endpoint is dialed.
//! Transport is insecure by default, plain `http://` with no TLS. That is
//! the current policy for in-cluster traffic, not an omission.

use std::time::Duration;

use tonic::service::Interceptor;

use crate::{
    config::{FeatureToggles, RetryPolicy, ServiceConfig},
    metrics::MetricsInterceptor,
    trace::TraceInterceptor,
};

/// HTTP/2 keep-alive interval for idle connections.
const HTTP2_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// HTTP/2 keep-alive timeout.
const HTTP2_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP keepalive interval.
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// One cross-cutting layer in the call chain, in application order.
#[derive(Debug, Clone, PartialEq)]
pub enum CallLayer {
    /// Per-request metrics instrumentation.
    Metrics,
    /// W3C trace context propagation.
    Tracing,
    /// Call-level retry with per-attempt timeout budget.
    Retry(RetryPolicy),
}

/// Connection-level transport settings applied at dial time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Maximum time for connection establishment.
    pub connect_timeout: Duration,
    /// TCP keepalive interval.
    pub tcp_keepalive: Duration,
    /// HTTP/2 keep-alive ping interval.
    pub http2_keepalive_interval: Duration,
    /// HTTP/2 keep-alive ping timeout.
    pub http2_keepalive_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            tcp_keepalive: TCP_KEEPALIVE_INTERVAL,
            http2_keepalive_interval: HTTP2_KEEPALIVE_INTERVAL,
            http2_keepalive_timeout: HTTP2_KEEPALIVE_TIMEOUT,
        }
    }
}

/// Ordered, immutable bundle of call layers and transport settings for one
/// dial attempt.
///
/// Not cached anywhere: rebuilt from the config and the toggles on every
/// dial that misses the connection cache, so toggle changes take effect on
/// the next new connection.
#[derive(Debug, Clone, PartialEq)]
pub struct DialOptions {
    layers: Vec<CallLayer>,
    transport: TransportOptions,
}

impl DialOptions {
    /// Assembles dial options from a service config and the feature toggles.
    ///
    /// Pure function: equal inputs produce equal options. Layer order is
    /// significant and fixed: metrics, then tracing, then retry.
    #[must_use]
    pub fn assemble(config: &ServiceConfig, toggles: FeatureToggles) -> Self {
        let mut layers = Vec::with_capacity(3);
        if toggles.metrics {
            layers.push(CallLayer::Metrics);
        }
        if toggles.tracing {
            layers.push(CallLayer::Tracing);
        }
        layers.push(CallLayer::Retry(config.retry_policy().clone()));

        let transport =
            TransportOptions { connect_timeout: config.dial_timeout(), ..Default::default() };

        Self { layers, transport }
    }

    /// Returns the ordered layer list, outermost first.
    #[must_use]
    pub fn layers(&self) -> &[CallLayer] {
        &self.layers
    }

    /// Returns the call retry policy.
    ///
    /// The retry layer is always assembled; a missing layer yields the
    /// default policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.layers
            .iter()
            .find_map(|layer| match layer {
                CallLayer::Retry(policy) => Some(policy.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Returns the transport settings.
    #[must_use]
    pub fn transport(&self) -> &TransportOptions {
        &self.transport
    }

    /// Composes the request-level layers into one tonic interceptor.
    ///
    /// Only metrics and tracing are request interceptors; the retry layer
    /// wraps whole calls and is applied via
    /// [`Connection::run`](crate::Connection::run) instead.
    #[must_use]
    pub fn interceptor(&self, service: &str) -> ChainInterceptor {
        let stages = self
            .layers
            .iter()
            .filter_map(|layer| match layer {
                CallLayer::Metrics => Some(Stage::Metrics(MetricsInterceptor::new(service))),
                CallLayer::Tracing => Some(Stage::Tracing(TraceInterceptor::new())),
                CallLayer::Retry(_) => None,
            })
            .collect();
        ChainInterceptor { stages }
    }
}

/// A materialized request-level stage of the chain.
#[derive(Debug, Clone)]
enum Stage {
    Metrics(MetricsInterceptor),
    Tracing(TraceInterceptor),
}

/// Composite tonic [`Interceptor`] applying the chain's request-level stages
/// in assembly order.
#[derive(Debug, Clone)]
pub struct ChainInterceptor {
    stages: Vec<Stage>,
}

impl ChainInterceptor {
    /// Returns the number of request-level stages in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the chain has no request-level stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Interceptor for ChainInterceptor {
    fn call(
        &mut self,
        mut request: tonic::Request<()>,
    ) -> std::result::Result<tonic::Request<()>, tonic::Status> {
        for stage in &mut self.stages {
            request = match stage {
                Stage::Metrics(interceptor) => interceptor.call(request)?,
                Stage::Tracing(interceptor) => interceptor.call(request)?,
            };
        }
        Ok(request)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::CallType;

    fn config_with_retry(max_attempts: u32, per_attempt: Duration) -> ServiceConfig {
        ServiceConfig::builder()
            .with_service_name("orders")
            .with_call_type(CallType::Local)
            .with_endpoint("http://localhost:50051")
            .with_retry_policy(RetryPolicy {
                max_attempts,
                per_attempt_timeout: per_attempt,
                ..Default::default()
            })
            .build()
            .expect("valid config")
    }

    #[test]
    fn metrics_on_tracing_off_yields_metrics_then_retry() {
        let config = config_with_retry(3, Duration::from_millis(500));
        let toggles = FeatureToggles { metrics: true, tracing: false };

        let options = DialOptions::assemble(&config, toggles);

        let expected_retry = RetryPolicy {
            max_attempts: 3,
            per_attempt_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(options.layers(), &[CallLayer::Metrics, CallLayer::Retry(expected_retry)]);
    }

    #[test]
    fn all_toggles_on_yields_full_chain_in_order() {
        let config = config_with_retry(2, Duration::from_millis(250));
        let options = DialOptions::assemble(&config, FeatureToggles::all());

        assert_eq!(options.layers().len(), 3);
        assert_eq!(options.layers()[0], CallLayer::Metrics);
        assert_eq!(options.layers()[1], CallLayer::Tracing);
        assert!(matches!(options.layers()[2], CallLayer::Retry(_)));
    }

    #[test]
    fn all_toggles_off_yields_retry_only() {
        let config = config_with_retry(1, Duration::from_secs(1));
        let options = DialOptions::assemble(&config, FeatureToggles::none());

        assert_eq!(options.layers().len(), 1);
        assert!(matches!(options.layers()[0], CallLayer::Retry(_)));
    }

    #[test]
    fn assemble_is_pure() {
        let config = config_with_retry(3, Duration::from_millis(500));
        let toggles = FeatureToggles::all();
        assert_eq!(
            DialOptions::assemble(&config, toggles),
            DialOptions::assemble(&config, toggles)
        );
    }

    #[test]
    fn retry_policy_accessor_returns_config_policy() {
        let config = config_with_retry(7, Duration::from_millis(123));
        let options = DialOptions::assemble(&config, FeatureToggles::none());

        let policy = options.retry_policy();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.per_attempt_timeout, Duration::from_millis(123));
    }

    #[test]
    fn transport_carries_dial_timeout_as_connect_timeout() {
        let config = ServiceConfig::builder()
            .with_service_name("orders")
            .with_endpoint("http://localhost:50051")
            .with_dial_timeout(Duration::from_millis(750))
            .build()
            .expect("valid config");

        let options = DialOptions::assemble(&config, FeatureToggles::none());
        assert_eq!(options.transport().connect_timeout, Duration::from_millis(750));
    }

    #[test]
    fn interceptor_stage_count_matches_toggles() {
        let config = config_with_retry(3, Duration::from_millis(500));

        let none = DialOptions::assemble(&config, FeatureToggles::none());
        assert!(none.interceptor("orders").is_empty());

        let metrics_only =
            DialOptions::assemble(&config, FeatureToggles { metrics: true, tracing: false });
        assert_eq!(metrics_only.interceptor("orders").len(), 1);

        let all = DialOptions::assemble(&config, FeatureToggles::all());
        assert_eq!(all.interceptor("orders").len(), 2);
    }

    #[test]
    fn chain_interceptor_passes_request_through() {
        let config = config_with_retry(3, Duration::from_millis(500));
        let options = DialOptions::assemble(&config, FeatureToggles::all());
        let mut interceptor = options.interceptor("orders");

        let request = tonic::Request::new(());
        let result = interceptor.call(request).expect("chain should succeed");

        // The tracing stage ran: trace context was injected.
        assert!(result.metadata().get("traceparent").is_some());
    }
}
