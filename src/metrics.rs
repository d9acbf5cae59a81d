//! Broker-side metrics for observability.
//!
//! Provides a pluggable metrics trait ([`BrokerMetrics`]) with two
//! implementations:
//!
//! - [`NoopBrokerMetrics`]: zero-overhead default that discards everything.
//! - [`FacadeBrokerMetrics`]: forwards to the [`metrics`](https://docs.rs/metrics)
//!   crate facade, reaching whatever recorder is installed (Prometheus,
//!   StatsD, etc.).
//!
//! All metric names carry the `channel_broker_` prefix:
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `channel_broker_resolves_total` | Counter | `service`, `outcome` | Resolve calls by outcome |
//! | `channel_broker_dials_total` | Counter | `service`, `status` | Dial attempts by outcome |
//! | `channel_broker_dial_duration_seconds` | Histogram | `service` | Dial latency distribution |
//! | `channel_broker_cache_hits_total` | Counter | `service` | Connection cache hits |
//! | `channel_broker_requests_total` | Counter | `service` | Requests through instrumented connections |

use std::{fmt, sync::Arc, time::Duration};

use tonic::service::Interceptor;

/// Trait for broker-side metrics collection.
///
/// All methods have default no-op bodies, so implementations override only
/// what they care about. Implementations must be `Send + Sync`; the broker
/// shares one instance across all callers.
pub trait BrokerMetrics: Send + Sync + fmt::Debug {
    /// Records the outcome of a `resolve` call.
    ///
    /// - `service`: the logical service name.
    /// - `outcome`: `"ok"` or an error-class label.
    fn record_resolve(&self, service: &str, outcome: &str) {
        let _ = (service, outcome);
    }

    /// Records a completed dial attempt.
    fn record_dial(&self, service: &str, duration: Duration, success: bool) {
        let _ = (service, duration, success);
    }

    /// Records a connection cache hit.
    fn record_cache_hit(&self, service: &str) {
        let _ = service;
    }
}

/// No-op metrics implementation with zero overhead.
#[derive(Debug, Clone, Copy)]
pub struct NoopBrokerMetrics;

impl BrokerMetrics for NoopBrokerMetrics {}

/// Metrics implementation forwarding to the `metrics` crate facade.
#[derive(Debug, Clone, Copy)]
pub struct FacadeBrokerMetrics;

/// Metric name constants for the `metrics` crate facade.
mod metric_names {
    /// Resolve calls by outcome.
    pub const RESOLVES_TOTAL: &str = "channel_broker_resolves_total";
    /// Dial attempts by outcome.
    pub const DIALS_TOTAL: &str = "channel_broker_dials_total";
    /// Dial latency distribution.
    pub const DIAL_DURATION: &str = "channel_broker_dial_duration_seconds";
    /// Connection cache hits.
    pub const CACHE_HITS_TOTAL: &str = "channel_broker_cache_hits_total";
    /// Requests through instrumented connections.
    pub const REQUESTS_TOTAL: &str = "channel_broker_requests_total";
}

impl BrokerMetrics for FacadeBrokerMetrics {
    fn record_resolve(&self, service: &str, outcome: &str) {
        metrics::counter!(
            metric_names::RESOLVES_TOTAL,
            "service" => service.to_owned(),
            "outcome" => outcome.to_owned(),
        )
        .increment(1);
    }

    fn record_dial(&self, service: &str, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        metrics::counter!(
            metric_names::DIALS_TOTAL,
            "service" => service.to_owned(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(metric_names::DIAL_DURATION, "service" => service.to_owned())
            .record(duration.as_secs_f64());
    }

    fn record_cache_hit(&self, service: &str) {
        metrics::counter!(metric_names::CACHE_HITS_TOTAL, "service" => service.to_owned())
            .increment(1);
    }
}

/// Creates the default metrics instance (no-op).
pub(crate) fn default_metrics() -> Arc<dyn BrokerMetrics> {
    Arc::new(NoopBrokerMetrics)
}

/// Request-level interceptor counting calls through a connection.
///
/// Assembled into the chain when the metrics toggle is on; counts via the
/// `metrics` facade regardless of which [`BrokerMetrics`] the broker holds,
/// since the interceptor outlives the broker on cached connections.
#[derive(Debug, Clone)]
pub struct MetricsInterceptor {
    service: String,
}

impl MetricsInterceptor {
    /// Creates an interceptor labeled with the given service name.
    #[must_use]
    pub fn new(service: &str) -> Self {
        Self { service: service.to_owned() }
    }
}

impl Interceptor for MetricsInterceptor {
    fn call(
        &mut self,
        request: tonic::Request<()>,
    ) -> std::result::Result<tonic::Request<()>, tonic::Status> {
        metrics::counter!(
            metric_names::REQUESTS_TOTAL,
            "service" => self.service.clone(),
        )
        .increment(1);
        Ok(request)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    /// Test metrics that counts calls for verification.
    #[derive(Debug, Default)]
    struct CountingMetrics {
        resolves: AtomicU64,
        dials: AtomicU64,
        cache_hits: AtomicU64,
    }

    impl BrokerMetrics for CountingMetrics {
        fn record_resolve(&self, _service: &str, _outcome: &str) {
            self.resolves.fetch_add(1, Ordering::Relaxed);
        }
        fn record_dial(&self, _service: &str, _duration: Duration, _success: bool) {
            self.dials.fetch_add(1, Ordering::Relaxed);
        }
        fn record_cache_hit(&self, _service: &str) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn noop_metrics_does_not_panic() {
        let metrics = NoopBrokerMetrics;
        metrics.record_resolve("orders", "ok");
        metrics.record_dial("orders", Duration::from_millis(5), true);
        metrics.record_cache_hit("orders");
    }

    #[test]
    fn noop_is_default() {
        let metrics = default_metrics();
        metrics.record_resolve("orders", "ok");
    }

    #[test]
    fn counting_metrics_tracks_calls() {
        let metrics = CountingMetrics::default();

        metrics.record_resolve("orders", "ok");
        metrics.record_resolve("orders", "config_not_found");
        metrics.record_dial("orders", Duration::from_millis(10), false);
        metrics.record_cache_hit("orders");

        assert_eq!(metrics.resolves.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.dials.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.cache_hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn trait_object_via_arc() {
        let counting = Arc::new(CountingMetrics::default());
        let metrics: Arc<dyn BrokerMetrics> = counting.clone();

        metrics.record_dial("orders", Duration::from_millis(5), true);
        assert_eq!(counting.dials.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn facade_does_not_panic_without_recorder() {
        // Facade calls are no-ops when no recorder is installed.
        let metrics = FacadeBrokerMetrics;
        metrics.record_resolve("orders", "ok");
        metrics.record_dial("orders", Duration::from_millis(5), true);
        metrics.record_cache_hit("orders");
    }

    #[test]
    fn metrics_interceptor_passes_request_through() {
        let mut interceptor = MetricsInterceptor::new("orders");
        let request = tonic::Request::new(());
        assert!(interceptor.call(request).is_ok());
    }

    #[test]
    fn metrics_impls_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopBrokerMetrics>();
        assert_send_sync::<FacadeBrokerMetrics>();
        assert_send_sync::<Arc<dyn BrokerMetrics>>();
    }
}
