//! The connection broker: config lookup, cache, single-flight dial.

use std::{sync::Arc, time::Instant};

use dashmap::DashMap;
use snafu::ensure;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    config::{ConfigProvider, FeatureToggles, Protocol},
    connection::Connection,
    error::{BrokerError, ConfigSnafu, InvalidProtocolSnafu, Result},
    metrics::{BrokerMetrics, default_metrics},
    options::DialOptions,
    resolver::NameResolver,
    strategy::DialStrategy,
    transport::{Dialer, TonicDialer},
};

/// Client-side connection broker.
///
/// The sole public operation is [`resolve`](Self::resolve): look up a
/// service's config, return its cached connection or dial a new one. The
/// broker owns its cache: construct one per process (or per test) and
/// share it via [`Arc`]; there is no global state.
///
/// # Concurrency
///
/// The cache is a concurrent map and every dial runs under a per-service
/// single-flight guard: concurrent first-time resolutions for the same
/// service share one dial attempt and observe the same connection, rather
/// than racing and overwriting each other's entries.
///
/// # Example
///
/// ```ignore
/// let configs = StaticConfigProvider::new().with_config(orders_config);
/// let broker = ConnectionBroker::builder()
///     .with_config_provider(Arc::new(configs))
///     .with_feature_toggles(FeatureToggles::all())
///     .build()?;
///
/// let conn = broker.resolve("orders").await?;
/// let mut client = OrdersClient::with_interceptor(conn.channel(), conn.interceptor());
/// ```
#[derive(Debug)]
pub struct ConnectionBroker {
    /// External source of per-service configuration.
    configs: Arc<dyn ConfigProvider>,

    /// Discovery integration; required only for discovery-typed services.
    resolver: Option<Arc<dyn NameResolver>>,

    /// Transport dial seam.
    dialer: Arc<dyn Dialer>,

    /// Toggles read at dial time and passed into the chain builder.
    toggles: FeatureToggles,

    /// Broker-side metrics sink.
    metrics: Arc<dyn BrokerMetrics>,

    /// Service name to live connection. Monotonic; no eviction.
    cache: DashMap<String, Connection>,

    /// Per-service dial guards. One entry per service ever dialed; entries
    /// are reused across reconnect-free lifetimes, so the map stays bounded
    /// by the config universe.
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl ConnectionBroker {
    /// Creates a new broker builder.
    #[must_use]
    pub fn builder() -> ConnectionBrokerBuilder {
        ConnectionBrokerBuilder::default()
    }

    /// Resolves a service name to a live connection.
    ///
    /// Contract, in order:
    /// 1. Config lookup: `ConfigNotFound` when the provider has no record.
    /// 2. Protocol validation: `InvalidProtocol` for non-gRPC configs,
    ///    before any dial.
    /// 3. Cache check: a cached connection is returned as-is, with no
    ///    liveness probe.
    /// 4. Strategy dial under the single-flight guard, with fresh
    ///    [`DialOptions`] assembled from the config and the current toggles.
    /// 5. Cache store and return. Dial failures propagate and cache nothing.
    pub async fn resolve(&self, service: &str) -> Result<Connection> {
        self.resolve_cancellable(service, &CancellationToken::new()).await
    }

    /// [`resolve`](Self::resolve) with caller-controlled cancellation.
    ///
    /// Cancelling the token propagates into an in-flight dial and aborts it
    /// promptly with [`BrokerError::Cancelled`].
    pub async fn resolve_cancellable(
        &self,
        service: &str,
        token: &CancellationToken,
    ) -> Result<Connection> {
        let result = self.resolve_inner(service, token).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.error_type(),
        };
        self.metrics.record_resolve(service, outcome);

        result
    }

    async fn resolve_inner(&self, service: &str, token: &CancellationToken) -> Result<Connection> {
        let config = self
            .configs
            .lookup(service)
            .ok_or_else(|| BrokerError::ConfigNotFound { service: service.to_owned() })?;

        ensure!(
            config.protocol() == Protocol::Grpc,
            InvalidProtocolSnafu { service, protocol: config.protocol() }
        );

        // Fast path: connection already cached.
        if let Some(conn) = self.cache.get(service) {
            self.metrics.record_cache_hit(service);
            return Ok(conn.clone());
        }

        // Single-flight: serialize dials per service. Whoever wins the
        // guard dials; everyone else re-checks the cache after it. Waiting
        // for the guard races cancellation, so a cancelled caller does not
        // block on a peer's in-flight dial.
        let guard = self.flight_guard(service);
        let _flight = tokio::select! {
            biased;
            () = token.cancelled() => return Err(BrokerError::Cancelled),
            flight = guard.lock() => flight,
        };
        if token.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }

        if let Some(conn) = self.cache.get(service) {
            self.metrics.record_cache_hit(service);
            return Ok(conn.clone());
        }

        // Options are rebuilt per dial so toggle changes apply to new
        // connections without restarting.
        let options = DialOptions::assemble(&config, self.toggles);
        let strategy = DialStrategy::for_call_type(config.call_type());
        debug!(service, ?strategy, "dialing service");

        let started = Instant::now();
        let dialed = strategy
            .dial(self.dialer.as_ref(), self.resolver.as_deref(), &config, &options, token)
            .await;
        self.metrics.record_dial(service, started.elapsed(), dialed.is_ok());

        let conn = dialed?;
        self.cache.insert(service.to_owned(), conn.clone());
        debug!(service, "connection cached");

        Ok(conn)
    }

    /// Returns the per-service dial guard, creating it on first use.
    fn flight_guard(&self, service: &str) -> Arc<Mutex<()>> {
        self.inflight.entry(service.to_owned()).or_default().clone()
    }

    /// Returns the number of cached connections.
    #[must_use]
    pub fn cached_connections(&self) -> usize {
        self.cache.len()
    }

    /// Returns the feature toggles this broker dials with.
    #[must_use]
    pub fn feature_toggles(&self) -> FeatureToggles {
        self.toggles
    }
}

/// Builder for [`ConnectionBroker`].
#[derive(Debug, Default)]
pub struct ConnectionBrokerBuilder {
    configs: Option<Arc<dyn ConfigProvider>>,
    resolver: Option<Arc<dyn NameResolver>>,
    dialer: Option<Arc<dyn Dialer>>,
    toggles: FeatureToggles,
    metrics: Option<Arc<dyn BrokerMetrics>>,
}

impl ConnectionBrokerBuilder {
    /// Sets the config provider. Required.
    #[must_use]
    pub fn with_config_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.configs = Some(provider);
        self
    }

    /// Sets the discovery resolver.
    ///
    /// Without one, discovery-typed services fail with `ResolverInit`.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Sets the transport dialer.
    ///
    /// Default: [`TonicDialer`].
    #[must_use]
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Sets the feature toggles.
    ///
    /// Default: everything off.
    #[must_use]
    pub fn with_feature_toggles(mut self, toggles: FeatureToggles) -> Self {
        self.toggles = toggles;
        self
    }

    /// Sets the metrics sink.
    ///
    /// Default: no-op.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn BrokerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the broker.
    ///
    /// # Errors
    ///
    /// Returns an error if no config provider was supplied.
    pub fn build(self) -> Result<ConnectionBroker> {
        let configs = self
            .configs
            .ok_or_else(|| ConfigSnafu { message: "config provider is required" }.build())?;

        Ok(ConnectionBroker {
            configs,
            resolver: self.resolver,
            dialer: self.dialer.unwrap_or_else(|| Arc::new(TonicDialer::new())),
            toggles: self.toggles,
            metrics: self.metrics.unwrap_or_else(default_metrics),
            cache: DashMap::new(),
            inflight: DashMap::new(),
        })
    }
}
