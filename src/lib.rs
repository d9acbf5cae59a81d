//! Client-side gRPC connection broker.
//!
//! Given a logical service name, the broker looks up the service's
//! configuration, validates that it speaks gRPC, and returns a cached
//! [`Connection`] or dials a new one. Dialing goes through one of two
//! [`DialStrategy`] variants: `Local` connects to a statically configured
//! endpoint, `Discovery` resolves the address through a pluggable
//! [`NameResolver`] first. Successful dials are cached per service name and
//! reused by every subsequent caller; concurrent first-time resolutions for
//! the same service share a single dial.
//!
//! Cross-cutting call behaviors (request metrics, trace propagation, retry
//! with backoff) are assembled per dial from feature toggles, in a fixed
//! order with retry innermost.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use channel_broker::{
//!     CallType, ConnectionBroker, FeatureToggles, ServiceConfig, StaticConfigProvider,
//! };
//!
//! let configs = StaticConfigProvider::new().with_config(
//!     ServiceConfig::builder()
//!         .with_service_name("orders")
//!         .with_call_type(CallType::Local)
//!         .with_endpoint("http://orders.internal:50051")
//!         .build()?,
//! );
//!
//! let broker = ConnectionBroker::builder()
//!     .with_config_provider(Arc::new(configs))
//!     .with_feature_toggles(FeatureToggles::all())
//!     .build()?;
//!
//! let conn = broker.resolve("orders").await?;
//! let mut client = OrdersClient::with_interceptor(conn.channel(), conn.interceptor());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod broker;
mod config;
mod connection;
mod error;
mod metrics;
mod options;
mod resolver;
mod retry;
mod strategy;
mod trace;
mod transport;

pub use broker::{ConnectionBroker, ConnectionBrokerBuilder};
pub use config::{
    CallType, ConfigProvider, FeatureToggles, Protocol, RetryPolicy, ServiceConfig,
    ServiceConfigBuilder, StaticConfigProvider,
};
pub use connection::Connection;
pub use error::{BrokerError, Result};
pub use metrics::{BrokerMetrics, FacadeBrokerMetrics, MetricsInterceptor, NoopBrokerMetrics};
pub use options::{CallLayer, ChainInterceptor, DialOptions, TransportOptions};
pub use resolver::{
    DnsConfig, DnsResolver, FileResolver, NameResolver, ResolveError, StaticResolver,
};
pub use retry::with_call_retry;
pub use strategy::DialStrategy;
pub use trace::TraceInterceptor;
pub use transport::{Dialer, TonicDialer};
