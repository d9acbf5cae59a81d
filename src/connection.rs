//! The cached connection handle.

use std::{future::Future, sync::Arc};

use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use crate::{
    config::RetryPolicy,
    error::Result,
    options::{ChainInterceptor, DialOptions},
    retry::with_call_retry,
};

/// A reusable transport handle bound to one service.
///
/// Connections are created by a successful dial and owned by the broker's
/// cache; callers borrow clones. Cloning is cheap (clones share the
/// underlying HTTP/2 connection) and at most one connection is cached per
/// service name. There is no explicit close: a connection lives until
/// process shutdown.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    service: String,
    channel: Channel,
    options: DialOptions,
}

impl Connection {
    /// Wraps a freshly dialed channel.
    pub(crate) fn new(service: &str, channel: Channel, options: DialOptions) -> Self {
        Self { inner: Arc::new(ConnectionInner { service: service.to_owned(), channel, options }) }
    }

    /// Returns the service this connection is bound to.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.inner.service
    }

    /// Returns a clone of the underlying channel.
    ///
    /// Pass this to generated tonic clients, together with
    /// [`interceptor`](Self::interceptor) for the configured cross-cutting
    /// behaviors.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.inner.channel.clone()
    }

    /// Returns the dial options this connection was established with.
    #[must_use]
    pub fn options(&self) -> &DialOptions {
        &self.inner.options
    }

    /// Returns the composed request-level interceptor chain.
    #[must_use]
    pub fn interceptor(&self) -> ChainInterceptor {
        self.inner.options.interceptor(&self.inner.service)
    }

    /// Returns the call retry policy for this connection.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.options.retry_policy()
    }

    /// Runs an operation under this connection's retry policy.
    ///
    /// Applies the innermost chain layer: each attempt gets the policy's
    /// per-attempt timeout budget, transient failures are retried up to the
    /// attempt limit, and cancellation aborts promptly.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let response = conn
    ///     .run(&token, || async {
    ///         let mut client = OrdersClient::with_interceptor(conn.channel(), conn.interceptor());
    ///         client.get_order(request.clone()).await.map_err(Into::into)
    ///     })
    ///     .await?;
    /// ```
    pub async fn run<F, Fut, T>(&self, token: &CancellationToken, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_call_retry(&self.retry_policy(), token, operation).await
    }

    /// Returns true when both handles refer to the same cached connection.
    #[must_use]
    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
