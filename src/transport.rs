//! The transport dial seam.
//!
//! [`Dialer`] abstracts "turn a target URL into a live tonic [`Channel`]".
//! Production code uses [`TonicDialer`]; tests substitute counting or
//! failing dialers to exercise broker behavior without a network.

use std::fmt;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};

use crate::{
    error::{DialFailedSnafu, InvalidTargetSnafu, Result},
    options::TransportOptions,
};

/// Establishes transport connections to endpoint URLs.
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    /// Dials `target`, returning a connected channel.
    ///
    /// `target` is a full URL (e.g. `http://10.0.0.1:50051`). The dialer
    /// applies the transport options but not the dial deadline; the calling
    /// strategy enforces that.
    async fn dial(&self, target: &str, options: &TransportOptions) -> Result<Channel>;
}

/// Production [`Dialer`] backed by tonic's [`Endpoint`].
///
/// Connects over plain HTTP/2 without transport encryption; TLS is out of
/// scope for this broker.
#[derive(Debug, Clone, Copy, Default)]
pub struct TonicDialer;

impl TonicDialer {
    /// Creates a new tonic-backed dialer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for TonicDialer {
    async fn dial(&self, target: &str, options: &TransportOptions) -> Result<Channel> {
        let endpoint = Endpoint::try_from(target.to_owned()).map_err(|err| {
            InvalidTargetSnafu { target, message: err.to_string() }.build()
        })?;

        let endpoint = endpoint
            .connect_timeout(options.connect_timeout)
            .tcp_nodelay(true)
            .tcp_keepalive(Some(options.tcp_keepalive))
            .http2_keep_alive_interval(options.http2_keepalive_interval)
            .keep_alive_timeout(options.http2_keepalive_timeout)
            .keep_alive_while_idle(true);

        let channel = endpoint
            .connect()
            .await
            .map_err(|err| DialFailedSnafu { target, message: err.to_string() }.build())?;

        Ok(channel)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::BrokerError;

    #[tokio::test]
    async fn invalid_target_is_rejected() {
        let dialer = TonicDialer::new();
        let err = dialer
            .dial("not a url", &TransportOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidTarget { .. }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_with_dial_error() {
        let dialer = TonicDialer::new();
        let options = TransportOptions {
            connect_timeout: Duration::from_millis(100),
            ..Default::default()
        };

        // Port 1 is unlikely to have a listener.
        let err = dialer.dial("http://127.0.0.1:1", &options).await.unwrap_err();
        assert!(matches!(err, BrokerError::DialFailed { .. }));
        assert!(err.is_retryable());
    }
}
