//! Dial strategies: how a service's network address is obtained.
//!
//! A strategy turns (config, options) into a live [`Connection`]. The
//! variant set is closed: every call type maps onto exactly one of the two
//! strategies here.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::{debug, warn};

use crate::{
    config::{CallType, ServiceConfig},
    connection::Connection,
    error::{BrokerError, DialFailedSnafu, Result},
    options::DialOptions,
    resolver::NameResolver,
    transport::Dialer,
};

/// Strategy for establishing a connection to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialStrategy {
    /// Dial the statically configured endpoint.
    Local,
    /// Resolve the address through the discovery system, then dial.
    Discovery,
}

impl DialStrategy {
    /// Selects the strategy for a config's call type.
    ///
    /// `Unspecified` maps to `Local`: config records predating the
    /// call-type field, or carrying values this broker does not recognize,
    /// dial their static endpoint. This fallback is deliberate and part of
    /// the config contract, not a catch-all.
    #[must_use]
    pub fn for_call_type(call_type: CallType) -> Self {
        match call_type {
            CallType::Local => Self::Local,
            CallType::Discovery => Self::Discovery,
            CallType::Unspecified => Self::Local,
        }
    }

    /// Produces a connection for the given config.
    ///
    /// Both variants bound the dial with the config's timeout and race the
    /// caller's cancellation token; the timeout governs only connection
    /// establishment, never the connection's subsequent lifetime. Dropping
    /// the in-flight dial future on timeout or cancellation tears the
    /// attempt down on every exit path.
    pub(crate) async fn dial(
        self,
        dialer: &dyn Dialer,
        resolver: Option<&dyn NameResolver>,
        config: &ServiceConfig,
        options: &DialOptions,
        token: &CancellationToken,
    ) -> Result<Connection> {
        let service = config.service_name();

        let target = match self {
            Self::Local => config
                .endpoint()
                .ok_or_else(|| BrokerError::Config {
                    message: format!("service '{service}' has no endpoint configured"),
                })?
                .to_owned(),
            Self::Discovery => {
                let resolver = resolver.ok_or_else(|| BrokerError::ResolverInit {
                    service: service.to_owned(),
                    message: "no name resolver configured".to_owned(),
                })?;
                let name = config.discovery_name();

                let endpoints =
                    resolve_endpoints(resolver, service, name, config.dial_timeout(), token)
                        .await?;

                let target = endpoints.first().cloned().ok_or_else(|| {
                    BrokerError::ResolverInit {
                        service: service.to_owned(),
                        message: "discovery returned no endpoints".to_owned(),
                    }
                })?;

                debug!(
                    service,
                    qualified = %format!("discovery:///{name}"),
                    candidates = endpoints.len(),
                    %target,
                    "resolved discovery endpoints"
                );
                target
            },
        };

        let channel =
            timed_dial(dialer, &target, options, config.dial_timeout(), token).await?;

        debug!(service, %target, strategy = ?self, "dial succeeded");
        Ok(Connection::new(service, channel, options.clone()))
    }
}

/// Resolves discovery endpoints under a deadline, racing caller
/// cancellation.
///
/// Resolution gets the same budget as the dial itself; a resolver that
/// exceeds it surfaces as `ResolverInit`, like any other discovery outage.
async fn resolve_endpoints(
    resolver: &dyn NameResolver,
    service: &str,
    name: &str,
    deadline: Duration,
    token: &CancellationToken,
) -> Result<Vec<String>> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(BrokerError::Cancelled),
        outcome = tokio::time::timeout(deadline, resolver.resolve(name)) => match outcome {
            Ok(Ok(endpoints)) => Ok(endpoints),
            Ok(Err(err)) => {
                warn!(service, error = %err, "discovery resolution failed");
                Err(BrokerError::ResolverInit {
                    service: service.to_owned(),
                    message: err.to_string(),
                })
            },
            Err(_) => Err(BrokerError::ResolverInit {
                service: service.to_owned(),
                message: format!(
                    "discovery resolution timed out after {}ms",
                    deadline.as_millis()
                ),
            }),
        }
    }
}

/// Dials a target under a deadline, racing caller cancellation.
async fn timed_dial(
    dialer: &dyn Dialer,
    target: &str,
    options: &DialOptions,
    deadline: Duration,
    token: &CancellationToken,
) -> Result<Channel> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(BrokerError::Cancelled),
        outcome = tokio::time::timeout(deadline, dialer.dial(target, options.transport())) => {
            match outcome {
                Ok(result) => result,
                Err(_) => DialFailedSnafu {
                    target,
                    message: format!("dial timed out after {}ms", deadline.as_millis()),
                }
                .fail(),
            }
        }
    }
}
