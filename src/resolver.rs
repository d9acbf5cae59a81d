//! Service-discovery naming contract and resolver implementations.
//!
//! The broker consumes discovery through the [`NameResolver`] trait: given a
//! discovery name, produce candidate endpoint URLs. Three implementations
//! are provided:
//!
//! - [`StaticResolver`]: in-memory manifest, for embedding and tests.
//! - [`DnsResolver`]: A/AAAA lookups of `{service}.{domain}`, for
//!   Kubernetes-style headless services.
//! - [`FileResolver`]: JSON manifest file mapping service names to URLs.
//!
//! Resolution failures surface to broker callers as `ResolverInit`.

use std::{collections::HashMap, fmt, net::IpAddr, path::PathBuf};

use async_trait::async_trait;
use hickory_resolver::{
    Resolver, config::ResolverConfig, name_server::TokioConnectionProvider,
};
use parking_lot::RwLock;

/// Default port for DNS-discovered servers.
const DEFAULT_DNS_PORT: u16 = 50051;

/// Errors raised by resolver implementations.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// DNS resolution failed.
    #[error("DNS resolution failed for {domain}: {source}")]
    DnsResolution {
        /// Fully qualified domain that was queried.
        domain: String,
        /// Underlying DNS error.
        source: hickory_resolver::ResolveError,
    },

    /// Manifest file read failed.
    #[error("failed to read service manifest from {}: {source}", path.display())]
    FileRead {
        /// Manifest path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Manifest file parse failed.
    #[error("failed to parse service manifest from {}: {source}", path.display())]
    FileParse {
        /// Manifest path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Resolution succeeded but yielded no endpoints.
    #[error("no endpoints found for service '{service}'")]
    NoEndpoints {
        /// The service that resolved to nothing.
        service: String,
    },
}

/// Resolves a discovery name to candidate endpoint URLs.
///
/// Supplied by an external service-discovery integration; the broker only
/// consumes the contract.
#[async_trait]
pub trait NameResolver: Send + Sync + fmt::Debug {
    /// Resolves a service to endpoint URLs (e.g. `http://10.0.0.1:50051`).
    async fn resolve(&self, service: &str) -> Result<Vec<String>, ResolveError>;
}

/// Map-backed [`NameResolver`] for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<String>>,
}

impl StaticResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers endpoint URLs for a service.
    pub fn insert(
        &mut self,
        service: impl Into<String>,
        endpoints: impl IntoIterator<Item = impl Into<String>>,
    ) {
        self.entries.insert(service.into(), endpoints.into_iter().map(Into::into).collect());
    }

    /// Registers endpoint URLs, consuming and returning the resolver.
    #[must_use]
    pub fn with_service(
        mut self,
        service: impl Into<String>,
        endpoints: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.insert(service, endpoints);
        self
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve(&self, service: &str) -> Result<Vec<String>, ResolveError> {
        match self.entries.get(service) {
            Some(endpoints) if !endpoints.is_empty() => Ok(endpoints.clone()),
            _ => Err(ResolveError::NoEndpoints { service: service.to_owned() }),
        }
    }
}

/// Configuration for DNS-based discovery.
#[derive(Debug, Clone, bon::Builder)]
#[builder(derive(Debug))]
pub struct DnsConfig {
    /// DNS search domain appended to service names
    /// (e.g. `default.svc.cluster.local`).
    #[builder(into)]
    domain: String,

    /// Port to use for discovered addresses.
    #[builder(default = DEFAULT_DNS_PORT)]
    port: u16,

    /// Use `https://` URLs for discovered servers.
    #[builder(default)]
    use_tls: bool,
}

impl DnsConfig {
    /// Returns the DNS search domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the port for discovered servers.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns whether TLS URLs are generated.
    #[must_use]
    pub fn use_tls(&self) -> bool {
        self.use_tls
    }
}

/// DNS-backed [`NameResolver`].
///
/// Resolves `{service}.{domain}` A/AAAA records and generates
/// `http://{ip}:{port}` URLs. The underlying DNS client is created lazily
/// on first use and reused afterwards.
#[derive(Debug)]
pub struct DnsResolver {
    config: DnsConfig,
    resolver: RwLock<Option<Resolver<TokioConnectionProvider>>>,
}

impl DnsResolver {
    /// Creates a resolver with the given DNS configuration.
    #[must_use]
    pub fn new(config: DnsConfig) -> Self {
        Self { config, resolver: RwLock::new(None) }
    }

    /// Gets or creates the DNS client.
    fn get_or_create(&self) -> Resolver<TokioConnectionProvider> {
        {
            let guard = self.resolver.read();
            if let Some(ref resolver) = *guard {
                return resolver.clone();
            }
        }

        let resolver = Resolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .build();

        {
            let mut guard = self.resolver.write();
            if guard.is_none() {
                *guard = Some(resolver.clone());
            }
        }

        resolver
    }
}

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve(&self, service: &str) -> Result<Vec<String>, ResolveError> {
        let domain = format!("{service}.{}", self.config.domain);
        let resolver = self.get_or_create();

        let lookup = resolver
            .lookup_ip(domain.clone())
            .await
            .map_err(|source| ResolveError::DnsResolution { domain: domain.clone(), source })?;

        let scheme = if self.config.use_tls { "https" } else { "http" };
        let endpoints: Vec<String> = lookup
            .iter()
            .map(|ip: IpAddr| format!("{scheme}://{ip}:{}", self.config.port))
            .collect();

        if endpoints.is_empty() {
            return Err(ResolveError::NoEndpoints { service: service.to_owned() });
        }

        Ok(endpoints)
    }
}

/// Service manifest JSON format.
#[derive(Debug, serde::Deserialize)]
struct ServiceManifest {
    services: HashMap<String, Vec<String>>,
}

/// File-backed [`NameResolver`].
///
/// Reads a JSON manifest on every resolution, so manifest edits take effect
/// without a restart:
///
/// ```json
/// { "services": { "orders": ["http://10.0.0.1:50051"] } }
/// ```
#[derive(Debug, Clone)]
pub struct FileResolver {
    path: PathBuf,
}

impl FileResolver {
    /// Creates a resolver reading the manifest at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the manifest path.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl NameResolver for FileResolver {
    async fn resolve(&self, service: &str) -> Result<Vec<String>, ResolveError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ResolveError::FileRead { path: self.path.clone(), source })?;

        let manifest: ServiceManifest = serde_json::from_str(&content)
            .map_err(|source| ResolveError::FileParse { path: self.path.clone(), source })?;

        match manifest.services.get(service) {
            Some(endpoints) if !endpoints.is_empty() => Ok(endpoints.clone()),
            _ => Err(ResolveError::NoEndpoints { service: service.to_owned() }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_resolver_returns_registered_endpoints() {
        let resolver = StaticResolver::new()
            .with_service("orders", ["http://10.0.0.1:50051", "http://10.0.0.2:50051"]);

        let endpoints = resolver.resolve("orders").await.expect("should resolve");
        assert_eq!(endpoints, vec!["http://10.0.0.1:50051", "http://10.0.0.2:50051"]);
    }

    #[tokio::test]
    async fn static_resolver_unknown_service_fails() {
        let resolver = StaticResolver::new();
        let err = resolver.resolve("unknown").await.unwrap_err();
        assert!(matches!(err, ResolveError::NoEndpoints { .. }));
    }

    #[tokio::test]
    async fn static_resolver_empty_entry_fails() {
        let resolver = StaticResolver::new().with_service("orders", Vec::<String>::new());
        let err = resolver.resolve("orders").await.unwrap_err();
        assert!(matches!(err, ResolveError::NoEndpoints { .. }));
    }

    #[test]
    fn dns_config_defaults() {
        let config = DnsConfig::builder().domain("svc.cluster.local").build();
        assert_eq!(config.domain(), "svc.cluster.local");
        assert_eq!(config.port(), DEFAULT_DNS_PORT);
        assert!(!config.use_tls());
    }

    #[test]
    fn dns_config_custom_settings() {
        let config =
            DnsConfig::builder().domain("svc.cluster.local").port(8443).use_tls(true).build();
        assert_eq!(config.port(), 8443);
        assert!(config.use_tls());
    }

    #[tokio::test]
    async fn file_resolver_reads_manifest() {
        let path = std::env::temp_dir().join(format!("broker-manifest-{}.json", std::process::id()));
        tokio::fs::write(
            &path,
            r#"{ "services": { "orders": ["http://10.0.0.1:50051"] } }"#,
        )
        .await
        .expect("write manifest");

        let resolver = FileResolver::new(&path);
        let endpoints = resolver.resolve("orders").await.expect("should resolve");
        assert_eq!(endpoints, vec!["http://10.0.0.1:50051"]);

        let err = resolver.resolve("unknown").await.unwrap_err();
        assert!(matches!(err, ResolveError::NoEndpoints { .. }));

        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn file_resolver_missing_file_fails() {
        let resolver = FileResolver::new("/nonexistent/broker-manifest.json");
        let err = resolver.resolve("orders").await.unwrap_err();
        assert!(matches!(err, ResolveError::FileRead { .. }));
    }

    #[tokio::test]
    async fn file_resolver_bad_json_fails() {
        let path =
            std::env::temp_dir().join(format!("broker-bad-manifest-{}.json", std::process::id()));
        tokio::fs::write(&path, "not json").await.expect("write manifest");

        let resolver = FileResolver::new(&path);
        let err = resolver.resolve("orders").await.unwrap_err();
        assert!(matches!(err, ResolveError::FileParse { .. }));

        tokio::fs::remove_file(&path).await.ok();
    }
}
