//! Per-client configuration derived once from the service base URL.
//!
//! # Design
//! `ClientConfig` is immutable after construction and holds everything a
//! call needs to reach the service: whether to use TLS, where to connect,
//! the `Host` authority, and the `<prefix>/ids/` base path. For `https`
//! the rustls configuration is built here once and shared behind an `Arc`,
//! so concurrent calls only ever read it.

use std::sync::Arc;
use std::time::Duration;

use url::{Host, Url};

use crate::error::IdsError;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    use_tls: bool,
    host: String,
    port: u16,
    authority: String,
    base_path: String,
    timeout: Option<Duration>,
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl ClientConfig {
    /// Parse `base_url` (e.g. `https://example.com:8181`) into a configuration.
    ///
    /// Only `http` and `https` are accepted and a host is required. Any path
    /// on the URL becomes the prefix in front of `ids/`.
    pub fn from_url(base_url: &str) -> Result<Self, IdsError> {
        let url = Url::parse(base_url)
            .map_err(|e| IdsError::bad_request(format!("invalid base URL {base_url}: {e}")))?;

        let use_tls = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(IdsError::bad_request(format!(
                    "unsupported URL scheme {other}, expected http or https"
                )))
            }
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(IdsError::bad_request(format!("base URL {base_url} has no host"))),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| IdsError::bad_request(format!("base URL {base_url} has no port")))?;

        // host_str keeps the brackets around IPv6 literals, which Host needs.
        let host_str = url.host_str().unwrap_or(&host);
        let authority = match url.port() {
            Some(port) => format!("{host_str}:{port}"),
            None => host_str.to_string(),
        };

        let mut base_path = url.path().to_string();
        if !base_path.ends_with('/') {
            base_path.push('/');
        }
        base_path.push_str("ids/");

        let tls = if use_tls { Some(default_tls_config()?) } else { None };

        Ok(Self {
            use_tls,
            host,
            port,
            authority,
            base_path,
            timeout: None,
            tls,
        })
    }

    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Host to connect to, without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host[:port]` as it appears in URLs and the `Host` header.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Path prefix ending in `ids/`.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn tls(&self) -> Option<&Arc<rustls::ClientConfig>> {
        self.tls.as_ref()
    }

    /// `scheme://authority` with no trailing slash.
    pub fn origin(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}", self.authority)
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub(crate) fn set_tls(&mut self, tls: Arc<rustls::ClientConfig>) {
        self.tls = Some(tls);
    }
}

fn default_tls_config() -> Result<Arc<rustls::ClientConfig>, IdsError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| IdsError::internal(format!("TLS setup failed: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_url_without_path() {
        let config = ClientConfig::from_url("http://localhost:8080").unwrap();
        assert!(!config.use_tls());
        assert_eq!(config.host(), "localhost");
        assert_eq!(config.port(), 8080);
        assert_eq!(config.authority(), "localhost:8080");
        assert_eq!(config.base_path(), "/ids/");
        assert_eq!(config.origin(), "http://localhost:8080");
        assert!(config.tls().is_none());
    }

    #[test]
    fn https_gets_default_port_and_tls() {
        let config = ClientConfig::from_url("https://example.com").unwrap();
        assert!(config.use_tls());
        assert_eq!(config.port(), 443);
        assert_eq!(config.authority(), "example.com");
        assert!(config.tls().is_some());
    }

    #[test]
    fn path_prefix_is_kept() {
        let with_slash = ClientConfig::from_url("http://h:1/facility/").unwrap();
        let without_slash = ClientConfig::from_url("http://h:1/facility").unwrap();
        assert_eq!(with_slash.base_path(), "/facility/ids/");
        assert_eq!(without_slash.base_path(), "/facility/ids/");
    }

    #[test]
    fn ipv6_host_is_unbracketed_for_connect() {
        let config = ClientConfig::from_url("http://[::1]:9000").unwrap();
        assert_eq!(config.host(), "::1");
        assert_eq!(config.authority(), "[::1]:9000");
    }

    #[test]
    fn rejects_other_schemes() {
        let err = ClientConfig::from_url("ftp://example.com").unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::BadRequest);
    }

    #[test]
    fn rejects_garbage() {
        let err = ClientConfig::from_url("not a url").unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::BadRequest);
    }
}
