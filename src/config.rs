//! Client configuration
//!
//! Everything that used to be process-wide state in an update agent (the
//! User-Agent, TLS settings, redirect budget, timeouts) lives in a
//! [`ClientConfig`] that is handed to the [`Client`](crate::Client) when it
//! is built.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::tls::Version as TlsVersion;
use tracing::debug;

use crate::errors::{RegistryError, Result};
use crate::reference::DOCKER_HUB_HOST;

/// Default value for `ClientConfig::max_redirects`
pub const DEFAULT_MAX_REDIRECTS: usize = 3;

/// Default value for `ClientConfig::user_agent`
pub const DEFAULT_USER_AGENT: &str = concat!("registry-digest/", env!("CARGO_PKG_VERSION"));

/// Default value for `ClientConfig::request_timeout`
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default value for `ClientConfig::idle_timeout`
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Default value for `ClientConfig::tls_handshake_timeout`
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default value for `ClientConfig::max_idle_connections`, per host
pub const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 100;

/// Registry aliases that take part in authentication but do not serve
/// manifests themselves, mapped to the host that does.
pub const DEFAULT_HOST_ALIASES: &[(&str, &str)] = &[("lscr.io", "ghcr.io")];

/// Environment variable selecting plain HTTP for registry requests
pub const REGISTRY_TLS_SKIP_ENV: &str = "REGISTRY_TLS_SKIP";

/// Environment variable holding the minimum TLS version
pub const REGISTRY_TLS_MIN_VERSION_ENV: &str = "REGISTRY_TLS_MIN_VERSION";

/// The encoding of the certificate
#[derive(Debug, Clone)]
pub enum CertificateEncoding {
    #[allow(missing_docs)]
    Der,
    #[allow(missing_docs)]
    Pem,
}

/// A x509 certificate
#[derive(Debug, Clone)]
pub struct Certificate {
    /// Which encoding is used by the certificate
    pub encoding: CertificateEncoding,

    /// Actual certificate
    pub data: Vec<u8>,
}

/// The protocol that the client should use to connect
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClientProtocol {
    #[allow(missing_docs)]
    Http,
    #[allow(missing_docs)]
    #[default]
    Https,
    #[allow(missing_docs)]
    HttpsExcept(Vec<String>),
}

impl ClientProtocol {
    pub(crate) fn scheme_for(&self, registry: &str) -> &str {
        match self {
            ClientProtocol::Https => "https",
            ClientProtocol::Http => "http",
            ClientProtocol::HttpsExcept(exceptions) => {
                if exceptions.iter().any(|e| e == registry) {
                    "http"
                } else {
                    "https"
                }
            }
        }
    }
}

/// A client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Which protocol the client should use
    pub protocol: ClientProtocol,

    /// Accept invalid hostname. Defaults to false
    #[cfg(feature = "native-tls")]
    pub accept_invalid_hostnames: bool,

    /// Accept invalid certificates. Defaults to false
    pub accept_invalid_certificates: bool,

    /// A list of extra root certificate to trust. This can be used to connect
    /// to servers using self-signed certificates
    pub extra_root_certificates: Vec<Certificate>,

    /// Minimum TLS version to negotiate. Defaults to TLS 1.2
    pub min_tls_version: TlsVersion,

    /// Value of the `User-Agent` header sent with every request
    pub user_agent: String,

    /// Maximum number of redirects followed by a single request. Going over
    /// the limit fails the request.
    ///
    /// This defaults to [`DEFAULT_MAX_REDIRECTS`].
    pub max_redirects: usize,

    /// Total timeout of a request, body included
    pub request_timeout: Duration,

    /// How long an idle pooled connection is kept
    pub idle_timeout: Duration,

    /// Timeout for establishing a connection, TLS handshake included
    pub tls_handshake_timeout: Duration,

    /// Maximum number of idle pooled connections kept per host.
    ///
    /// There is no overall cap. The manifest `HEAD` requests use a pool of
    /// their own, which applies the same limit.
    pub max_idle_connections: usize,

    /// Hosts whose manifests are served by another host, e.g. `lscr.io` by
    /// `ghcr.io`. Applied when building manifest URLs only.
    ///
    /// This defaults to [`DEFAULT_HOST_ALIASES`].
    pub host_aliases: HashMap<String, String>,

    /// Registries known to answer manifest HEAD requests. Falling back to GET
    /// on one of these is logged as a warning, since GET requests count
    /// against pull rate limits.
    pub head_capable_registries: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: ClientProtocol::default(),
            #[cfg(feature = "native-tls")]
            accept_invalid_hostnames: false,
            accept_invalid_certificates: false,
            extra_root_certificates: Vec::new(),
            min_tls_version: TlsVersion::TLS_1_2,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            tls_handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
            host_aliases: DEFAULT_HOST_ALIASES
                .iter()
                .map(|(alias, host)| (alias.to_string(), host.to_string()))
                .collect(),
            head_capable_registries: vec![DOCKER_HUB_HOST.to_string(), "ghcr.io".to_string()],
        }
    }
}

impl ClientConfig {
    /// Build a configuration from the process environment.
    ///
    /// Reads [`REGISTRY_TLS_SKIP_ENV`] and [`REGISTRY_TLS_MIN_VERSION_ENV`];
    /// everything else keeps its default.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`], reading values through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = ClientConfig::default();

        if let Some(value) = lookup(REGISTRY_TLS_SKIP_ENV) {
            if parse_bool(REGISTRY_TLS_SKIP_ENV, &value)? {
                debug!("TLS skip requested, registry requests use plain HTTP");
                config.protocol = ClientProtocol::Http;
            }
        }
        if let Some(value) = lookup(REGISTRY_TLS_MIN_VERSION_ENV) {
            if !value.trim().is_empty() {
                config.min_tls_version = parse_tls_version(&value)?;
            }
        }

        Ok(config)
    }
}

/// A source that can provide a `ClientConfig`.
/// If you are using this crate in your own application, you can implement this
/// trait on your configuration type so that it can be passed to `Client::from_source`.
pub trait ClientConfigSource {
    /// Provides a `ClientConfig`.
    fn client_config(&self) -> ClientConfig;
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(RegistryError::InvalidConfiguration(format!(
            "{} must be a boolean, got {:?}",
            key, other
        ))),
    }
}

/// Accepts `TLS1.2`, `TLS12`, `VersionTLS12`, `1.2` and the like.
fn parse_tls_version(value: &str) -> Result<TlsVersion> {
    let upper = value.trim().to_ascii_uppercase();
    let rest = upper.strip_prefix("VERSION").unwrap_or(&upper);
    let rest = rest.strip_prefix("TLS").unwrap_or(rest);
    let digits: String = rest
        .chars()
        .filter(|c| !matches!(c, '.' | '_' | 'V' | ' '))
        .collect();
    match digits.as_str() {
        "10" => Ok(TlsVersion::TLS_1_0),
        "11" => Ok(TlsVersion::TLS_1_1),
        "12" => Ok(TlsVersion::TLS_1_2),
        "13" => Ok(TlsVersion::TLS_1_3),
        _ => Err(RegistryError::InvalidConfiguration(format!(
            "{} must name a TLS version (TLS1.0 to TLS1.3), got {:?}",
            REGISTRY_TLS_MIN_VERSION_ENV, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn lookup_from(
        vars: &'static [(&'static str, &'static str)],
    ) -> impl Fn(&str) -> Option<String> {
        move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.protocol, ClientProtocol::Https);
        assert_eq!(config.min_tls_version, TlsVersion::TLS_1_2);
        assert_eq!(config.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert_eq!(config.host_aliases.get("lscr.io").map(String::as_str), Some("ghcr.io"));
        assert!(config.user_agent.starts_with("registry-digest/"));
    }

    #[test]
    fn test_from_lookup_empty() {
        let config = ClientConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.protocol, ClientProtocol::Https);
        assert_eq!(config.min_tls_version, TlsVersion::TLS_1_2);
    }

    #[test]
    fn test_from_lookup_tls_skip() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (REGISTRY_TLS_SKIP_ENV, "true"),
            (REGISTRY_TLS_MIN_VERSION_ENV, "TLS1.3"),
        ]))
        .unwrap();
        assert_eq!(config.protocol, ClientProtocol::Http);
        assert_eq!(config.min_tls_version, TlsVersion::TLS_1_3);
    }

    #[test]
    fn test_from_lookup_invalid() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup_from(&[(REGISTRY_TLS_SKIP_ENV, "maybe")])),
            Err(RegistryError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup_from(&[(REGISTRY_TLS_MIN_VERSION_ENV, "SSL3")])),
            Err(RegistryError::InvalidConfiguration(_))
        ));
    }

    #[rstest]
    #[case("TLS1.0", TlsVersion::TLS_1_0)]
    #[case("tls1.1", TlsVersion::TLS_1_1)]
    #[case("VersionTLS12", TlsVersion::TLS_1_2)]
    #[case("TLS13", TlsVersion::TLS_1_3)]
    #[case("1.2", TlsVersion::TLS_1_2)]
    #[case(" TLS_1_3 ", TlsVersion::TLS_1_3)]
    fn test_parse_tls_version(#[case] value: &str, #[case] expected: TlsVersion) {
        assert_eq!(parse_tls_version(value).unwrap(), expected);
    }

    #[test]
    fn test_scheme_for() {
        let protocol = ClientProtocol::HttpsExcept(vec!["localhost:5000".to_owned()]);
        assert_eq!(protocol.scheme_for("localhost:5000"), "http");
        assert_eq!(protocol.scheme_for("ghcr.io"), "https");
        assert_eq!(ClientProtocol::Http.scheme_for("ghcr.io"), "http");
        assert_eq!(ClientProtocol::Https.scheme_for("localhost:5000"), "https");
    }
}
