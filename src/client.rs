//! Registry client
//!
//! The [`Client`] answers one question about a container: does the image it
//! runs still match what its registry serves under the same tag? Getting
//! there takes an authentication round trip (see the `auth` module) followed
//! by a manifest request that is as cheap as the registry allows.
//!
//! Manifest digests are read from a `HEAD` request whenever possible, since
//! registries such as Docker Hub count `GET` requests against pull rate
//! limits. A `GET` is only sent when the `HEAD` request leaves no digest to
//! compare.

use std::convert::TryFrom;
use std::future::Future;
use std::sync::Arc;

use http::HeaderMap;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{redirect, Method, RequestBuilder, Response, StatusCode, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::{CertificateEncoding, ClientConfig, ClientConfigSource};
use crate::container::Container;
use crate::digest::{
    body_digest, digest_header_value, match_digests, normalize_digest, DOCKER_DIGEST_HEADER,
};
use crate::errors::{RegistryError, Result};
use crate::manifest::MIME_TYPES_DISTRIBUTION_MANIFEST;
use crate::reference::ImageReference;
use crate::secrets::{Authenticable, Credential};
use crate::token::TokenGrant;

/// How many times a manifest `HEAD` request is re-sent to another host
const MANIFEST_HOST_RETRIES: usize = 1;

/// The registry client.
///
/// Cheap to clone: clones share the configuration and the connection pools.
///
/// ```rust,no_run
/// use registry_digest::{Client, ClientConfig, Container, ImageInfo};
/// use tokio_util::sync::CancellationToken;
///
/// struct Web {
///     info: ImageInfo,
/// }
///
/// impl Container for Web {
///     fn name(&self) -> &str {
///         "web"
///     }
///     fn image_name(&self) -> &str {
///         "nginx:1.25"
///     }
///     fn image_info(&self) -> Option<&ImageInfo> {
///         Some(&self.info)
///     }
/// }
///
/// # async fn run() -> registry_digest::Result<()> {
/// let client = Client::new(ClientConfig::from_env()?);
/// let web = Web {
///     info: ImageInfo {
///         repo_digests: vec!["nginx@sha256:0123".to_string()],
///     },
/// };
/// let up_to_date = client
///     .compare_digest(&CancellationToken::new(), &web, "")
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    pub(crate) config: Arc<ClientConfig>,
    // Follows up to `max_redirects` redirects
    pub(crate) client: reqwest::Client,
    // Follows no redirects, so manifest HEAD requests can see 3xx answers
    head_client: reqwest::Client,
}

impl Default for Client {
    fn default() -> Self {
        Client::new(ClientConfig::default())
    }
}

impl TryFrom<ClientConfig> for Client {
    type Error = RegistryError;

    fn try_from(config: ClientConfig) -> std::result::Result<Self, Self::Error> {
        let client = build_http_client(&config, redirect::Policy::limited(config.max_redirects))?;
        let head_client = build_http_client(&config, redirect::Policy::none())?;
        Ok(Self {
            config: Arc::new(config),
            client,
            head_client,
        })
    }
}

fn build_http_client(config: &ClientConfig, policy: redirect::Policy) -> Result<reqwest::Client> {
    let mut client_builder = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .redirect(policy)
        .timeout(config.request_timeout)
        .connect_timeout(config.tls_handshake_timeout)
        .pool_idle_timeout(config.idle_timeout)
        .pool_max_idle_per_host(config.max_idle_connections)
        .min_tls_version(config.min_tls_version)
        .danger_accept_invalid_certs(config.accept_invalid_certificates);

    client_builder = match () {
        #[cfg(feature = "native-tls")]
        () => client_builder.danger_accept_invalid_hostnames(config.accept_invalid_hostnames),
        #[cfg(not(feature = "native-tls"))]
        () => client_builder,
    };

    for c in &config.extra_root_certificates {
        let cert = match c.encoding {
            CertificateEncoding::Der => reqwest::Certificate::from_der(c.data.as_slice()),
            CertificateEncoding::Pem => reqwest::Certificate::from_pem(c.data.as_slice()),
        }
        .map_err(RegistryError::HttpClientBuild)?;
        client_builder = client_builder.add_root_certificate(cert);
    }

    client_builder.build().map_err(RegistryError::HttpClientBuild)
}

/// Result of a manifest `HEAD` request
#[derive(Debug, PartialEq, Eq)]
enum HeadOutcome {
    /// Normalized digest read from the response headers
    Digest(String),
    /// No digest could be obtained, a `GET` request is needed
    Fallback,
}

impl Client {
    /// Create a new client with the supplied config
    pub fn new(config: ClientConfig) -> Self {
        Client::try_from(config).unwrap_or_else(|err| {
            warn!("Cannot create registry client from config: {:?}", err);
            warn!("Creating client with default configuration");
            Self {
                config: Arc::default(),
                client: reqwest::Client::default(),
                head_client: reqwest::Client::builder()
                    .redirect(redirect::Policy::none())
                    .build()
                    .unwrap_or_default(),
            }
        })
    }

    /// Create a new client with the supplied config
    pub fn from_source(config_source: &impl ClientConfigSource) -> Self {
        Self::new(config_source.client_config())
    }

    /// The configuration the client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether the registry serving `reference` is known to answer manifest
    /// `HEAD` requests.
    pub fn supports_head(&self, reference: &ImageReference) -> bool {
        let host = self.manifest_host(reference.host());
        self.config
            .head_capable_registries
            .iter()
            .any(|registry| registry == host)
    }

    /// Check whether the image a container runs is still the one its
    /// registry serves under the same tag.
    ///
    /// Returns `true` when one of the container's repository digests equals
    /// the remote manifest digest. `stored_credential` is either empty, a
    /// base64 encoded `{"username":..,"password":..}` object or an already
    /// encoded basic credential.
    pub async fn compare_digest<C>(
        &self,
        cancel: &CancellationToken,
        container: &C,
        stored_credential: &str,
    ) -> Result<bool>
    where
        C: Container + ?Sized,
    {
        let image_info = container
            .image_info()
            .ok_or_else(|| RegistryError::MissingImageInfo {
                container: container.name().to_string(),
            })?;
        let reference = ImageReference::parse(container.image_name())?;
        let original_host = self.original_host(&reference)?;
        let credential = Credential::from_stored(stored_credential);

        let grant = self.negotiate(cancel, &reference, &credential).await?;
        let remote_digest = match self
            .head_digest(cancel, &reference, &grant, &original_host)
            .await?
        {
            HeadOutcome::Digest(digest) => digest,
            HeadOutcome::Fallback => {
                if self.supports_head(&reference) {
                    warn!(
                        image = %reference,
                        "Could not read the manifest digest with a HEAD request, falling back to GET. \
                         This request counts against the registry's pull rate limit"
                    );
                } else {
                    debug!(image = %reference, "Falling back to GET for the manifest digest");
                }
                self.get_digest(cancel, &reference, &grant, &original_host)
                    .await?
            }
        };

        let matched = match_digests(&image_info.repo_digests, &remote_digest);
        debug!(
            container = container.name(),
            image = %reference,
            remote_digest = %remote_digest,
            matched,
            "Compared local and remote digests"
        );
        Ok(matched)
    }

    /// Fetch the normalized manifest digest of a container's image with a
    /// `GET` request.
    ///
    /// Unlike [`Client::compare_digest`] this never tries `HEAD` first.
    pub async fn fetch_digest<C>(
        &self,
        cancel: &CancellationToken,
        container: &C,
        stored_credential: &str,
    ) -> Result<String>
    where
        C: Container + ?Sized,
    {
        let reference = ImageReference::parse(container.image_name())?;
        self.fetch_digest_for_reference(cancel, &reference, stored_credential)
            .await
    }

    /// Same as [`Client::fetch_digest`], starting from a parsed reference
    pub async fn fetch_digest_for_reference(
        &self,
        cancel: &CancellationToken,
        reference: &ImageReference,
        stored_credential: &str,
    ) -> Result<String> {
        let original_host = self.original_host(reference)?;
        let credential = Credential::from_stored(stored_credential);
        let grant = self.negotiate(cancel, reference, &credential).await?;
        self.get_digest(cancel, reference, &grant, &original_host)
            .await
    }

    /// Manifest host before any redirect. Fails early on references without a tag.
    fn original_host(&self, reference: &ImageReference) -> Result<String> {
        let url = self.manifest_url(reference)?;
        Ok(authority(&url))
    }

    /// Send a manifest `HEAD` request, following 401/404 answers and
    /// redirects to another host at most once.
    async fn head_digest(
        &self,
        cancel: &CancellationToken,
        reference: &ImageReference,
        grant: &TokenGrant,
        original_host: &str,
    ) -> Result<HeadOutcome> {
        let mut host = initial_host(grant, original_host);
        let mut retries_left = MANIFEST_HOST_RETRIES;

        loop {
            let url = self.manifest_url_for_host(reference, &host)?;
            debug!(%url, "Requesting manifest digest with HEAD");
            let request = manifest_request(&self.head_client, Method::HEAD, &url, grant);
            let res = send(cancel, request, |source| RegistryError::ManifestRequestFailed {
                url: url.to_string(),
                source,
            })
            .await?;
            let status = res.status();
            trace!(%status, headers = ?res.headers(), "Manifest HEAD response");

            if status.is_success() {
                let digest = digest_header_value(res.headers());
                drain(cancel, res).await;
                return match digest {
                    Some(digest) => Ok(HeadOutcome::Digest(normalize_digest(&digest).to_string())),
                    None => Err(RegistryError::invalid_response(
                        &url,
                        format!("{} response without a {} header", status, DOCKER_DIGEST_HEADER),
                    )),
                };
            }

            let next_host = match status {
                StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => {
                    alternate_host(&host, original_host, &grant.effective_host)
                }
                s if s.is_redirection() => {
                    redirect_host(&url, res.headers()).filter(|target| *target != host)
                }
                _ => None,
            };
            drain(cancel, res).await;

            match next_host {
                Some(next) if retries_left > 0 => {
                    retries_left -= 1;
                    debug!(%status, from = %host, to = %next, "Retrying manifest HEAD on another host");
                    host = next;
                }
                _ => {
                    debug!(%status, %url, "Manifest HEAD gave no digest");
                    return Ok(HeadOutcome::Fallback);
                }
            }
        }
    }

    /// Read the manifest digest from a `GET` response, header first, body second.
    async fn get_digest(
        &self,
        cancel: &CancellationToken,
        reference: &ImageReference,
        grant: &TokenGrant,
        original_host: &str,
    ) -> Result<String> {
        let host = initial_host(grant, original_host);
        let url = self.manifest_url_for_host(reference, &host)?;
        debug!(%url, "Requesting manifest digest with GET");

        let request = manifest_request(&self.client, Method::GET, &url, grant);
        let manifest_error = |source| RegistryError::ManifestRequestFailed {
            url: url.to_string(),
            source,
        };
        let res = send(cancel, request, manifest_error).await?;
        let status = res.status();
        trace!(%status, headers = ?res.headers(), "Manifest GET response");

        if !status.is_success() {
            drain(cancel, res).await;
            return Err(RegistryError::invalid_response(
                &url,
                format!("unexpected status {}", status),
            ));
        }

        if let Some(digest) = digest_header_value(res.headers()) {
            drain(cancel, res).await;
            return Ok(normalize_digest(&digest).to_string());
        }

        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = cancellable(cancel, async { res.bytes().await.map_err(manifest_error) }).await?;
        let digest = body_digest(url.as_str(), content_type.as_deref(), &body)?;
        Ok(normalize_digest(&digest).to_string())
    }
}

fn manifest_request(
    client: &reqwest::Client,
    method: Method,
    url: &Url,
    grant: &TokenGrant,
) -> RequestBuilder {
    client
        .request(method, url.clone())
        .header(ACCEPT, MIME_TYPES_DISTRIBUTION_MANIFEST.join(", "))
        .apply_authorization(&grant.header)
}

/// Host for the first manifest request: the host the challenge probe was
/// redirected to, if any, otherwise the original one.
fn initial_host(grant: &TokenGrant, original_host: &str) -> String {
    if grant.was_redirected && !grant.effective_host.is_empty() && grant.effective_host != original_host
    {
        grant.effective_host.clone()
    } else {
        original_host.to_string()
    }
}

fn alternate_host(current: &str, original: &str, effective: &str) -> Option<String> {
    if current != original {
        Some(original.to_string())
    } else if !effective.is_empty() && effective != current {
        Some(effective.to_string())
    } else {
        None
    }
}

fn redirect_host(url: &Url, headers: &HeaderMap) -> Option<String> {
    let location = headers.get(LOCATION)?.to_str().ok()?;
    let target = url.join(location).ok()?;
    Some(authority(&target)).filter(|host| !host.is_empty())
}

/// `host[:port]` of a URL, leaving out the default port of the scheme
pub(crate) fn authority(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    }
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RegistryError::Cancelled),
        res = fut => res,
    }
}

pub(crate) async fn send(
    cancel: &CancellationToken,
    request: RequestBuilder,
    on_error: impl FnOnce(reqwest::Error) -> RegistryError,
) -> Result<Response> {
    cancellable(cancel, async { request.send().await.map_err(on_error) }).await
}

/// Consume the rest of a response body so the connection can be reused.
pub(crate) async fn drain(cancel: &CancellationToken, res: Response) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        body = res.bytes() => {
            if let Err(error) = body {
                trace!(?error, "Failed to drain response body");
            }
        }
    }
}
