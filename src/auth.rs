//! Challenge probing and token negotiation
//!
//! A registry tells clients how to authenticate through the
//! `WWW-Authenticate` header of a `401` answer to `GET /v2/`. Basic
//! challenges are answered with the stored credential directly; bearer
//! challenges send the client to a token endpoint (the `realm`) first.

use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{StatusCode, Url};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::challenge::{Challenge, ChallengeScheme};
use crate::client::{authority, cancellable, drain, send, Client};
use crate::container::Container;
use crate::errors::{RegistryError, Result};
use crate::reference::ImageReference;
use crate::secrets::{Authenticable, Credential};
use crate::token::{RegistryToken, TokenGrant};

impl Client {
    /// URL probed for an authentication challenge: `/v2/` on the image's
    /// registry host. Host aliases are not applied here.
    pub fn challenge_url(&self, reference: &ImageReference) -> Result<Url> {
        let host = reference.host();
        let url = format!("{}://{}/v2/", self.config.protocol.scheme_for(host), host);
        Url::parse(&url).map_err(|e| {
            RegistryError::invalid_reference(
                &reference.to_string(),
                format!("cannot build challenge URL {:?}: {}", url, e),
            )
        })
    }

    /// Obtain the `Authorization` value for manifest requests on a
    /// container's image.
    pub async fn get_token<C>(
        &self,
        cancel: &CancellationToken,
        container: &C,
        stored_credential: &str,
    ) -> Result<TokenGrant>
    where
        C: Container + ?Sized,
    {
        let reference = ImageReference::parse(container.image_name())?;
        self.get_token_for_reference(cancel, &reference, stored_credential)
            .await
    }

    /// Same as [`Client::get_token`], starting from a parsed reference
    pub async fn get_token_for_reference(
        &self,
        cancel: &CancellationToken,
        reference: &ImageReference,
        stored_credential: &str,
    ) -> Result<TokenGrant> {
        let credential = Credential::from_stored(stored_credential);
        self.negotiate(cancel, reference, &credential).await
    }

    pub(crate) async fn negotiate(
        &self,
        cancel: &CancellationToken,
        reference: &ImageReference,
        credential: &Credential,
    ) -> Result<TokenGrant> {
        debug!("Authorizing for image: {}", reference);
        let url = self.challenge_url(reference)?;
        let request = self.client.get(url.clone()).header(ACCEPT, "*/*");
        let res = send(cancel, request, |source| RegistryError::AuthRequestFailed {
            url: url.to_string(),
            source,
        })
        .await?;

        let final_url = res.url().clone();
        let probe_host = authority(&final_url);
        let was_redirected = probe_host != authority(&url);
        let status = res.status();
        debug!(%status, %final_url, was_redirected, "Challenge probe answered");

        if status != StatusCode::UNAUTHORIZED {
            drain(cancel, res).await;
            return Ok(TokenGrant::anonymous(probe_host, was_redirected));
        }

        let header = res
            .headers()
            .get(WWW_AUTHENTICATE)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default();
        drain(cancel, res).await;

        let challenge = match Challenge::parse(&header) {
            Some(challenge) => challenge,
            None => {
                debug!("401 without a challenge, continuing anonymously");
                return Ok(TokenGrant::anonymous(probe_host, was_redirected));
            }
        };

        match challenge.scheme {
            ChallengeScheme::Basic => {
                let wire = credential
                    .wire_form()
                    .ok_or_else(|| RegistryError::NoCredentials {
                        registry: probe_host.clone(),
                    })?;
                debug!("Using HTTP basic authentication");
                Ok(TokenGrant {
                    header: format!("Basic {}", wire),
                    effective_host: probe_host,
                    was_redirected,
                })
            }
            ChallengeScheme::Bearer => {
                let token_url = auth_url(&challenge, reference)?;
                let token = self.request_token(cancel, &token_url, credential).await?;
                debug!("Successfully authorized for image '{}'", reference);
                Ok(TokenGrant {
                    header: token.bearer_header(),
                    effective_host: authority(&token_url),
                    was_redirected,
                })
            }
            ChallengeScheme::Other(_) => Err(RegistryError::UnsupportedChallenge {
                url: final_url.to_string(),
                challenge: header,
            }),
        }
    }

    async fn request_token(
        &self,
        cancel: &CancellationToken,
        token_url: &Url,
        credential: &Credential,
    ) -> Result<RegistryToken> {
        debug!(url = %token_url, anonymous = credential.is_anonymous(), "Making authentication call");
        let request = self.client.get(token_url.clone()).apply_credential(credential);
        let auth_error = |source| RegistryError::AuthRequestFailed {
            url: token_url.to_string(),
            source,
        };
        let res = send(cancel, request, auth_error).await?;
        let status = res.status();
        let text = cancellable(cancel, async { res.text().await.map_err(auth_error) }).await?;

        if !status.is_success() {
            debug!(%status, "Failed to authenticate: {}", text);
            return Err(RegistryError::AuthenticationFailure {
                url: token_url.to_string(),
                status: status.as_u16(),
                message: text,
            });
        }

        serde_json::from_str(&text).map_err(|source| RegistryError::TokenResponseInvalid {
            url: token_url.to_string(),
            source,
        })
    }
}

/// Build the token request URL for a bearer challenge.
///
/// The realm URL is extended with the `service` of the challenge and a pull
/// scope on the image's repository.
///
/// ```rust
/// use registry_digest::auth::auth_url;
/// use registry_digest::{Challenge, ImageReference};
///
/// let challenge = Challenge::parse(
///     r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io""#,
/// ).unwrap();
/// let reference = ImageReference::parse("nginx").unwrap();
/// let url = auth_url(&challenge, &reference).unwrap();
/// assert_eq!(
///     url.as_str(),
///     "https://auth.docker.io/token?service=registry.docker.io&scope=repository%3Alibrary%2Fnginx%3Apull"
/// );
/// ```
pub fn auth_url(challenge: &Challenge, reference: &ImageReference) -> Result<Url> {
    let invalid = |reason: String| RegistryError::InvalidChallenge {
        challenge: challenge.to_string(),
        reason,
    };
    let realm = challenge
        .realm()
        .ok_or_else(|| invalid("missing realm".to_string()))?;
    let service = challenge
        .service()
        .ok_or_else(|| invalid("missing service".to_string()))?;

    let mut url = Url::parse(realm)
        .map_err(|e| invalid(format!("realm {:?} is not a URL: {}", realm, e)))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(invalid(format!("realm {:?} has no host", realm)));
    }

    url.query_pairs_mut()
        .append_pair("service", service)
        .append_pair("scope", &format!("repository:{}:pull", reference.repository()));
    Ok(url)
}
