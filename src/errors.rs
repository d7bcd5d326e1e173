//! Errors related to interacting with a registry

use thiserror::Error;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can be raised while resolving and comparing image digests
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The image name could not be normalized, or lacks a tag where one is required
    #[error("Invalid image reference {reference:?}: {reason}")]
    InvalidReference {
        /// The raw image name
        reference: String,
        /// Why the name was rejected
        reason: String,
    },
    /// The registry asked for basic authentication and no credential was supplied
    #[error("Registry {registry} requires basic authentication but no credentials were provided")]
    NoCredentials {
        /// Host that issued the challenge
        registry: String,
    },
    /// The `WWW-Authenticate` scheme is neither basic nor bearer
    #[error("Unsupported authentication challenge from {url}: {challenge}")]
    UnsupportedChallenge {
        /// URL of the challenge probe
        url: String,
        /// Raw `WWW-Authenticate` header value
        challenge: String,
    },
    /// A bearer challenge is missing `realm` or `service`, or its realm is not a URL
    #[error("Invalid bearer challenge {challenge}: {reason}")]
    InvalidChallenge {
        /// The challenge as received
        challenge: String,
        /// What is wrong with the challenge
        reason: String,
    },
    /// Transport failure while probing for a challenge or requesting a token
    #[error("Authentication request to {url} failed")]
    AuthRequestFailed {
        /// URL of the failed request
        url: String,
        /// Underlying transport error
        #[source]
        source: reqwest::Error,
    },
    /// The token endpoint answered the token request with a non-success status
    #[error("Token endpoint {url} rejected the request with status {status}: {message}")]
    AuthenticationFailure {
        /// URL of the token request
        url: String,
        /// HTTP status code
        status: u16,
        /// Response body returned by the token endpoint
        message: String,
    },
    /// The token response is not JSON or carries no token
    #[error("Invalid token response from {url}")]
    TokenResponseInvalid {
        /// URL of the token request
        url: String,
        /// Decoding error
        #[source]
        source: serde_json::Error,
    },
    /// Transport failure while requesting a manifest
    #[error("Manifest request to {url} failed")]
    ManifestRequestFailed {
        /// URL of the failed request
        url: String,
        /// Underlying transport error
        #[source]
        source: reqwest::Error,
    },
    /// The registry answered a manifest request in a way no digest can be read from
    #[error("Invalid registry response from {url}: {reason}")]
    InvalidRegistryResponse {
        /// URL of the manifest request
        url: String,
        /// Description of the problem, including the status line where relevant
        reason: String,
    },
    /// A plain-text digest body failed validation
    #[error("Invalid digest format: {digest:?}")]
    InvalidDigestFormat {
        /// The rejected value
        digest: String,
    },
    /// A digest comparison was requested for a container without image metadata
    #[error("Container {container} has no image info")]
    MissingImageInfo {
        /// Name of the container
        container: String,
    },
    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,
    /// A configuration value could not be interpreted
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// The outbound HTTP client could not be built
    #[error("Cannot build HTTP client")]
    HttpClientBuild(#[source] reqwest::Error),
}

impl RegistryError {
    pub(crate) fn invalid_reference(reference: &str, reason: impl Into<String>) -> Self {
        RegistryError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_response(url: impl ToString, reason: impl Into<String>) -> Self {
        RegistryError::InvalidRegistryResponse {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}
