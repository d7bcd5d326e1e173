//! Digest normalization and comparison, and reading digests out of
//! registry responses

use http::HeaderMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::errors::{RegistryError, Result};

/// Header carrying the manifest digest on manifest responses
pub const DOCKER_DIGEST_HEADER: &str = "Docker-Content-Digest";

/// Digest algorithms whose prefix [`normalize_digest`] strips
pub const KNOWN_ALGORITHMS: &[&str] = &["sha256", "sha384", "sha512"];

/// Content types under which a JSON manifest body is trusted
const JSON_CONTENT_TYPES: &[&str] = &[
    "application/json",
    "application/vnd.oci",
    "application/vnd.docker",
];

const PLAIN_DIGEST_PREFIX: &str = "sha256:";
const PLAIN_DIGEST_MIN_LEN: usize = 20;

/// A convenience struct for splitting a digest into algorithm and value
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Digest<'a> {
    /// Algorithm part, e.g. `sha256`
    pub algorithm: &'a str,
    /// Encoded hash
    pub digest: &'a str,
}

impl<'a> Digest<'a> {
    /// Split `<algorithm>:<hex>`. Returns `None` when there is no colon.
    pub fn new(digest: &'a str) -> Option<Self> {
        let (algorithm, digest) = digest.split_once(':')?;
        Some(Self { algorithm, digest })
    }

    /// Whether the algorithm is one of [`KNOWN_ALGORITHMS`]
    pub fn is_known_algorithm(&self) -> bool {
        KNOWN_ALGORITHMS.contains(&self.algorithm)
    }
}

/// Strip a recognized algorithm prefix from a digest.
///
/// Digests without a recognized prefix are returned unchanged, so the result
/// is always a suffix of the input.
///
/// ```rust
/// use registry_digest::normalize_digest;
///
/// assert_eq!(normalize_digest("sha256:abcdef"), "abcdef");
/// assert_eq!(normalize_digest("abcdef"), "abcdef");
/// assert_eq!(normalize_digest("md5:abcdef"), "md5:abcdef");
/// ```
pub fn normalize_digest(digest: &str) -> &str {
    match Digest::new(digest) {
        Some(parsed) if parsed.is_known_algorithm() => parsed.digest,
        _ => digest,
    }
}

/// Check a remote digest against the repository digests of a local image.
///
/// Local digests have the form `<repository>@<algorithm>:<hex>`. The digest
/// is the segment right after the first `@`; entries without an `@` are
/// skipped.
pub fn match_digests<S: AsRef<str>>(local_digests: &[S], remote_digest: &str) -> bool {
    let remote = normalize_digest(remote_digest);
    local_digests.iter().any(|local| {
        let local = local.as_ref();
        match local.split('@').nth(1) {
            Some(digest) => {
                let matched = normalize_digest(digest) == remote;
                trace!(%local, %remote, matched, "Comparing digest");
                matched
            }
            None => {
                trace!(%local, "Skipping local digest without repository separator");
                false
            }
        }
    })
}

/// Read a non-empty `Docker-Content-Digest` header.
pub(crate) fn digest_header_value(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(DOCKER_DIGEST_HEADER)?;
    match value.to_str() {
        Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Ok(_) => None,
        Err(error) => {
            debug!(?error, "Ignoring unreadable digest header");
            None
        }
    }
}

/// Extract the digest from the body of a manifest GET response.
///
/// JSON bodies must be served with a JSON-ish content type and carry a
/// top-level `digest`; anything else must be a plain `sha256:` digest.
pub(crate) fn body_digest(url: &str, content_type: Option<&str>, body: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return Err(RegistryError::invalid_response(url, "empty response body"));
    }

    if text.starts_with('{') || text.starts_with('[') {
        let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
        if !JSON_CONTENT_TYPES.iter().any(|t| content_type.contains(t)) {
            return Err(RegistryError::invalid_response(
                url,
                format!(
                    "JSON body served with unexpected Content-Type {:?}, expected one of {}",
                    content_type,
                    JSON_CONTENT_TYPES.join(", ")
                ),
            ));
        }
        let value: Value = serde_json::from_str(text).map_err(|e| {
            RegistryError::invalid_response(url, format!("cannot decode JSON body: {}", e))
        })?;
        return match value.get("digest").and_then(Value::as_str) {
            Some(digest) if !digest.is_empty() => Ok(digest.to_string()),
            _ => Err(RegistryError::invalid_response(
                url,
                "JSON body carries no digest",
            )),
        };
    }

    if !text.starts_with(PLAIN_DIGEST_PREFIX) || text.len() < PLAIN_DIGEST_MIN_LEN {
        return Err(RegistryError::InvalidDigestFormat {
            digest: text.chars().take(80).collect(),
        });
    }
    Ok(text.to_string())
}
