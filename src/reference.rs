//! Image reference parsing and Docker Hub normalization

use std::fmt;
use std::str::FromStr;

use regex::{Regex, RegexBuilder};

use crate::errors::{RegistryError, Result};

/// Canonical host of Docker Hub, used for unqualified image names
pub const DOCKER_HUB_HOST: &str = "index.docker.io";

/// Domains that are rewritten to [`DOCKER_HUB_HOST`]
const DOCKER_HUB_DOMAINS: &[&str] = &["docker.io", "index.docker.io"];

/// Namespace Docker Hub uses for official single-segment images
const DOCKER_HUB_OFFICIAL_NAMESPACE: &str = "library";

/// Tag assumed when a reference carries neither a tag nor a digest
pub const DEFAULT_TAG: &str = "latest";

const NAME_TOTAL_LENGTH_MAX: usize = 255;

lazy_static! {
    static ref HOST_REGEXP: Regex = must_compile(
        r"^(?:\[[[:xdigit:]:.]+\]|[a-zA-Z0-9](?:[a-zA-Z0-9.-]*[a-zA-Z0-9])?)(?::[0-9]+)?$"
    );
    static ref PATH_COMPONENT_REGEXP: Regex =
        must_compile(r"^[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*$");
    static ref TAG_REGEXP: Regex = must_compile(r"^[\w][\w.-]{0,127}$");
    static ref DIGEST_REGEXP: Regex = must_compile(
        r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[[:xdigit:]]{32,}$"
    );
}

fn must_compile(r: &str) -> Regex {
    RegexBuilder::new(r)
        .size_limit(10 * (1 << 21))
        .build()
        .unwrap()
}

/// The version part of a reference: a tag, a digest, or both.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TagOrDigest {
    /// `name:tag`
    Tag(String),
    /// `name@algorithm:hex`
    Digest(String),
    /// `name:tag@algorithm:hex`
    TagAndDigest {
        /// The tag
        tag: String,
        /// The pinned digest
        digest: String,
    },
}

/// A normalized container image reference.
///
/// Unqualified names resolve to Docker Hub, single-segment Docker Hub names
/// gain the `library/` namespace and a missing tag defaults to `latest`
/// unless the reference is pinned by digest:
///
/// ```rust
/// use registry_digest::ImageReference;
///
/// let reference: ImageReference = "nginx".parse().unwrap();
/// assert_eq!(reference.host(), "index.docker.io");
/// assert_eq!(reference.repository(), "library/nginx");
/// assert_eq!(reference.tag(), Some("latest"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageReference {
    host: String,
    repository: String,
    version: TagOrDigest,
}

impl ImageReference {
    /// Parse and normalize a raw image name.
    pub fn parse(name: &str) -> Result<Self> {
        let raw = name.trim();
        if raw.is_empty() {
            return Err(RegistryError::invalid_reference(name, "empty image name"));
        }

        let (rest, digest) = match raw.split_once('@') {
            Some((rest, digest)) => {
                if !DIGEST_REGEXP.is_match(digest) {
                    return Err(RegistryError::invalid_reference(
                        name,
                        format!("malformed digest {:?}", digest),
                    ));
                }
                (rest, Some(digest))
            }
            None => (raw, None),
        };

        // A colon only introduces a tag when no slash follows it, otherwise
        // it belongs to a `host:port` prefix.
        let (rest, tag) = match rest.rfind(':') {
            Some(i) if !rest[i + 1..].contains('/') => {
                let tag = &rest[i + 1..];
                if !TAG_REGEXP.is_match(tag) {
                    return Err(RegistryError::invalid_reference(
                        name,
                        format!("malformed tag {:?}", tag),
                    ));
                }
                (&rest[..i], Some(tag))
            }
            _ => (rest, None),
        };

        let (host, repository) = split_host(rest);
        if !HOST_REGEXP.is_match(&host) {
            return Err(RegistryError::invalid_reference(
                name,
                format!("malformed registry host {:?}", host),
            ));
        }
        let valid_path = repository
            .split('/')
            .all(|component| PATH_COMPONENT_REGEXP.is_match(component));
        if repository.is_empty() || !valid_path {
            return Err(RegistryError::invalid_reference(
                name,
                format!("malformed repository path {:?}", repository),
            ));
        }
        if host.len() + 1 + repository.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(RegistryError::invalid_reference(
                name,
                format!(
                    "repository name must not exceed {} characters",
                    NAME_TOTAL_LENGTH_MAX
                ),
            ));
        }

        let version = match (tag, digest) {
            (Some(tag), None) => TagOrDigest::Tag(tag.to_string()),
            (None, Some(digest)) => TagOrDigest::Digest(digest.to_string()),
            (Some(tag), Some(digest)) => TagOrDigest::TagAndDigest {
                tag: tag.to_string(),
                digest: digest.to_string(),
            },
            (None, None) => TagOrDigest::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(ImageReference {
            host,
            repository,
            version,
        })
    }

    /// Registry host, including the port when one was given
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Repository path inside the registry, e.g. `library/nginx`
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The tag and/or digest this reference points at
    pub fn version(&self) -> &TagOrDigest {
        &self.version
    }

    /// The tag, if the reference carries one
    pub fn tag(&self) -> Option<&str> {
        match &self.version {
            TagOrDigest::Tag(tag) | TagOrDigest::TagAndDigest { tag, .. } => Some(tag),
            TagOrDigest::Digest(_) => None,
        }
    }

    /// The pinned digest, if the reference carries one
    pub fn digest(&self) -> Option<&str> {
        match &self.version {
            TagOrDigest::Digest(digest) | TagOrDigest::TagAndDigest { digest, .. } => Some(digest),
            TagOrDigest::Tag(_) => None,
        }
    }

    /// The tag to address manifests with.
    ///
    /// Digest-pinned references without a tag cannot be checked for updates
    /// and are rejected.
    pub fn require_tag(&self) -> Result<&str> {
        self.tag().ok_or_else(|| {
            RegistryError::invalid_reference(
                &self.to_string(),
                "reference is pinned by digest and has no tag",
            )
        })
    }
}

/// Split the registry host off a name, falling back to Docker Hub.
///
/// Same rule as the Docker CLI: the first path segment is a host when it
/// contains a dot or a port, or is `localhost`.
fn split_host(name: &str) -> (String, String) {
    let (host, path) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.')
                || first.contains(':')
                || first == "localhost"
                || first.chars().any(|c| c.is_ascii_uppercase()) =>
        {
            (first, rest)
        }
        _ => (DOCKER_HUB_HOST, name),
    };

    if DOCKER_HUB_DOMAINS.contains(&host) {
        let path = if !path.is_empty() && !path.contains('/') {
            format!("{}/{}", DOCKER_HUB_OFFICIAL_NAMESPACE, path)
        } else {
            path.to_string()
        };
        (DOCKER_HUB_HOST.to_string(), path)
    } else {
        (host.to_string(), path.to_string())
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.repository)?;
        if let Some(tag) = self.tag() {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = self.digest() {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for ImageReference {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        ImageReference::parse(s)
    }
}

impl TryFrom<&str> for ImageReference {
    type Error = RegistryError;

    fn try_from(s: &str) -> Result<Self> {
        ImageReference::parse(s)
    }
}

impl TryFrom<String> for ImageReference {
    type Error = RegistryError;

    fn try_from(s: String) -> Result<Self> {
        ImageReference::parse(&s)
    }
}
