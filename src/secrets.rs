//! Types for working with registry access secrets

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::debug;

/// A registry credential, as derived from its stored form
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Access the registry anonymously
    Anonymous,

    /// Username and password recovered from a stored JSON credential
    Basic(String, String),

    /// An opaque value that is already the wire form of a basic credential,
    /// i.e. fit to follow `Basic ` in an `Authorization` header
    Encoded(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = String::from("<redacted>");
        match self {
            Credential::Anonymous => f.write_str("Anonymous"),
            Credential::Basic(username, _) => f
                .debug_tuple("Basic")
                .field(username)
                .field(&redacted)
                .finish(),
            Credential::Encoded(_) => f.debug_tuple("Encoded").field(&redacted).finish(),
        }
    }
}

#[derive(Deserialize)]
struct StoredAuth {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl Credential {
    /// Classify a stored credential.
    ///
    /// A base64 encoded JSON object with a non-empty `username` and `password`
    /// becomes [`Credential::Basic`]. Anything else is taken to be already
    /// encoded, so `user:pass` blobs produced elsewhere keep working.
    pub fn from_stored(stored: &str) -> Self {
        if stored.is_empty() {
            return Credential::Anonymous;
        }
        match decode_stored_auth(stored) {
            Some((username, password)) => Credential::Basic(username, password),
            None => Credential::Encoded(stored.to_string()),
        }
    }

    /// The value to place after `Basic ` in an `Authorization` header
    pub fn wire_form(&self) -> Option<String> {
        match self {
            Credential::Anonymous => None,
            Credential::Basic(username, password) => {
                Some(STANDARD.encode(format!("{}:{}", username, password)))
            }
            Credential::Encoded(value) => Some(value.clone()),
        }
    }

    /// Whether no credential was supplied
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Credential::Anonymous)
    }
}

fn decode_stored_auth(stored: &str) -> Option<(String, String)> {
    let decoded = STANDARD.decode(stored).ok()?;
    let auth: StoredAuth = serde_json::from_slice(&decoded).ok()?;
    if auth.username.is_empty() || auth.password.is_empty() {
        debug!("Stored credential is JSON without username and password, passing it through");
        return None;
    }
    Some((auth.username, auth.password))
}

/// Translate a stored credential into its wire form.
///
/// Never fails: empty input gives empty output and input that is not an
/// encoded JSON credential is returned unchanged.
///
/// ```rust
/// use registry_digest::transform_credential;
///
/// // base64 of {"username":"user","password":"pass"}
/// let stored = "eyJ1c2VybmFtZSI6InVzZXIiLCJwYXNzd29yZCI6InBhc3MifQ==";
/// assert_eq!(transform_credential(stored), "dXNlcjpwYXNz");
/// assert_eq!(transform_credential("dXNlcjpwYXNz"), "dXNlcjpwYXNz");
/// ```
pub fn transform_credential(stored: &str) -> String {
    Credential::from_stored(stored)
        .wire_form()
        .unwrap_or_default()
}

pub(crate) trait Authenticable {
    /// Send the credential as HTTP basic authentication, if there is one
    fn apply_credential(self, credential: &Credential) -> Self;

    /// Set a complete `Authorization` value, unless it is empty
    fn apply_authorization(self, header: &str) -> Self;
}

impl Authenticable for reqwest::RequestBuilder {
    fn apply_credential(self, credential: &Credential) -> Self {
        match credential.wire_form() {
            Some(wire) => self.header(AUTHORIZATION, format!("Basic {}", wire)),
            None => self,
        }
    }

    fn apply_authorization(self, header: &str) -> Self {
        if header.is_empty() {
            self
        } else {
            self.header(AUTHORIZATION, header)
        }
    }
}
