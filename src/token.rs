use serde::de::{self, Unexpected};
use serde::{Deserialize, Deserializer};
use std::fmt;

/// A token granted by a registry's token endpoint.
///
/// Empty values are rejected, so `{"token": "", "access_token": "x"}` falls
/// through to `access_token` and `{"token": ""}` alone does not parse.
#[derive(Deserialize, Clone)]
#[serde(untagged)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RegistryToken {
    Token {
        #[serde(deserialize_with = "non_empty")]
        token: String,
    },
    AccessToken {
        #[serde(deserialize_with = "non_empty")]
        access_token: String,
    },
}

fn non_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = String::deserialize(deserializer)?;
    if value.is_empty() {
        return Err(de::Error::invalid_value(
            Unexpected::Str(&value),
            &"a non-empty token",
        ));
    }
    Ok(value)
}

impl fmt::Debug for RegistryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = String::from("<redacted>");
        match self {
            RegistryToken::Token { .. } => {
                f.debug_struct("Token").field("token", &redacted).finish()
            }
            RegistryToken::AccessToken { .. } => f
                .debug_struct("AccessToken")
                .field("access_token", &redacted)
                .finish(),
        }
    }
}

impl RegistryToken {
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.token())
    }

    pub fn token(&self) -> &str {
        match self {
            RegistryToken::Token { token } => token,
            RegistryToken::AccessToken { access_token } => access_token,
        }
    }
}

/// Outcome of the challenge/token negotiation for one image.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// Complete `Authorization` value for manifest requests, e.g.
    /// `Bearer <token>` or `Basic <credential>`. Empty when the registry
    /// does not require authentication.
    pub header: String,
    /// Host (and port, if any) serving tokens for the image: the realm host
    /// for bearer challenges, otherwise the host that answered the challenge request.
    pub effective_host: String,
    /// Whether the challenge request followed an HTTP redirect to another host
    pub was_redirected: bool,
}

impl TokenGrant {
    pub(crate) fn anonymous(effective_host: String, was_redirected: bool) -> Self {
        TokenGrant {
            header: String::new(),
            effective_host,
            was_redirected,
        }
    }

    /// Whether the registry accepted the challenge request without authentication
    pub fn is_anonymous(&self) -> bool {
        self.header.is_empty()
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = match self.header.split_once(' ') {
            Some((scheme, _)) => format!("{} <redacted>", scheme),
            None if self.header.is_empty() => String::new(),
            None => String::from("<redacted>"),
        };
        f.debug_struct("TokenGrant")
            .field("header", &header)
            .field("effective_host", &self.effective_host)
            .field("was_redirected", &self.was_redirected)
            .finish()
    }
}
