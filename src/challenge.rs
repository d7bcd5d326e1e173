//! Parsing of `WWW-Authenticate` challenges
//!
//! Registries are not strict about RFC 7235, so the parser is lenient:
//! trailing commas, parameters without values and unknown parameters never
//! make it fail.

use std::collections::HashMap;
use std::fmt;

/// Authentication scheme advertised by a challenge
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChallengeScheme {
    /// HTTP basic authentication
    Basic,
    /// Token authentication through a `realm` endpoint
    Bearer,
    /// Any other scheme, as written in the header (empty if there was none)
    Other(String),
}

impl fmt::Display for ChallengeScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeScheme::Basic => f.write_str("Basic"),
            ChallengeScheme::Bearer => f.write_str("Bearer"),
            ChallengeScheme::Other(scheme) => f.write_str(scheme),
        }
    }
}

/// A parsed `WWW-Authenticate` challenge
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    /// The authentication scheme
    pub scheme: ChallengeScheme,
    /// Parameters of the challenge, keyed as they appear in the header
    pub params: HashMap<String, String>,
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params: Vec<_> = self.params.iter().collect();
        params.sort();
        let params: Vec<String> = params
            .into_iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect();
        write!(f, "{} {}", self.scheme, params.join(","))
    }
}

impl Challenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// Returns `None` when the header is blank.
    ///
    /// ```rust
    /// use registry_digest::{Challenge, ChallengeScheme};
    ///
    /// let challenge = Challenge::parse(
    ///     r#"Bearer realm="https://ghcr.io/token",service="ghcr.io","#,
    /// ).unwrap();
    /// assert_eq!(challenge.scheme, ChallengeScheme::Bearer);
    /// assert_eq!(challenge.realm(), Some("https://ghcr.io/token"));
    /// assert_eq!(challenge.service(), Some("ghcr.io"));
    /// assert_eq!(challenge.scope(), None);
    /// ```
    pub fn parse(header: &str) -> Option<Challenge> {
        let header = header.trim();
        if header.is_empty() {
            return None;
        }

        let (token, rest) = match header.split_once(char::is_whitespace) {
            Some((token, rest)) => (token, rest),
            None => (header, ""),
        };
        // A first token followed by `=` is a parameter name, not a scheme.
        let (scheme, body) = if token.contains('=') || rest.trim_start().starts_with('=') {
            (ChallengeScheme::Other(String::new()), header)
        } else {
            (parse_scheme(token), rest)
        };

        let mut params = HashMap::new();
        for piece in split_params(body) {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            let (key, value) = match piece.split_once('=') {
                Some((key, value)) => (key.trim(), unquote(value.trim())),
                None => (piece, ""),
            };
            if key.is_empty() {
                continue;
            }
            params
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }

        Some(Challenge { scheme, params })
    }

    /// Look up a parameter by case-insensitive key, ignoring empty values
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// The token endpoint of a bearer challenge
    pub fn realm(&self) -> Option<&str> {
        self.param("realm")
    }

    /// The service name to request a token for
    pub fn service(&self) -> Option<&str> {
        self.param("service")
    }

    /// The scope suggested by the registry
    pub fn scope(&self) -> Option<&str> {
        self.param("scope")
    }
}

fn parse_scheme(token: &str) -> ChallengeScheme {
    if token.eq_ignore_ascii_case("bearer") {
        ChallengeScheme::Bearer
    } else if token.eq_ignore_ascii_case("basic") {
        ChallengeScheme::Basic
    } else {
        ChallengeScheme::Other(token.to_string())
    }
}

/// Split on commas that are not inside a quoted value.
fn split_params(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, ch) in body.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
