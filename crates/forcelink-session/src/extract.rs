//! Credential extraction from an implicit-grant redirect.
//!
//! The identity provider sends the user back to the callback URL with the
//! credentials in the fragment:
//!
//! ```text
//! https://app.example.com/cb#access_token=00D...&instance_url=https%3A%2F%2Fna1.salesforce.com&id=...
//! ```
//!
//! [`extract`] never fails. A URL that is not (yet) the callback, or that has
//! no fragment, is simply [`Extraction::NotReady`].

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Credentials parsed from a redirect fragment.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The access token exactly as it appeared in the fragment.
    pub access_token: String,
    /// Decoded access token, used as the bearer credential.
    pub session_id: String,
    /// Decoded API base URL.
    pub instance_url: String,
    /// Decoded refresh token, when the connected app issues one.
    pub refresh_token: Option<String>,
    /// Decoded identity URL (`id`).
    pub identity_url: Option<String>,
    /// Issue time, from `issued_at` in epoch milliseconds.
    pub issued_at: Option<DateTime<Utc>>,
    /// Every fragment pair, undecoded.
    pub params: HashMap<String, String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("instance_url", &self.instance_url)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("identity_url", &self.identity_url)
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

/// Result of inspecting a URL the login surface navigated to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Not the callback yet, or the callback without usable credentials.
    NotReady,
    /// The callback carried credentials.
    Credentials(Credentials),
    /// The callback carried an OAuth error such as `access_denied`.
    Denied {
        /// OAuth error code.
        error: String,
        /// Decoded `error_description`, empty when absent.
        description: String,
    },
}

/// Inspect `url` for credentials addressed to `callback_url`.
pub fn extract(url: &str, callback_url: &str) -> Extraction {
    if callback_url.is_empty() || !url.contains(callback_url) {
        return Extraction::NotReady;
    }
    let Some((_, fragment)) = url.split_once('#') else {
        return Extraction::NotReady;
    };
    if fragment.is_empty() {
        return Extraction::NotReady;
    }

    let params = parse_fragment(fragment);

    if let Some(error) = params.get("error") {
        return Extraction::Denied {
            error: percent_decode(error),
            description: params
                .get("error_description")
                .map(|d| percent_decode(d))
                .unwrap_or_default(),
        };
    }

    let (Some(access_token), Some(instance_url)) =
        (params.get("access_token"), params.get("instance_url"))
    else {
        tracing::debug!("callback fragment has no access_token/instance_url yet");
        return Extraction::NotReady;
    };

    let issued_at = params
        .get("issued_at")
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    Extraction::Credentials(Credentials {
        access_token: access_token.clone(),
        session_id: percent_decode(access_token),
        instance_url: percent_decode(instance_url),
        refresh_token: params.get("refresh_token").map(|v| percent_decode(v)),
        identity_url: params.get("id").map(|v| percent_decode(v)),
        issued_at,
        params,
    })
}

/// Split `a=1&b=2` into a map. A pair without `=` maps to an empty value.
fn parse_fragment(fragment: &str) -> HashMap<String, String> {
    fragment
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Decode `%XX` escapes. `+` is left alone, matching URI component decoding.
///
/// Invalid escapes are kept literally and invalid UTF-8 is replaced.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(h), Some(l)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2]))
        {
            output.push((h << 4) | l);
            i += 3;
            continue;
        }
        output.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const CALLBACK: &str = "https://app.example.com/cb";

    fn credentials(url: &str) -> Credentials {
        match extract(url, CALLBACK) {
            Extraction::Credentials(c) => c,
            other => panic!("expected credentials, got {other:?}"),
        }
    }

    #[test]
    fn extracts_decoded_session_id_and_instance_url() {
        let url = "https://app.example.com/cb#access_token=AB%20C&instance_url=https%3A%2F%2Fx.my.salesforce.com&id=https%3A%2F%2Flogin.salesforce.com%2Fid%2F00D%2F005";
        let creds = credentials(url);
        assert_eq!(creds.session_id, "AB C");
        assert_eq!(creds.access_token, "AB%20C");
        assert_eq!(creds.instance_url, "https://x.my.salesforce.com");
        assert_eq!(
            creds.identity_url.as_deref(),
            Some("https://login.salesforce.com/id/00D/005")
        );
        assert!(creds.refresh_token.is_none());
    }

    #[test]
    fn keeps_raw_params() {
        let creds = credentials(
            "https://app.example.com/cb#access_token=a%21b&instance_url=https%3A%2F%2Fx&scope=api%20refresh_token&token_type=Bearer",
        );
        assert_eq!(creds.params.get("scope").unwrap(), "api%20refresh_token");
        assert_eq!(creds.params.get("token_type").unwrap(), "Bearer");
        assert_eq!(creds.session_id, "a!b");
    }

    #[test]
    fn extracts_refresh_token_and_issued_at() {
        let creds = credentials(
            "https://app.example.com/cb#access_token=t&instance_url=https%3A%2F%2Fx&refresh_token=5Aep%2B%3D&issued_at=1700000000000",
        );
        assert_eq!(creds.refresh_token.as_deref(), Some("5Aep+="));
        assert_eq!(
            creds.issued_at.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn unparsable_issued_at_is_ignored() {
        let creds = credentials(
            "https://app.example.com/cb#access_token=t&instance_url=https%3A%2F%2Fx&issued_at=yesterday",
        );
        assert!(creds.issued_at.is_none());
    }

    #[test]
    fn other_urls_are_not_ready() {
        assert_eq!(
            extract("https://login.salesforce.com/?un=x", CALLBACK),
            Extraction::NotReady
        );
        assert_eq!(extract("about:blank", CALLBACK), Extraction::NotReady);
    }

    #[test]
    fn callback_without_fragment_is_not_ready() {
        assert_eq!(extract(CALLBACK, CALLBACK), Extraction::NotReady);
        assert_eq!(
            extract("https://app.example.com/cb#", CALLBACK),
            Extraction::NotReady
        );
    }

    #[test]
    fn callback_missing_instance_url_is_not_ready() {
        assert_eq!(
            extract("https://app.example.com/cb#access_token=abc", CALLBACK),
            Extraction::NotReady
        );
    }

    #[test]
    fn provider_error_is_denied() {
        let result = extract(
            "https://app.example.com/cb#error=access_denied&error_description=end-user%20denied%20authorization",
            CALLBACK,
        );
        assert_eq!(
            result,
            Extraction::Denied {
                error: "access_denied".to_string(),
                description: "end-user denied authorization".to_string(),
            }
        );
    }

    #[test]
    fn pairs_without_value_are_kept() {
        let params = parse_fragment("a=1&flag&&b=");
        assert_eq!(params.get("a").unwrap(), "1");
        assert_eq!(params.get("flag").unwrap(), "");
        assert_eq!(params.get("b").unwrap(), "");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn percent_decode_basic() {
        assert_eq!(percent_decode("hello"), "hello");
        assert_eq!(percent_decode("hello%20world"), "hello world");
        assert_eq!(percent_decode("a%2Fb"), "a/b");
        assert_eq!(percent_decode(""), "");
    }

    #[test]
    fn percent_decode_keeps_plus() {
        assert_eq!(percent_decode("a+b"), "a+b");
    }

    #[test]
    fn percent_decode_multibyte() {
        assert_eq!(percent_decode("caf%C3%A9"), "café");
    }

    #[test]
    fn percent_decode_invalid_escape_is_literal() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("%4"), "%4");
    }

    #[test]
    fn credentials_debug_redacts_tokens() {
        let creds = credentials(
            "https://app.example.com/cb#access_token=secret-token&instance_url=https%3A%2F%2Fx&refresh_token=secret-refresh",
        );
        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret-token"));
        assert!(!debug.contains("secret-refresh"));
        assert!(debug.contains("[REDACTED]"));
    }
}
