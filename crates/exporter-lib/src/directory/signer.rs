//! SLS request signing (signature version 1, HMAC-SHA1)

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::fmt;

type HmacSha1 = Hmac<Sha1>;

/// Access key pair used to sign every request
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Produces `Authorization` header values for log service requests
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: Credentials,
}

impl RequestSigner {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Build the canonical string covered by the signature
    ///
    /// Only `x-log-*` and `x-acs-*` headers take part; they are lowercased
    /// and sorted by name. Query parameters are sorted by key and left
    /// unescaped.
    pub fn string_to_sign(
        method: &str,
        content_md5: &str,
        content_type: &str,
        date: &str,
        headers: &[(&str, &str)],
        path: &str,
        query: &[(&str, String)],
    ) -> String {
        let mut canonical_headers: Vec<(String, &str)> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), *value))
            .filter(|(name, _)| name.starts_with("x-log-") || name.starts_with("x-acs-"))
            .collect();
        canonical_headers.sort();

        let mut resource = path.to_string();
        if !query.is_empty() {
            let mut params: Vec<&(&str, String)> = query.iter().collect();
            params.sort_by(|a, b| a.0.cmp(b.0));
            let joined = params
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("&");
            resource.push('?');
            resource.push_str(&joined);
        }

        let mut out = format!("{method}\n{content_md5}\n{content_type}\n{date}\n");
        for (name, value) in canonical_headers {
            out.push_str(&name);
            out.push(':');
            out.push_str(value);
            out.push('\n');
        }
        out.push_str(&resource);
        out
    }

    /// Sign a canonical string, returning the full `Authorization` value
    pub fn authorization(&self, string_to_sign: &str) -> String {
        let mut mac = HmacSha1::new_from_slice(self.credentials.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        format!("LOG {}:{}", self.credentials.access_key, signature)
    }
}
