//! Endpoint aliases and OVH request signing.

use sha1::{Digest, Sha1};

use super::OvhGatewayError;

const ENDPOINT_ALIASES: &[(&str, &str)] = &[
    ("ovh-eu", "https://eu.api.ovh.com/1.0"),
    ("ovh-ca", "https://ca.api.ovh.com/1.0"),
    ("ovh-us", "https://api.us.ovhcloud.com/1.0"),
];

/// Returns the known endpoint aliases.
#[must_use]
pub fn endpoint_aliases() -> impl Iterator<Item = &'static str> {
    ENDPOINT_ALIASES.iter().map(|(alias, _)| *alias)
}

/// Resolves an endpoint alias or literal `http(s)://` URL into a base URL
/// without a trailing slash.
///
/// # Errors
///
/// Returns [`OvhGatewayError::Config`] for unknown aliases.
pub fn resolve_endpoint(endpoint: &str) -> Result<String, OvhGatewayError> {
    let trimmed = endpoint.trim();
    if let Some((_, url)) = ENDPOINT_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(trimmed))
    {
        return Ok((*url).to_owned());
    }
    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        return Ok(trimmed.trim_end_matches('/').to_owned());
    }
    let known = endpoint_aliases().collect::<Vec<_>>().join(", ");
    Err(OvhGatewayError::Config(format!(
        "unknown endpoint '{trimmed}'; expected one of {known} or an http(s) URL"
    )))
}

/// Inputs to an OVH request signature.
#[derive(Clone, Copy, Debug)]
pub struct SignatureInput<'a> {
    /// Application secret.
    pub application_secret: &'a str,
    /// Consumer key.
    pub consumer_key: &'a str,
    /// Upper-case HTTP method.
    pub method: &'a str,
    /// Full request URL including the base.
    pub url: &'a str,
    /// Request body, empty for bodiless requests.
    pub body: &'a str,
    /// Timestamp sent in `X-Ovh-Timestamp`.
    pub timestamp: i64,
}

impl SignatureInput<'_> {
    /// Computes the `X-Ovh-Signature` header value.
    #[must_use]
    pub fn sign(&self) -> String {
        let timestamp = self.timestamp.to_string();
        let payload = [
            self.application_secret,
            self.consumer_key,
            self.method,
            self.url,
            self.body,
            timestamp.as_str(),
        ]
        .join("+");
        let digest = Sha1::digest(payload.as_bytes());
        format!("$1${}", hex::encode(digest))
    }
}
