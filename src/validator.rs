//! Target URL validation, run before anything touches the network.

use std::fmt;

use url::Url;

use crate::error::GatewayError;

/// An absolute `http`/`https` URL with a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidUrl(Url);

impl ValidUrl {
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn host(&self) -> &str {
        // Parsing guarantees a host for http(s) URLs.
        self.0.host_str().unwrap_or_default()
    }
}

impl fmt::Display for ValidUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub fn validate(raw: &str) -> Result<ValidUrl, GatewayError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(GatewayError::InvalidUrl("URL is empty".to_string()));
    }

    let url = Url::parse(raw).map_err(|e| match e {
        url::ParseError::RelativeUrlWithoutBase => {
            GatewayError::InvalidUrl("URL must be absolute".to_string())
        }
        other => GatewayError::InvalidUrl(format!("URL is malformed ({other})")),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(GatewayError::InvalidUrl(format!(
                "unsupported scheme `{scheme}`, expected http or https"
            )))
        }
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(ValidUrl(url)),
        _ => Err(GatewayError::InvalidUrl("URL has no host".to_string())),
    }
}
